//! Fixed-size chunking of extracted text.
//!
//! Chunks are contiguous, non-overlapping windows of exactly `chunk_size`
//! characters (the last one may be shorter). No word or sentence boundary is
//! honoured, so the same text always yields the same chunks and their
//! concatenation is the input text.

use crate::error::{Error, Result};

/// Split text into contiguous windows of `chunk_size` characters.
///
/// Windows are counted in `char`s, never splitting a multi-byte UTF-8
/// sequence. Empty text yields no chunks.
///
/// # Examples
///
/// ```
/// use treesync::chunking::chunk_text;
///
/// let chunks = chunk_text("hello world", 5).unwrap();
/// assert_eq!(chunks, vec!["hello", " worl", "d"]);
/// assert_eq!(chunks.concat(), "hello world");
/// ```
pub fn chunk_text(text: &str, chunk_size: usize) -> Result<Vec<String>> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput(
            "chunk size must be greater than zero".into(),
        ));
    }

    // Byte offset of every chunk boundary, plus the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .step_by(chunk_size)
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    Ok(boundaries
        .windows(2)
        .map(|w| text[w[0]..w[1]].to_string())
        .collect())
}

/// Number of chunks [`chunk_text`] produces for `char_count` characters.
pub fn chunk_count(char_count: usize, chunk_size: usize) -> usize {
    char_count.div_ceil(chunk_size.max(1))
}
