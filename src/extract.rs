//! Turning a file on disk into the chunks that get embedded.
//!
//! Files are classified by extension. Binary formats are opaque and never
//! produce chunks; `.pdf` and `.docx` go through their own text readers;
//! everything else is read as text with invalid UTF-8 dropped.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use crate::{
    chunking::chunk_text,
    error::{Error, Result},
};

/// Extensions treated as opaque binary content.
pub const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "tif", "tiff", "webp", "heic",
    "psd",
    // audio and video
    "mp3", "wav", "flac", "ogg", "m4a", "aac", "mp4", "mkv", "mov", "avi",
    "webm", "wmv",
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "zst",
    // executables and objects
    "exe", "dll", "so", "dylib", "o", "a", "bin", "class", "jar", "pyc",
    "wasm",
    // fonts
    "ttf", "otf", "woff", "woff2",
    // other binary documents and stores
    "xls", "xlsx", "ppt", "pptx", "doc", "odt", "sqlite", "iso", "dmg",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Binary,
    Text,
    Pdf,
    Docx,
}

pub fn classify(path: &Path) -> ContentKind {
    let Some(ext) = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
    else {
        return ContentKind::Text;
    };

    match ext.as_str() {
        "pdf" => ContentKind::Pdf,
        "docx" => ContentKind::Docx,
        other if BINARY_EXTENSIONS.contains(&other) => ContentKind::Binary,
        _ => ContentKind::Text,
    }
}

/// What the extractor knows about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub path: PathBuf,
    pub name: String,
    /// Empty for binary files and for files with no text.
    pub chunks: Vec<String>,
}

impl ExtractedContent {
    fn without_chunks(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            chunks: Vec::new(),
        }
    }
}

/// Read and chunk a file. Binary files return no chunks without being
/// read.
pub fn extract(path: &Path, chunk_size: usize) -> Result<ExtractedContent> {
    let mut content = ExtractedContent::without_chunks(path);
    let text = match classify(path) {
        ContentKind::Binary => return Ok(content),
        ContentKind::Text => decode_permissive(&fs::read(path)?),
        ContentKind::Pdf => pdf_text(path)?,
        ContentKind::Docx => docx_text(path)?,
    };
    content.chunks = chunk_text(&text, chunk_size)?;
    Ok(content)
}

/// Decode UTF-8, silently dropping invalid byte sequences.
pub fn decode_permissive(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

pub fn pdf_text(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path).map_err(|e| Error::Extraction {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Paragraph text of a Word document, one line per paragraph.
pub fn docx_text(path: &Path) -> Result<String> {
    let extraction = |reason: String| Error::Extraction {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| extraction(e.to_string()))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| extraction(e.to_string()))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| extraction(e.to_string()))?;
    Ok(document_xml_text(&xml))
}

/// Collect `<w:t>` runs, ending each `<w:p>` paragraph with a newline.
/// Comments are dropped and CDATA sections inside a run are kept verbatim.
fn document_xml_text(xml: &str) -> String {
    let mut text = String::new();
    let mut in_run = false;
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        if in_run {
            push_unescaped(&mut text, &rest[..open]);
        }
        let markup = &rest[open..];

        if let Some(body) = markup.strip_prefix("<!--") {
            let Some(end) = body.find("-->") else {
                break;
            };
            rest = &body[end + 3..];
            continue;
        }
        if let Some(body) = markup.strip_prefix("<![CDATA[") {
            let Some(end) = body.find("]]>") else {
                break;
            };
            if in_run {
                text.push_str(&body[..end]);
            }
            rest = &body[end + 3..];
            continue;
        }

        let Some(len) = tag_end(markup) else {
            break;
        };
        let tag = &markup[1..len];
        rest = &markup[len + 1..];

        let closing = tag.starts_with('/');
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();

        match name {
            "w:t" => in_run = !closing && !self_closing,
            "w:p" if closing || self_closing => text.push('\n'),
            "w:tab" => text.push('\t'),
            "w:br" | "w:cr" => text.push('\n'),
            _ => {}
        }
    }

    text
}

/// Byte offset of the `>` closing the tag that starts `markup`, skipping
/// any `>` inside quoted attribute values.
fn tag_end(markup: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in markup.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn push_unescaped(out: &mut String, raw: &str) {
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let Some(semi) = after.find(';') else {
            out.push_str(after);
            return;
        };
        let entity = &after[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#')?.parse().ok())
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&after[..=semi]),
        }
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
}
