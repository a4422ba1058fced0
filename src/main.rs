use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use treesync::{
    DataDir,
    MetadataDb,
    ModelManager,
    Settings,
    SyncEngine,
    cli::{self, Cli, Command},
    error::{self, Error},
    search,
    settings::Overrides,
    watcher,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("TREESYNC_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let overrides = Overrides {
        chunk_size: cli.chunk_size,
        search_limit: match &cli.command {
            Command::Search(args) => args.limit,
            _ => None,
        },
        ignore: cli.ignore.clone(),
    };
    let settings = Settings::resolve(&overrides)?;
    let model = match &cli.model {
        Some(id) => ModelManager::with_model_id(id.clone())?,
        None => ModelManager::new(),
    };

    match cli.command {
        Command::Watch(args) => {
            let engine = open_engine(&data_dir, &args.root, model, &settings)?;
            cmd_watch(engine, &settings)?;
        }
        Command::Resync(args) => {
            let mut engine =
                open_engine(&data_dir, &args.root, model, &settings)?;
            let stats = engine.initial_walk()?;
            println!(
                "Indexed {} directories, {} files, {} chunks ({} failures)",
                stats.directories, stats.files, stats.chunks, stats.failures
            );
        }
        Command::Search(args) => {
            cmd_search(&data_dir, model, &settings, &args)?;
        }
        Command::Status(args) => {
            cmd_status(&data_dir, &model, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn open_engine(
    data_dir: &DataDir,
    root: &Path,
    model: ModelManager,
    settings: &Settings,
) -> error::Result<SyncEngine> {
    if !root.exists() {
        return Err(Error::Config(format!(
            "directory does not exist: {}",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "path is not a directory: {}",
            root.display()
        )));
    }

    let metadata = MetadataDb::open(&data_dir.metadata_db())?;
    SyncEngine::new(root, metadata, Box::new(model), settings)
}

fn cmd_watch(mut engine: SyncEngine, settings: &Settings) -> error::Result<()> {
    let stats = engine.initial_walk()?;
    eprintln!(
        "Indexed {} directories, {} files. Watching {} (Ctrl-C to stop)",
        stats.directories,
        stats.files,
        engine.root().display()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = {
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || -> error::Result<()> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| {
                    Error::Config(format!("failed to start tokio runtime: {e}"))
                })?;
            runtime.block_on(tokio::signal::ctrl_c())?;
            info!("interrupt received, stopping");
            shutdown.store(true, Ordering::Relaxed);
            Ok(())
        })
    };

    watcher::run(&mut engine, &shutdown, settings.debounce)?;
    reap_signal_handler(signal);
    Ok(())
}

/// Collect the Ctrl-C thread once the watch loop has returned. When the
/// loop ended without an interrupt the thread is still waiting; it is left
/// to die with the process instead of blocking on it.
fn reap_signal_handler(signal: JoinHandle<error::Result<()>>) {
    if !signal.is_finished() {
        warn!("watch ended without an interrupt, exiting");
        return;
    }
    match signal.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "signal handler failed"),
        Err(_) => warn!("signal handler panicked"),
    }
}

fn cmd_search(
    data_dir: &DataDir,
    model: ModelManager,
    settings: &Settings,
    args: &cli::SearchArgs,
) -> error::Result<()> {
    let mut engine = open_engine(data_dir, &args.root, model, settings)?;
    let paths = engine.resolve_paths(&args.queries, settings.search_limit)?;

    if args.json {
        search::format_json(&paths, &args.queries)?;
    } else {
        search::format_human(&paths);
    }

    if let Some(target) = &args.link {
        let created = search::link_results(&paths, target)?;
        eprintln!("Linked {created} result(s) into {}", target.display());
    }
    Ok(())
}

fn cmd_status(
    data_dir: &DataDir,
    model: &ModelManager,
    json: bool,
) -> error::Result<()> {
    let metadata = MetadataDb::open(&data_dir.metadata_db())?;
    let counts = metadata.counts()?;

    if json {
        let body = serde_json::json!({
            "data_dir": data_dir.root(),
            "model": model.model_id(),
            "counts": counts,
        });
        println!("{}", serde_json::to_string(&body)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {}", model.model_id());
        println!("Directories: {}", counts.directories);
        println!("Files: {}", counts.files);
        println!("Directory edges: {}", counts.edges);
    }
    Ok(())
}
