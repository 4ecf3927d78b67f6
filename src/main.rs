use std::io::IsTerminal;

use clap::Parser;
use docvec::{
    ConfigDb,
    DataDir,
    Error,
    IndexManager,
    Result,
    Settings,
    StateFiles,
    ingestion,
    search,
    settings,
    text_util,
    walker::{self, FileFilter},
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCVEC_LOG") {
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    let flags: Vec<(&str, String)> = cli
        .embedder
        .iter()
        .map(|e| ("embedder", e.clone()))
        .collect();

    // Settings commands must work even when the stored combination is
    // invalid, so they resolve on their own.
    if let Command::Config { action } = cli.command {
        return cmd_config(&config_db, &data_dir, &flags, action);
    }
    let settings = Settings::resolve(&config_db, &flags)?;

    match cli.command {
        Command::Ingest(args) => {
            let manager = open_manager(&data_dir, &settings)?;
            cmd_ingest(&manager, &args, !cli.quiet)?;
            manager.shutdown()?;
        }
        Command::Search(args) => {
            let manager = open_manager(&data_dir, &settings)?;
            let hits = manager.search(&args.query, args.count)?;
            if args.json {
                println!("{}", search::format_json(&hits, &args.query)?);
            } else {
                print!("{}", search::format_human(&hits));
            }
        }
        Command::Delete(args) => {
            let manager = open_manager(&data_dir, &settings)?;
            let id = manager.resolve(&args.document)?;
            let removed = manager.delete(&id)?;
            println!("Deleted {id} ({removed} chunk(s))");
        }
        Command::List(args) => {
            let manager = open_manager(&data_dir, &settings)?;
            cmd_list(&manager, args.all, args.json)?;
        }
        Command::Show(args) => {
            let manager = open_manager(&data_dir, &settings)?;
            cmd_show(&manager, &args)?;
        }
        Command::Status(args) => {
            let manager = open_manager(&data_dir, &settings)?;
            cmd_status(&manager, &data_dir, &settings, args.json)?;
        }
        Command::Prune => {
            let manager = open_manager(&data_dir, &settings)?;
            let removed = manager.prune_deleted()?;
            println!("Pruned {removed} deleted document(s)");
        }
        Command::Reset(args) => {
            if data_dir.reset(!args.no_backup)? {
                if args.no_backup {
                    println!("Index removed");
                } else {
                    println!(
                        "Index removed (backup in {})",
                        data_dir.backup_dir().display()
                    );
                }
            } else {
                println!("Nothing to reset");
            }
        }
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn open_manager(data_dir: &DataDir, settings: &Settings) -> Result<IndexManager> {
    IndexManager::open(
        StateFiles::new(data_dir.state_dir()),
        settings.index_options()?,
        settings.build_embedder(),
    )
}

fn cmd_ingest(
    manager: &IndexManager,
    args: &cli::IngestArgs,
    allow_progress: bool,
) -> Result<()> {
    let filter = FileFilter::new(&args.include)?;
    let files = walker::discover(&args.paths, &filter)?;
    if files.is_empty() {
        eprintln!("No matching files found.");
        return Ok(());
    }

    let show_progress =
        allow_progress && !args.json && std::io::stderr().is_terminal();
    let report = ingestion::ingest_files(
        manager,
        &files,
        ingestion::DEFAULT_COMMIT_BATCH,
        show_progress,
    )?;

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    for file in &report.indexed {
        println!(
            "indexed #{} {} ({} chunk(s))",
            file.outcome.document_id.short(),
            file.filename,
            file.outcome.chunk_count
        );
    }
    for file in &report.failed {
        println!("failed  {}: {}", file.filename, file.reason);
    }
    println!(
        "\n{} indexed, {} failed, {} chunk(s)",
        report.indexed.len(),
        report.failed.len(),
        report.total_chunks()
    );
    Ok(())
}

fn cmd_list(manager: &IndexManager, all: bool, json: bool) -> Result<()> {
    let documents = manager.list_documents(all);

    if json {
        println!("{}", serde_json::to_string(&documents)?);
    } else if documents.is_empty() {
        println!("No documents indexed.");
    } else {
        for doc in &documents {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                doc.id.short(),
                doc.state,
                doc.chunk_count,
                doc.uploaded_at.format("%Y-%m-%d %H:%M"),
                doc.filename
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ChunkOutput {
    id: u64,
    text: String,
}

#[derive(Serialize)]
struct ShowOutput {
    document: docvec::registry::Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<ChunkOutput>>,
}

fn cmd_show(manager: &IndexManager, args: &cli::ShowArgs) -> Result<()> {
    let id = manager.resolve(&args.document)?;
    let document = manager.get_document(&id).ok_or_else(|| Error::NotFound {
        kind: "document",
        name: args.document.clone(),
    })?;
    let chunks = args.chunks.then(|| {
        manager
            .document_chunks(&id)
            .into_iter()
            .map(|(id, text)| ChunkOutput { id, text })
            .collect::<Vec<_>>()
    });

    if args.json {
        println!("{}", serde_json::to_string(&ShowOutput { document, chunks })?);
        return Ok(());
    }

    println!("id: {}", document.id);
    println!("filename: {}", document.filename);
    println!("state: {}", document.state);
    println!("uploaded: {}", document.uploaded_at.to_rfc3339());
    if let Some(at) = document.deleted_at {
        println!("deleted: {}", at.to_rfc3339());
    }
    println!("chunks: {}", document.chunk_count);
    println!("characters: {}", document.total_chars);

    for chunk in chunks.iter().flatten() {
        println!(
            "\n[{}] {}",
            chunk.id,
            text_util::preview(&chunk.text, text_util::DEFAULT_PREVIEW_CHARS)
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    data_dir: String,
    embedder: String,
    model: &'a str,
    #[serde(flatten)]
    stats: docvec::IndexStats,
}

fn cmd_status(
    manager: &IndexManager,
    data_dir: &DataDir,
    settings: &Settings,
    json: bool,
) -> Result<()> {
    let stats = manager.stats();
    let model = manager.embedder().model_name();

    if json {
        let out = StatusOutput {
            data_dir: data_dir.root().display().to_string(),
            embedder: settings.embedder.to_string(),
            model,
            stats,
        };
        println!("{}", serde_json::to_string(&out)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Embedder: {} ({model})", settings.embedder);
        println!("Dimension: {}", stats.dimension);
        println!(
            "Documents: {} ({} deleted)",
            stats.documents, stats.deleted_documents
        );
        println!("Chunks: {}", stats.chunks);
        println!("Vectors: {}", stats.vectors);
        println!("Next id: {}", stats.next_id);
        println!("Generation: {}", stats.generation);
    }
    Ok(())
}

fn cmd_config(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    flags: &[(&str, String)],
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::List => {
            let settings = Settings::resolve(config_db, flags)?;
            let stored = config_db.list_settings()?;
            for &key in settings::KEYS {
                let marker = if stored.iter().any(|(k, _)| k == key) {
                    " (stored)"
                } else {
                    ""
                };
                println!("{key} = {}{marker}", settings.get(key)?);
            }
        }
        ConfigAction::Get { key } => {
            let settings = Settings::resolve(config_db, flags)?;
            println!("{}", settings.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            settings::validate_setting(&key, &value)?;
            config_db.set_setting(&key, &value)?;
            println!("{key} = {value}");

            if let Err(e) = Settings::resolve(config_db, flags) {
                eprintln!("Warning: settings are not usable yet: {e}");
            }
            if key == "dimension"
                && StateFiles::new(data_dir.state_dir()).exists()
            {
                eprintln!(
                    "Warning: the existing index keeps its dimension; \
                     run `docvec reset` before ingesting again."
                );
            }
        }
        ConfigAction::Unset { key } => {
            if !settings::KEYS.contains(&key.as_str()) {
                return Err(Error::Config(format!("unknown setting '{key}'")));
            }
            if config_db.remove_setting(&key)? {
                println!("Removed {key}");
            } else {
                println!("{key} was not set");
            }
        }
    }
    Ok(())
}
