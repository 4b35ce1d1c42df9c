use kbindex::cli::{Cli, Commands, ConfigAction, ConfigureArgs, KbAction};
use kbindex::config::Config;
use kbindex::error::{KbError, Result};
use kbindex::knowledge_base::{KnowledgeBase, KnowledgeBaseConfigUpdate};
use kbindex::reindex::{ReindexHandle, ReindexState, ReindexStatus};
use kbindex::storage::format_size;
use kbindex::KnowledgeBaseService;
use std::path::PathBuf;
use std::time::Duration;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "kbindex=debug" } else { "kbindex=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Commands::Config { action } => return cmd_config(cli.config, action),
        command => command,
    };

    let config = load_config(cli.config)?;
    let service = KnowledgeBaseService::open(config)?;

    match command {
        Commands::Config { action } => cmd_config(None, action),
        Commands::Kb { action } => cmd_kb(&service, action),
        Commands::Add { kb, files } => cmd_add(&service, &kb, &files),
        Commands::Docs { kb, json } => cmd_docs(&service, &kb, json),
        Commands::Rm { kb, document } => {
            let kb = resolve_kb(&service, &kb)?;
            if service.remove_document(&kb.id, &document)? {
                println!("✓ Removed document {}", document);
            } else {
                println!("Document {} not found in '{}'", document, kb.name);
            }
            Ok(())
        }
        Commands::Reprocess { kb, document } => {
            let kb = resolve_kb(&service, &kb)?;
            let doc = service.reprocess_document(&kb.id, &document)?;
            println!("✓ Reprocessed {} ({} chunks)", doc.filename, doc.chunk_count);
            Ok(())
        }
        Commands::Search {
            kb,
            query,
            limit,
            hybrid,
            no_hybrid,
            json,
        } => {
            let override_hybrid = match (hybrid, no_hybrid) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd_search(&service, &kb, &query, limit, override_hybrid, json)
        }
        Commands::Similar {
            kb,
            document,
            limit,
        } => {
            let kb = resolve_kb(&service, &kb)?;
            let similar = service.find_similar(&kb.id, &document, limit)?;
            if similar.is_empty() {
                println!("No similar documents found");
            }
            for (i, doc) in similar.iter().enumerate() {
                println!(
                    "{}. {} ({}) score {:.3}",
                    i + 1,
                    doc.filename,
                    doc.document_id,
                    doc.similarity_score
                );
                println!("   {}", preview(&doc.preview, 160));
            }
            Ok(())
        }
        Commands::Reindex { kb } => {
            let kb = resolve_kb(&service, &kb)?;
            let runtime = tokio::runtime::Runtime::new().map_err(|e| KbError::Io {
                source: e,
                context: "Failed to create tokio runtime".to_string(),
            })?;
            runtime.block_on(run_reindex(&service, &kb))
        }
    }
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'kbindex config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }
    Ok(())
}

/// Look a knowledge base up by id, then by name
fn resolve_kb(service: &KnowledgeBaseService, reference: &str) -> Result<KnowledgeBase> {
    match service.get_kb(reference) {
        Ok(kb) => Ok(kb),
        Err(KbError::KnowledgeBaseNotFound { .. }) => service
            .find_kb_by_name(reference)?
            .ok_or_else(|| KbError::KnowledgeBaseNotFound {
                id: reference.to_string(),
            }),
        Err(e) => Err(e),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| KbError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn cmd_kb(service: &KnowledgeBaseService, action: KbAction) -> Result<()> {
    match action {
        KbAction::Create { name, description } => {
            let kb = service.create_kb(&name, description.as_deref())?;
            println!("✓ Created knowledge base '{}'", kb.name);
            println!("  ID: {}", kb.id);
            println!("  Model: {}", kb.config.embedding_model);
        }
        KbAction::List { json } => {
            let kbs = service.list_kbs()?;
            if json {
                return print_json(&kbs);
            }
            if kbs.is_empty() {
                println!("No knowledge bases. Create one with 'kbindex kb create <name>'.");
            }
            for kb in kbs {
                println!(
                    "{}  {}  ({} files, created {})",
                    kb.id,
                    kb.name,
                    kb.file_count,
                    kb.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        KbAction::Show { kb } => {
            let kb = resolve_kb(service, &kb)?;
            print_json(&kb)?;
        }
        KbAction::Update {
            kb,
            name,
            description,
        } => {
            let kb = resolve_kb(service, &kb)?;
            let updated = service.update_kb(&kb.id, name.as_deref(), description.as_deref())?;
            println!("✓ Updated knowledge base '{}'", updated.name);
        }
        KbAction::Configure(args) => cmd_configure(service, args)?,
        KbAction::Delete { kb } => {
            let kb = resolve_kb(service, &kb)?;
            if service.delete_kb(&kb.id)? {
                println!("✓ Deleted knowledge base '{}'", kb.name);
            }
        }
        KbAction::Stats { kb, json } => {
            let kb = resolve_kb(service, &kb)?;
            let stats = service.stats(&kb.id)?;
            if json {
                return print_json(&stats);
            }
            println!("Knowledge base: {} ({})", stats.name, stats.kb_id);
            println!("  Files: {}", stats.file_count);
            println!("  Total size: {}", format_size(stats.total_size));
            println!("  Chunks: {}", stats.total_chunks);
            println!("  Indexed passages: {}", stats.indexed_passages);
            println!("  Model: {}", stats.indexed_model);
            println!("  Searchable: {}", if stats.searchable { "yes" } else { "no" });
            if stats.reindexing {
                println!("  Reindex in progress");
            }
            for (file_type, count) in &stats.file_types {
                println!("  {}: {}", file_type, count);
            }
        }
    }
    Ok(())
}

fn cmd_configure(service: &KnowledgeBaseService, args: ConfigureArgs) -> Result<()> {
    let kb = resolve_kb(service, &args.kb)?;
    let update = KnowledgeBaseConfigUpdate {
        embedding_model: args.model,
        chunk_size: args.chunk_size,
        chunk_overlap: args.chunk_overlap,
        overlap_enabled: args.overlap,
        hybrid_search: args.hybrid,
        hybrid_alpha: args.alpha,
        bm25_k1: args.k1,
        bm25_b: args.b,
    };
    if update.is_empty() {
        println!("Nothing to change");
        return Ok(());
    }

    let result = service.configure_kb(&kb.id, &update)?;
    println!("✓ Updated settings of '{}'", result.knowledge_base.name);
    if result.reindex_required {
        println!(
            "  Run 'kbindex reindex {}' to apply the new settings to existing documents",
            result.knowledge_base.name
        );
    }
    Ok(())
}

fn cmd_add(service: &KnowledgeBaseService, kb: &str, files: &[PathBuf]) -> Result<()> {
    let kb = resolve_kb(service, kb)?;
    let mut failed = 0;

    for file in files {
        match service.add_file(&kb.id, file, None) {
            Ok(doc) => println!(
                "✓ {} ({}, {} chunks) -> {}",
                doc.filename,
                format_size(doc.file_size),
                doc.chunk_count,
                doc.id
            ),
            Err(e) => {
                failed += 1;
                eprintln!("✗ {}: {}", file.display(), e);
            }
        }
    }

    if failed > 0 {
        return Err(KbError::InvalidInput(format!(
            "{} of {} files failed",
            failed,
            files.len()
        )));
    }
    Ok(())
}

fn cmd_docs(service: &KnowledgeBaseService, kb: &str, json: bool) -> Result<()> {
    let kb = resolve_kb(service, kb)?;
    let docs = service.list_documents(&kb.id)?;
    if json {
        return print_json(&docs);
    }
    if docs.is_empty() {
        println!("No documents in '{}'", kb.name);
    }
    for doc in docs {
        println!(
            "{}  {}  {}  {}  {} chunks  {}",
            doc.id,
            doc.filename,
            doc.file_type,
            format_size(doc.file_size),
            doc.chunk_count,
            doc.processed_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn cmd_search(
    service: &KnowledgeBaseService,
    kb: &str,
    query: &str,
    limit: Option<usize>,
    override_hybrid: Option<bool>,
    json: bool,
) -> Result<()> {
    let kb = resolve_kb(service, kb)?;
    let response = service.search(&kb.id, query, limit, override_hybrid)?;
    if json {
        return print_json(&response);
    }

    println!(
        "{} results for '{}' ({} search)",
        response.total_results, response.query, response.search_type
    );
    for (i, result) in response.results.iter().enumerate() {
        let mut scores = format!("similarity {:.3}", result.similarity_score);
        if let (Some(bm25), Some(hybrid)) = (result.bm25_score, result.hybrid_score) {
            scores.push_str(&format!(", bm25 {:.3}, hybrid {:.3}", bm25, hybrid));
        }
        println!(
            "\n{}. {} [chunk {}] {}",
            i + 1,
            result.filename,
            result.chunk_index,
            scores
        );
        println!("   {}", preview(&result.content, 240));
    }
    Ok(())
}

async fn run_reindex(service: &KnowledgeBaseService, kb: &KnowledgeBase) -> Result<()> {
    let ReindexHandle { status, task } = service.start_reindex(&kb.id)?;
    let Some(mut task) = task else {
        println!("Reindex of '{}' is already running", kb.name);
        print_progress(&status);
        return Ok(());
    };

    println!(
        "Reindexing '{}' ({} documents). Press Ctrl-C to cancel.",
        kb.name, status.total_documents
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut cancel_requested = false;
    let status = loop {
        tokio::select! {
            joined = &mut task => {
                break joined.map_err(|e| {
                    KbError::Other(anyhow::anyhow!("reindex task failed: {}", e))
                })?;
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if service.cancel_reindex(&kb.id) {
                    println!("Cancelling after the current document...");
                } else {
                    println!("Swap already started; waiting for it to finish");
                }
            }
            _ = ticker.tick() => print_progress(&service.reindex_progress(&kb.id)),
        }
    };

    match status.state {
        ReindexState::Completed => {
            println!(
                "✓ Reindex completed: {}/{} documents, {} passages",
                status.successful_documents, status.total_documents, status.passages_indexed
            );
            if status.failed_documents > 0 {
                println!("  {} documents failed", status.failed_documents);
            }
            Ok(())
        }
        ReindexState::Cancelled => {
            println!(
                "Reindex cancelled after {} documents; the previous index is unchanged",
                status.processed_documents
            );
            Ok(())
        }
        _ => Err(KbError::Other(anyhow::anyhow!(
            "reindex failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        ))),
    }
}

fn print_progress(status: &ReindexStatus) {
    match &status.current_file {
        Some(file) => println!(
            "  {:>5.1}%  {}/{}  {} ({:.0}%)",
            status.percentage,
            status.processed_documents,
            status.total_documents,
            file,
            status.current_file_progress
        ),
        None => println!(
            "  {:>5.1}%  {}/{}",
            status.percentage, status.processed_documents, status.total_documents
        ),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
