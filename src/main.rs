use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ragex_core::bootstrap::{self, AppContext};
use ragex_core::config::Config;
use ragex_gateway::GatewayServer;
use ragex_index::{CodeStore, IndexMetadata, IndexReport, RepoSource};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

/// Ask questions about a codebase: chunk it, embed it into Qdrant, and answer
/// from the most relevant code.
#[derive(Debug, Parser)]
#[command(name = "ragex", version, about)]
struct Cli {
    /// Path to the TOML config file. Falls back to `RAGEX_CONFIG`, then
    /// `config/default.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rebuild the collection from the given repositories (or `index.repos`).
    Index {
        /// Repository roots. The directory name becomes the repo label.
        repos: Vec<PathBuf>,
    },
    /// Answer one question, or start an interactive session when none is given.
    Ask {
        question: Option<String>,
        /// Chunks of context to retrieve.
        #[arg(long)]
        k: Option<usize>,
        /// Only search this repository.
        #[arg(long)]
        repo: Option<String>,
    },
    /// Serve the Ollama-compatible HTTP API until Ctrl-C.
    Serve,
    /// Show the last indexing run and live collection stats.
    Status,
}

#[derive(Debug, PartialEq, Eq)]
enum LineCommand<'a> {
    Quit,
    Help,
    Skip,
    Question(&'a str),
}

fn parse_line(line: &str) -> LineCommand<'_> {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "" => LineCommand::Skip,
        "quit" | "exit" | "q" => LineCommand::Quit,
        "help" => LineCommand::Help,
        _ => LineCommand::Question(line),
    }
}

const HELP_TEXT: &str = "\
Ask anything about the indexed code, for example:
  How does user authentication work?
  Where are payments processed?
  What does the Accounts context expose?
Type quit, exit, or q to leave.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = bootstrap::resolve_config_path(cli.config.as_deref());
    let config = bootstrap::load_config(&config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    tracing::debug!(path = %config_path.display(), "config loaded");

    match cli.command {
        Command::Index { repos } => run_index(config, repos).await,
        Command::Ask { question, k, repo } => run_ask(config, question, k, repo).await,
        Command::Serve => run_serve(config).await,
        Command::Status => run_status(&config).await,
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn run_index(config: Config, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    let repos: Vec<RepoSource> = if paths.is_empty() {
        config.index.repos.clone()
    } else {
        paths.into_iter().map(RepoSource::from_path).collect()
    };
    if repos.is_empty() {
        bail!("no repositories given; pass paths or set index.repos");
    }

    let ctx = AppContext::build(config).await?;
    let report = ctx.index(&repos).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &IndexReport) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = write_report(&mut stdout, report) {
        tracing::warn!(error = %e, "failed to print index report");
    }
}

fn write_report(out: &mut impl std::io::Write, report: &IndexReport) -> std::io::Result<()> {
    writeln!(out, "Indexed repositories: {}", report.repos.join(", "))?;
    writeln!(out, "  files scanned:  {}", report.files_scanned)?;
    writeln!(out, "  chunks created: {}", report.chunks_created)?;
    writeln!(out, "  embedding dim:  {}", report.embedding_dim)?;
    #[allow(clippy::cast_precision_loss)]
    let secs = report.duration_ms as f64 / 1000.0;
    writeln!(out, "  duration:       {secs:.1}s")?;
    if !report.errors.is_empty() {
        writeln!(out, "  skipped files:  {}", report.errors.len())?;
        for failure in &report.errors {
            writeln!(out, "    {}: {}", failure.file, failure.error)?;
        }
    }
    Ok(())
}

async fn run_ask(
    config: Config,
    question: Option<String>,
    k: Option<usize>,
    repo: Option<String>,
) -> anyhow::Result<()> {
    let k = k.unwrap_or(config.retrieval.k).max(1);
    let ctx = AppContext::build(config).await?;

    if let Some(question) = question {
        let answer = ctx.engine().query(&question, k, repo.as_deref()).await?;
        println!("{answer}");
        return Ok(());
    }

    let mut stdout = tokio::io::stdout();
    let banner = format!(
        "ragex v{}. Type help for examples.\n",
        env!("CARGO_PKG_VERSION")
    );
    stdout.write_all(banner.as_bytes()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_line(&line) {
            LineCommand::Quit => break,
            LineCommand::Skip => {}
            LineCommand::Help => {
                stdout.write_all(HELP_TEXT.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
            LineCommand::Question(q) => {
                match ctx.engine().query(q, k, repo.as_deref()).await {
                    Ok(answer) => stdout.write_all(format!("\n{answer}\n").as_bytes()).await?,
                    Err(e) => {
                        tracing::warn!(error = %e, "query failed");
                        stdout.write_all(format!("Error: {e}\n").as_bytes()).await?;
                    }
                }
            }
        }
    }
    stdout.write_all(b"Goodbye.\n").await?;
    stdout.flush().await?;
    Ok(())
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let ctx = AppContext::build(config).await?;
    let gw = &ctx.config().gateway;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    GatewayServer::new(&gw.bind, gw.port, ctx.service(), shutdown_rx)
        .with_auth(gw.auth_token.clone())
        .with_rate_limit(gw.rate_limit)
        .with_max_body_size(gw.max_body_size)
        .with_model_name(ctx.config().advertised_model())
        .with_default_k(ctx.config().retrieval.k)
        .serve()
        .await?;
    Ok(())
}

async fn run_status(config: &Config) -> anyhow::Result<()> {
    match IndexMetadata::load(&config.index.metadata_path).await? {
        Some(meta) => {
            println!("Last indexing run ({}):", config.index.metadata_path.display());
            println!("  repos:       {}", meta.repos.join(", "));
            println!("  chunks:      {}", meta.total_chunks);
            println!("  dimension:   {}", meta.embedding_dim);
            println!("  collection:  {}", meta.collection_name);
            println!("  indexed at:  {}", meta.indexed_at);
        }
        None => println!(
            "No indexing metadata at {}",
            config.index.metadata_path.display()
        ),
    }

    let store = CodeStore::new(
        bootstrap::create_vector_store(config)?,
        config.store.collection.clone(),
    );
    match store.stats().await {
        Ok(stats) => {
            println!("Collection {}:", store.collection());
            println!("  points:      {}", stats.total_points);
            println!("  vector dim:  {}", stats.vector_dim);
            println!("  distance:    {}", stats.distance);
        }
        Err(e) => println!("Collection {} unavailable: {e}", store.collection()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_with_options() {
        let cli = Cli::try_parse_from([
            "ragex",
            "--config",
            "ragex.toml",
            "ask",
            "How does login work?",
            "--k",
            "3",
            "--repo",
            "web",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ragex.toml")));
        match cli.command {
            Command::Ask { question, k, repo } => {
                assert_eq!(question.as_deref(), Some("How does login work?"));
                assert_eq!(k, Some(3));
                assert_eq!(repo.as_deref(), Some("web"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_index_with_many_repos() {
        let cli = Cli::try_parse_from(["ragex", "index", "/src/api", "/src/web"]).unwrap();
        match cli.command {
            Command::Index { repos } => assert_eq!(repos.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ask_without_question_is_interactive() {
        let cli = Cli::try_parse_from(["ragex", "ask"]).unwrap();
        assert!(matches!(cli.command, Command::Ask { question: None, .. }));
    }

    #[test]
    fn interactive_line_commands() {
        assert_eq!(parse_line("  quit "), LineCommand::Quit);
        assert_eq!(parse_line("EXIT"), LineCommand::Quit);
        assert_eq!(parse_line("q"), LineCommand::Quit);
        assert_eq!(parse_line("help"), LineCommand::Help);
        assert_eq!(parse_line("   "), LineCommand::Skip);
        assert_eq!(
            parse_line(" Where is billing? "),
            LineCommand::Question("Where is billing?")
        );
    }

    #[test]
    fn report_lists_skipped_files() {
        let report = IndexReport {
            repos: vec!["app".into(), "web".into()],
            files_scanned: 2,
            chunks_created: 1,
            embedding_dim: 768,
            errors: vec![ragex_index::chunker::FileFailure {
                file: "lib/bad.ex".into(),
                error: "invalid UTF-8".into(),
            }],
            duration_ms: 1500,
        };
        let mut out = Vec::new();
        write_report(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Indexed repositories: app, web\n"));
        assert!(text.contains("  chunks created: 1\n"));
        assert!(text.contains("  duration:       1.5s\n"));
        assert!(text.contains("  skipped files:  1\n    lib/bad.ex: invalid UTF-8\n"));
    }

    #[test]
    fn report_omits_skipped_section_when_clean() {
        let report = IndexReport {
            repos: vec!["app".into()],
            files_scanned: 1,
            chunks_created: 3,
            embedding_dim: 768,
            errors: Vec::new(),
            duration_ms: 2000,
        };
        let mut out = Vec::new();
        write_report(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains("skipped files"));
        assert!(text.ends_with("  duration:       2.0s\n"));
    }
}
