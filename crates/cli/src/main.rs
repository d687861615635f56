//! Guild CLI
//!
//! Runs the role pipeline from the terminal: live progress on stdout,
//! Ctrl-C cancels the session, finished sessions go to the SQLite archive.
//! `--serve` and `guild serve` preview a finished package on localhost.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use guild_core::archive::SessionArchive;
use guild_core::config::{ConfigOverrides, PipelineConfig, DEFAULT_CONFIG_PATH};
use guild_core::deploy::preview::render_tree;
use guild_core::deploy::{PackagedOutput, PreviewHost, PreviewUrl};
use guild_core::models::LlmProvider;
use guild_core::pipeline::{Orchestrator, ProgressEvent, ProgressKind, ProjectRequest, Session};
use guild_core::roles::Roster;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Guild - a research-grounded role pipeline that turns a request into a project")]
struct Args {
    /// Config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the pipeline on a project request
    Run {
        /// What to build, e.g. "todo list"
        request: String,
        #[command(flatten)]
        overrides: RunOverrides,
        /// Serve the package on localhost when the session completes
        #[arg(long)]
        serve: bool,
        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// Continue a failed session from where it stopped
    Resume {
        /// Session id or unique prefix
        session: String,
        #[command(flatten)]
        overrides: RunOverrides,
        /// Serve the package on localhost when the session completes
        #[arg(long)]
        serve: bool,
        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// Serve an archived session's package on localhost
    Serve {
        /// Session id or unique prefix
        session: String,
        #[command(flatten)]
        browser: BrowserArgs,
    },
    /// List archived sessions
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show an archived session with its activity log
    Show {
        /// Session id or unique prefix
        session: String,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the roles in pipeline order
    Roles,
}

#[derive(clap::Args, Default)]
struct RunOverrides {
    #[arg(long)]
    project_type: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// openai, openrouter, deepseek or grok
    #[arg(long)]
    provider: Option<LlmProvider>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    base_url: Option<String>,
    /// serper, searxng or none
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    searxng_url: Option<String>,
    /// Per-stage time limit in seconds
    #[arg(long)]
    stage_timeout: Option<u64>,
    /// Do not write the session to the archive
    #[arg(long)]
    no_archive: bool,
}

#[derive(clap::Args, Default)]
struct BrowserArgs {
    /// Preview port, defaults to preview_port in the config
    #[arg(long)]
    port: Option<u16>,
    /// Print the preview URL without opening a browser
    #[arg(long)]
    no_browser: bool,
}

impl RunOverrides {
    fn apply(&self, config: &mut PipelineConfig) {
        config.merge(ConfigOverrides {
            project_type: self.project_type.clone(),
            output_dir: self.output_dir.clone(),
            global_provider: self.provider.clone(),
            global_model: self.model.clone(),
            base_url: self.base_url.clone(),
            search_provider: self.search.clone(),
            searxng_url: self.searxng_url.clone(),
            default_stage_timeout_secs: self.stage_timeout,
        });
        if self.no_archive {
            config.archive_path = None;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("guild=info,guild_core=info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::load(&args.config).await?;

    match args.command {
        CliCommand::Run {
            request,
            overrides,
            serve,
            browser,
        } => {
            overrides.apply(&mut config);
            let request = ProjectRequest::new(request)?;
            let session = run_session(&config, |orchestrator, cancel| async move {
                Ok(orchestrator.run_with_cancellation(request, cancel).await)
            })
            .await?;
            finish(&config, &session, serve, &browser).await?;
        }
        CliCommand::Resume {
            session,
            overrides,
            serve,
            browser,
        } => {
            overrides.apply(&mut config);
            let previous = load_archived(&config, &session)?;
            println!("Resuming {} ({})", previous.id.short(), previous.request);
            let session = run_session(&config, |orchestrator, cancel| async move {
                Ok(orchestrator.resume(&previous, cancel).await?)
            })
            .await?;
            finish(&config, &session, serve, &browser).await?;
        }
        CliCommand::Serve { session, browser } => {
            let stored = load_archived(&config, &session)?;
            let package = stored.package().with_context(|| {
                format!("Session {} has no package (it is {})", stored.id.short(), stored.state.label())
            })?;
            if !package.root.is_dir() {
                bail!("Package directory {} no longer exists", package.root.display());
            }
            print_tree(package);
            preview(&config, package, &browser).await?;
        }
        CliCommand::History { limit } => {
            let archive = open_archive(&config)?;
            let sessions = archive.list_sessions(limit)?;
            if sessions.is_empty() {
                println!("No archived sessions");
            }
            for s in sessions {
                let outcome = match (&s.package_ref, &s.failed_at, &s.failure_kind) {
                    (Some(package), _, _) => package.clone(),
                    (None, Some(at), Some(kind)) => format!("{} at {}", kind, at),
                    _ => String::new(),
                };
                println!(
                    "{}  {}  {:<10} {:<40} {}",
                    s.id.short(),
                    s.created_at.format("%Y-%m-%d %H:%M"),
                    s.state,
                    truncate(&s.request, 40),
                    outcome
                );
            }
        }
        CliCommand::Show { session, json } => {
            let archive = open_archive(&config)?;
            let id = archive
                .resolve_id(&session)?
                .with_context(|| format!("No archived session matches '{}'", session))?;
            let summary = archive
                .summarize(id)?
                .with_context(|| format!("Session {} vanished from the archive", id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary.render());
                println!();
                for entry in &summary.entries {
                    println!(
                        "#{:<5} {}  {:<16} {:<17} {}",
                        entry.sequence,
                        entry.timestamp.format("%H:%M:%S%.3f"),
                        entry.role.as_str(),
                        entry.kind.as_str(),
                        entry.detail
                    );
                }
            }
        }
        CliCommand::Roles => {
            let roster = Roster::from_config(&config)?;
            for (i, spec) in roster.stages().iter().enumerate() {
                let requires: Vec<&str> = spec.requires.iter().map(|r| r.as_str()).collect();
                println!(
                    "{}. {:<16} {:<18} timeout {}s, {} queries{}",
                    i + 1,
                    spec.role.as_str(),
                    spec.title,
                    spec.timeout.as_secs(),
                    spec.queries.len(),
                    if requires.is_empty() {
                        String::new()
                    } else {
                        format!(", reads {}", requires.join(", "))
                    }
                );
            }
        }
    }

    Ok(())
}

/// Build the orchestrator, stream progress, cancel on Ctrl-C, archive and
/// print the summary.
async fn run_session<F, Fut>(config: &PipelineConfig, start: F) -> Result<Session>
where
    F: FnOnce(Orchestrator, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<Session>>,
{
    let (event_tx, mut event_rx) = mpsc::channel::<ProgressEvent>(256);
    let orchestrator = Orchestrator::from_config(config)?.with_event_channel(event_tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_progress(&event);
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            ctrl_c.cancel();
        }
    });

    let outcome = start(orchestrator.clone(), cancel).await;
    watcher.abort();
    let session = outcome?;
    let mut summary = orchestrator.summarize(&session);
    let entries = orchestrator.log().entries_for(session.id);

    // Dropping the last sender ends the printer loop
    drop(orchestrator);
    let _ = printer.await;

    if let Some(path) = &config.archive_path {
        let archive = SessionArchive::open_at(path)?;
        archive.save(&session, &entries)?;
        tracing::info!(path = %path.display(), "Session archived");
        // Carried results of a resumed session are counted from their origin's archived entries
        if let Some(archived) = archive.summarize(session.id)? {
            summary = archived;
        }
    }

    println!();
    print!("{}", summary.render());
    if let Some(package) = session.package() {
        println!();
        print_tree(package);
    }
    Ok(session)
}

/// Exit non-zero for a failed session, otherwise preview when asked
async fn finish(config: &PipelineConfig, session: &Session, serve: bool, browser: &BrowserArgs) -> Result<()> {
    let Some(package) = session.package() else {
        std::process::exit(1);
    };
    if serve {
        preview(config, package, browser).await?;
    }
    Ok(())
}

/// Serve the package, open the entrypoint and block until Ctrl-C
async fn preview(config: &PipelineConfig, package: &PackagedOutput, browser: &BrowserArgs) -> Result<()> {
    let mut host = PreviewHost::new();
    let url = host.present(package, browser.port.unwrap_or(config.preview_port)).await?;
    match &url {
        PreviewUrl::Http(url) => println!("🌐 Serving {} at {}", package.root.display(), url),
        PreviewUrl::File { url, reason } => {
            println!("⚠ {}", reason);
            println!("📄 Opening {} directly; module scripts may not load from file://", url);
        }
    }

    if !browser.no_browser {
        if let Err(e) = open::that(url.as_str()) {
            tracing::warn!(error = %e, "Could not open a browser");
            println!("Open {} in your browser", url.as_str());
        }
    }

    if host.current().is_some() {
        println!("Press Ctrl-C to stop the preview");
        tokio::signal::ctrl_c().await?;
        host.stop().await;
    }
    Ok(())
}

fn print_tree(package: &PackagedOutput) {
    println!("Package files:");
    print!("{}", render_tree(&package.root));
}

fn print_progress(event: &ProgressEvent) {
    match &event.kind {
        ProgressKind::StageStarted { role } => println!("▶ {}", role),
        ProgressKind::SearchStarted { role, query } => println!("  {} 🔎 {}", role, query),
        ProgressKind::SearchCompleted {
            role,
            query,
            result_count,
        } => println!("  {} ✓ {} ({} results)", role, query, result_count),
        ProgressKind::SearchFailed {
            role,
            query,
            error_kind,
        } => println!("  {} ✗ {} ({})", role, query, error_kind),
        ProgressKind::StageCompleted { role } => println!("✅ {}", role),
        ProgressKind::StageFailed { role, error_kind } => println!("❌ {} ({})", role, error_kind),
        ProgressKind::SessionCompleted { package_ref } => println!("🚀 Package ready: {}", package_ref),
        ProgressKind::SessionFailed { reason, .. } => println!("❌ Session failed: {}", reason),
    }
}

fn open_archive(config: &PipelineConfig) -> Result<SessionArchive> {
    match &config.archive_path {
        Some(path) => SessionArchive::open_at(path),
        None => bail!("Archiving is disabled in {}", DEFAULT_CONFIG_PATH),
    }
}

fn load_archived(config: &PipelineConfig, prefix: &str) -> Result<Session> {
    let archive = open_archive(config)?;
    let id = archive
        .resolve_id(prefix)?
        .with_context(|| format!("No archived session matches '{}'", prefix))?;
    archive
        .load_session(id)?
        .with_context(|| format!("Session {} vanished from the archive", id))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_width() {
        assert_eq!(truncate("todo list", 40), "todo list");
        assert_eq!(truncate("a weather dashboard", 8), "a weath…");
        assert_eq!(truncate("héllo wörld", 6).chars().count(), 6);
    }

    #[test]
    fn test_truncate_to_zero_does_not_underflow() {
        assert_eq!(truncate("todo", 0), "…");
        assert_eq!(truncate("", 0), "");
    }

    #[test]
    fn test_serve_flags_parse() {
        let args = Args::try_parse_from(["guild", "run", "todo list", "--serve", "--port", "9100", "--no-browser"]).unwrap();
        match args.command {
            CliCommand::Run {
                request, serve, browser, ..
            } => {
                assert_eq!(request, "todo list");
                assert!(serve);
                assert_eq!(browser.port, Some(9100));
                assert!(browser.no_browser);
            }
            _ => panic!("expected run"),
        }

        let args = Args::try_parse_from(["guild", "serve", "3fa8"]).unwrap();
        assert!(matches!(args.command, CliCommand::Serve { ref session, ref browser } if session == "3fa8" && browser.port.is_none()));
    }
}
