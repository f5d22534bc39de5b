//! # ClauseWatch CLI (`cw`)
//!
//! Upload tender documents into repositories and ask a chat model to flag
//! conflicting clauses.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cw init` | Create the databases and run schema migrations |
//! | `cw status` | Show install date, version, and storage counts |
//! | `cw repo create --name N <files…>` | Create a repository from local files |
//! | `cw repo list` | List repositories, newest first |
//! | `cw repo files <id>` | List the files of a repository |
//! | `cw repo delete <ids…> --yes` | Delete repositories and their files |
//! | `cw analyse <id>` | Scan the selected files for conflicting clauses |
//! | `cw check <id> --clause TEXT` | Check one clause against the selected files |
//! | `cw serve` | Start the JSON HTTP API |
//!
//! Repository and analysis commands go through the same login flow as the
//! HTTP API: pass `--accept-disclaimer` and the shared password
//! (`--password` or `PASSWORD_TO_ENTER`).
//!
//! ## Examples
//!
//! ```bash
//! cw init --config ./config/clausewatch.toml
//! cw --accept-disclaimer repo create --name TenderA ./tender.pdf ./annex.docx
//! cw --accept-disclaimer analyse 2b0c…  --file 1 --file 2
//! cw --accept-disclaimer check 2b0c… --clause "Payment is due within 30 days."
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use clausewatch::analyse::{AnalysisScope, Outcome};
use clausewatch::config;
use clausewatch::dispatch::{App, Command, View};
use clausewatch::migrate;
use clausewatch::progress::{AnalysisReporter, Fanout, NoProgress, ProgressMode, StdoutResults};
use clausewatch::server;
use clausewatch::session::{Page, Session};
use clausewatch::status;
use clausewatch::upload::Upload;

/// ClauseWatch: find conflicting clauses in tender documents.
#[derive(Parser)]
#[command(
    name = "cw",
    about = "ClauseWatch: find conflicting clauses in tender documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/clausewatch.toml")]
    config: PathBuf,

    /// Shared password for the login gate.
    #[arg(long, global = true, env = "PASSWORD_TO_ENTER", hide_env_values = true)]
    password: Option<String>,

    /// Acknowledge the disclaimer (required before signing in).
    #[arg(long, global = true)]
    accept_disclaimer: bool,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Show install date, version, and storage counts.
    Status,

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,

    /// Manage repositories.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Scan files for clauses that conflict with each other.
    ///
    /// Without `--file`, every file in the repository is analysed.
    Analyse {
        repository_id: String,

        /// File id to analyse (repeatable, processed in the given order).
        #[arg(long = "file")]
        files: Vec<i64>,

        /// Analyse all selected files together in one index.
        #[arg(long)]
        combined: bool,
    },

    /// Check a single clause against the files of a repository.
    Check {
        repository_id: String,

        /// The clause to check.
        #[arg(long)]
        clause: String,

        #[arg(long = "file")]
        files: Vec<i64>,

        #[arg(long)]
        combined: bool,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// Create a repository from `.docx`, `.pdf`, and `.txt` files.
    Create {
        #[arg(long)]
        name: String,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List repositories, newest first.
    List,
    /// List the files of one repository.
    Files { repository_id: String },
    /// Delete repositories and all of their files.
    Delete {
        #[arg(required = true)]
        repository_ids: Vec<String>,

        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clausewatch=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Status => {
            let app = App::open(cfg).await?;
            let status = status::collect(app.store().pool()).await?;
            status::print_status(app.config(), &status);
        }
        Commands::Serve => {
            let app = App::open(cfg).await?;
            server::run_server(app).await?;
        }
        Commands::Repo { action } => {
            let app = App::open(cfg).await?;
            let session = sign_in(&app, cli.password.as_deref(), cli.accept_disclaimer).await?;
            let command = match action {
                RepoAction::Create { name, paths } => Command::CreateRepository {
                    name,
                    files: read_uploads(&paths)?,
                },
                RepoAction::List => Command::ListRepositories,
                RepoAction::Files { repository_id } => Command::ListFiles { repository_id },
                RepoAction::Delete {
                    repository_ids,
                    yes,
                } => Command::DeleteRepositories {
                    repository_ids,
                    confirm: yes,
                },
            };
            run(&app, session, command, &NoProgress).await?;
        }
        Commands::Analyse {
            repository_id,
            files,
            combined,
        } => {
            let app = App::open(cfg).await?;
            let session = sign_in(&app, cli.password.as_deref(), cli.accept_disclaimer).await?;
            let session = select(&app, session, repository_id, files).await?;
            let reporter = reporter(cli.progress);
            run(
                &app,
                session,
                Command::AnalyseFiles {
                    scope: scope(combined),
                },
                &reporter,
            )
            .await?;
        }
        Commands::Check {
            repository_id,
            clause,
            files,
            combined,
        } => {
            let app = App::open(cfg).await?;
            let session = sign_in(&app, cli.password.as_deref(), cli.accept_disclaimer).await?;
            let session = select(&app, session, repository_id, files).await?;
            let reporter = reporter(cli.progress);
            run(
                &app,
                session,
                Command::CheckClause {
                    clause,
                    scope: scope(combined),
                },
                &reporter,
            )
            .await?;
        }
    }

    Ok(())
}

fn scope(combined: bool) -> AnalysisScope {
    if combined {
        AnalysisScope::Combined
    } else {
        AnalysisScope::PerFile
    }
}

fn reporter(mode: Option<ProgressMode>) -> Fanout {
    let mode = mode.unwrap_or_else(ProgressMode::default_for_tty);
    Fanout(vec![mode.reporter(), Box::new(StdoutResults)])
}

fn read_uploads(paths: &[PathBuf]) -> Result<Vec<Upload>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Upload::from_bytes(name, &bytes))
        })
        .collect()
}

/// Acknowledge the disclaimer (if asked to) and log in.
async fn sign_in(app: &App, password: Option<&str>, accept_disclaimer: bool) -> Result<Session> {
    let mut session = Session::default();
    if accept_disclaimer {
        session = app
            .dispatch(session, Command::AcknowledgeDisclaimer, &NoProgress)
            .await
            .session;
    }
    let login = Command::Login {
        password: password.unwrap_or_default().to_string(),
    };
    let result = app.dispatch(session, login, &NoProgress).await;
    if result.session.authenticated {
        return Ok(result.session);
    }
    if let View::Login {
        disclaimer,
        disclaimer_acknowledged: false,
        ..
    } = &result.view
    {
        eprintln!("{}\n", disclaimer);
        bail!("Pass --accept-disclaimer to acknowledge the disclaimer above.");
    }
    match result.view {
        View::Login {
            message: Some(message),
            ..
        } => bail!("{}", message),
        _ => bail!("Login failed."),
    }
}

/// Select a repository and files, defaulting to all of its files.
async fn select(app: &App, session: Session, repository_id: String, files: Vec<i64>) -> Result<Session> {
    let result = app
        .dispatch(session, Command::SelectRepository { repository_id }, &NoProgress)
        .await;
    let file_ids = match (&result.view, files.is_empty()) {
        (View::Files { files: available, .. }, true) => available.iter().map(|f| f.id).collect(),
        (View::Files { .. }, false) => files,
        (View::Alert(alert), _) => bail!("{}", alert.message),
        _ => bail!("Unexpected response while selecting the repository."),
    };
    let result = app
        .dispatch(result.session, Command::SelectFiles { file_ids }, &NoProgress)
        .await;
    if let View::Alert(alert) = &result.view {
        bail!("{}", alert.message);
    }
    Ok(result.session)
}

async fn run(
    app: &App,
    session: Session,
    command: Command,
    reporter: &dyn AnalysisReporter,
) -> Result<Session> {
    let result = app.dispatch(session, command, reporter).await;
    if let View::Alert(alert) = &result.view {
        bail!("{}", alert.message);
    }
    render(&result.view);
    Ok(result.session)
}

fn render(view: &View) {
    match view {
        View::Login {
            disclaimer,
            message,
            ..
        } => {
            println!("{}", disclaimer);
            if let Some(message) = message {
                println!("\n{}", message);
            }
        }
        View::Page {
            page,
            title,
            body,
            since,
            version,
        } => {
            println!("{}\n", title);
            println!("{}\n", body);
            if *page == Page::Home {
                if let Some(since) = since {
                    println!("Since {} | v{}", since, version);
                }
            }
        }
        View::RepositorySetup {
            max_files,
            max_name_chars,
        } => {
            println!(
                "Upload up to {} .docx, .pdf, or .txt files under a name of at most {} characters.",
                max_files, max_name_chars
            );
        }
        View::Repositories { rows } | View::RepositoriesDeleted { rows, .. } => {
            if let View::RepositoriesDeleted { deleted, .. } = view {
                println!("Deleted {} repository(ies).\n", deleted);
            }
            if rows.is_empty() {
                println!("No repositories.");
                return;
            }
            for row in rows {
                println!(
                    "{}  {}  {}  {} file(s): {}",
                    row.id,
                    status::format_date(row.created_at),
                    row.name,
                    row.file_count,
                    row.file_names
                );
            }
        }
        View::Files {
            repository,
            files,
            selected,
        } => {
            println!("{} ({})\n", repository.name, repository.id);
            for file in files {
                let mark = if selected.contains(&file.id) { "*" } else { " " };
                println!(
                    "{} {:>5}  {}  {}  {}",
                    mark,
                    file.id,
                    file.name,
                    file.mime_type,
                    status::format_bytes(file.size.max(0) as u64)
                );
            }
        }
        View::RepositoryCreated {
            repository,
            file_count,
            warnings,
        } => {
            for warning in warnings {
                eprintln!("Warning: {}", warning);
            }
            println!(
                "Repository '{}' created with {} file(s).",
                repository.name, file_count
            );
            println!("  id: {}", repository.id);
        }
        View::Analysis { report } => {
            let failed = report
                .results
                .iter()
                .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
                .count();
            if let Some(reason) = &report.aborted {
                eprintln!("Analysis stopped early: {}", reason);
            }
            if failed > 0 {
                eprintln!("{} of {} result(s) failed.", failed, report.results.len());
            }
        }
        View::SignedOut => println!("Signed out."),
        View::Alert(alert) => eprintln!("{}", alert.message),
    }
}
