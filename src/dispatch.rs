//! Command dispatcher.
//!
//! Every user action is a [`Command`]. [`App::dispatch`] takes the current
//! [`Session`], handles the command to completion, and returns the next
//! session together with an immutable [`View`]. The CLI and the HTTP server
//! both go through here, so the password gate and error classification are
//! the same on either surface.
//!
//! A failed command leaves the session exactly as it was and returns an
//! [`Alert`] instead of the requested view.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::analyse::{AnalysisMode, AnalysisReport, AnalysisRequest, AnalysisScope, Analyser};
use crate::auth::PasswordGate;
use crate::config::Config;
use crate::db;
use crate::error::{StateError, ValidationError};
use crate::migrate::migrate;
use crate::models::{FileMeta, Repository, RepositorySummary};
use crate::progress::AnalysisReporter;
use crate::repository::{BlobStore, MAX_NAME_CHARS};
use crate::session::{Page, RevokedLogins, Session};
use crate::status;
use crate::upload::{prepare_upload, Upload};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    AcknowledgeDisclaimer,
    Login {
        password: String,
    },
    SignOut,
    Navigate {
        page: Page,
    },
    CreateRepository {
        name: String,
        files: Vec<Upload>,
    },
    ListRepositories,
    ListFiles {
        repository_id: String,
    },
    DeleteRepositories {
        repository_ids: Vec<String>,
        #[serde(default)]
        confirm: bool,
    },
    /// Step 1 of the analyse page.
    SelectRepository {
        repository_id: String,
    },
    /// Step 2 of the analyse page.
    SelectFiles {
        file_ids: Vec<i64>,
    },
    AnalyseFiles {
        #[serde(default)]
        scope: AnalysisScope,
    },
    CheckClause {
        clause: String,
        #[serde(default)]
        scope: AnalysisScope,
    },
}

impl Command {
    fn allowed_before_login(&self) -> bool {
        matches!(
            self,
            Command::AcknowledgeDisclaimer | Command::Login { .. } | Command::SignOut
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    Login {
        title: String,
        disclaimer: String,
        disclaimer_acknowledged: bool,
        message: Option<String>,
    },
    Page {
        page: Page,
        title: String,
        body: String,
        since: Option<String>,
        version: String,
    },
    RepositorySetup {
        max_files: usize,
        max_name_chars: usize,
    },
    Repositories {
        rows: Vec<RepositorySummary>,
    },
    Files {
        repository: Repository,
        files: Vec<FileMeta>,
        selected: Vec<i64>,
    },
    RepositoryCreated {
        repository: Repository,
        file_count: usize,
        warnings: Vec<String>,
    },
    RepositoriesDeleted {
        deleted: usize,
        rows: Vec<RepositorySummary>,
    },
    Analysis {
        report: AnalysisReport,
    },
    SignedOut,
    Alert(Alert),
}

/// The next session and what to show.
#[derive(Debug)]
pub struct Dispatch {
    pub session: Session,
    pub view: View,
}

pub struct App {
    config: Arc<Config>,
    store: BlobStore,
    analyser: Analyser,
    gate: PasswordGate,
    revoked: RevokedLogins,
}

impl App {
    /// Connect to the configured database, run migrations, and wire up the
    /// analysis providers.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate(&pool).await?;
        let analyser = Analyser::from_config(&config).await?;
        let gate = PasswordGate::new(config.auth.password.as_deref());
        if !gate.is_configured() {
            tracing::warn!("no password configured; all logins will be refused");
        }
        Ok(Self::new(Arc::new(config), BlobStore::new(pool), analyser, gate))
    }

    pub fn new(config: Arc<Config>, store: BlobStore, analyser: Analyser, gate: PasswordGate) -> Self {
        let revoked = RevokedLogins::new(config.server.session_ttl_secs);
        Self {
            config,
            store,
            analyser,
            gate,
            revoked,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub async fn dispatch(
        &self,
        session: Session,
        command: Command,
        reporter: &dyn AnalysisReporter,
    ) -> Dispatch {
        let session = if session.authenticated && !self.is_signed_in(&session) {
            tracing::info!("session from a signed-out login; starting over");
            Session::default()
        } else {
            session
        };
        if !session.authenticated && !command.allowed_before_login() {
            let view = self.login_view(&session, None);
            return Dispatch { session, view };
        }

        let mut next = session.clone();
        match self.handle(&mut next, command, reporter).await {
            Ok(view) => Dispatch {
                session: next,
                view,
            },
            Err(e) => Dispatch {
                session,
                view: View::Alert(classify(e)),
            },
        }
    }

    async fn handle(
        &self,
        session: &mut Session,
        command: Command,
        reporter: &dyn AnalysisReporter,
    ) -> Result<View> {
        match command {
            Command::AcknowledgeDisclaimer => {
                session.disclaimer_acknowledged = true;
                Ok(self.login_view(session, None))
            }
            Command::Login { password } => {
                if session.authenticated {
                    return self.page_view(session, Page::Home).await;
                }
                if !session.disclaimer_acknowledged {
                    return Ok(self.login_view(
                        session,
                        Some("Please acknowledge the disclaimer before signing in."),
                    ));
                }
                if !self.gate.verify(&password) {
                    tracing::warn!("login failed");
                    return Ok(self.login_view(session, Some("Incorrect password.")));
                }
                tracing::info!("login succeeded");
                session.sign_in();
                self.page_view(session, Page::Home).await
            }
            Command::SignOut => {
                if let Some(login_id) = &session.login_id {
                    self.revoked.revoke(login_id);
                }
                *session = Session::default();
                Ok(View::SignedOut)
            }
            Command::Navigate { page } => self.page_view(session, page).await,
            Command::CreateRepository { name, files } => {
                let prepared = prepare_upload(&name, &files, self.config.upload.max_files)?;
                let repository = self.store.save(&prepared.name, &prepared.files).await?;
                Ok(View::RepositoryCreated {
                    repository,
                    file_count: prepared.files.len(),
                    warnings: prepared.warnings,
                })
            }
            Command::ListRepositories => Ok(View::Repositories {
                rows: self.store.list().await?,
            }),
            Command::ListFiles { repository_id } => {
                let (repository, files) = self.repository_with_files(&repository_id).await?;
                Ok(View::Files {
                    repository,
                    files,
                    selected: Vec::new(),
                })
            }
            Command::DeleteRepositories {
                repository_ids,
                confirm,
            } => {
                if repository_ids.is_empty() {
                    return Err(ValidationError::NoRepositoriesSelected.into());
                }
                if !confirm {
                    return Err(ValidationError::DeleteNotConfirmed.into());
                }
                let mut deleted = 0;
                for id in &repository_ids {
                    if self.store.delete(id).await? {
                        deleted += 1;
                    }
                    if session.repository_id.as_deref() == Some(id.as_str()) {
                        session.clear_selection();
                    }
                }
                Ok(View::RepositoriesDeleted {
                    deleted,
                    rows: self.store.list().await?,
                })
            }
            Command::SelectRepository { repository_id } => {
                let (repository, files) = self.repository_with_files(&repository_id).await?;
                session.page = Page::Analyse;
                session.repository_id = Some(repository.id.clone());
                session.file_ids.clear();
                Ok(View::Files {
                    repository,
                    files,
                    selected: Vec::new(),
                })
            }
            Command::SelectFiles { file_ids } => {
                let repository_id = session
                    .repository_id
                    .clone()
                    .ok_or(StateError::NoRepositorySelected)?;
                let (repository, files) = self.repository_with_files(&repository_id).await?;
                let mut selected: Vec<i64> = Vec::with_capacity(file_ids.len());
                for id in file_ids {
                    if !files.iter().any(|f| f.id == id) {
                        return Err(StateError::FileNotInRepository {
                            file_id: id,
                            repository_id,
                        }
                        .into());
                    }
                    if !selected.contains(&id) {
                        selected.push(id);
                    }
                }
                session.file_ids = selected.clone();
                Ok(View::Files {
                    repository,
                    files,
                    selected,
                })
            }
            Command::AnalyseFiles { scope } => {
                self.analyse(session, AnalysisMode::ConflictScan, scope, reporter)
                    .await
            }
            Command::CheckClause { clause, scope } => {
                self.analyse(session, AnalysisMode::ClauseCheck { clause }, scope, reporter)
                    .await
            }
        }
    }

    async fn analyse(
        &self,
        session: &Session,
        mode: AnalysisMode,
        scope: AnalysisScope,
        reporter: &dyn AnalysisReporter,
    ) -> Result<View> {
        let repository_id = session
            .repository_id
            .clone()
            .ok_or(StateError::NoRepositorySelected)?;
        let request = AnalysisRequest {
            repository_id,
            file_ids: session.file_ids.clone(),
            mode,
            scope,
        };
        let report = self.analyser.run(&self.store, &request, reporter).await?;
        Ok(View::Analysis { report })
    }

    async fn repository_with_files(&self, repository_id: &str) -> Result<(Repository, Vec<FileMeta>)> {
        let repository = self
            .store
            .get(repository_id)
            .await?
            .ok_or_else(|| StateError::RepositoryNotFound(repository_id.to_string()))?;
        let files = self.store.list_files(repository_id).await?;
        Ok((repository, files))
    }

    async fn page_view(&self, session: &mut Session, page: Page) -> Result<View> {
        session.page = page;
        let content = &self.config.content;
        let body = match page {
            Page::RepositorySetup => {
                return Ok(View::RepositorySetup {
                    max_files: self.config.upload.max_files,
                    max_name_chars: MAX_NAME_CHARS,
                })
            }
            Page::RepositoryManage => {
                return Ok(View::Repositories {
                    rows: self.store.list().await?,
                })
            }
            Page::Analyse => match session.repository_id.clone() {
                Some(id) => match self.repository_with_files(&id).await {
                    Ok((repository, files)) => {
                        return Ok(View::Files {
                            repository,
                            files,
                            selected: session.file_ids.clone(),
                        })
                    }
                    // The selected repository was deleted elsewhere.
                    Err(e) if is_missing_repository(&e) => {
                        session.clear_selection();
                        return Ok(View::Repositories {
                            rows: self.store.list().await?,
                        });
                    }
                    Err(e) => return Err(e),
                },
                None => {
                    return Ok(View::Repositories {
                        rows: self.store.list().await?,
                    })
                }
            },
            Page::Home => content.home.clone(),
            Page::AboutUs => content.about.clone(),
            Page::Methodology => content.methodology.clone(),
            Page::Disclaimer => content.disclaimer.clone(),
        };
        Ok(View::Page {
            page,
            title: format!("{} | {}", self.config.app.title, page.title()),
            body,
            since: status::since(self.store.pool()).await?,
            version: status::version().to_string(),
        })
    }

    fn is_signed_in(&self, session: &Session) -> bool {
        session.authenticated
            && session
                .login_id
                .as_deref()
                .is_some_and(|id| !self.revoked.is_revoked(id))
    }

    fn login_view(&self, session: &Session, message: Option<&str>) -> View {
        View::Login {
            title: self.config.app.title.clone(),
            disclaimer: self.config.content.disclaimer.clone(),
            disclaimer_acknowledged: session.disclaimer_acknowledged,
            message: message.map(str::to_string),
        }
    }
}

fn is_missing_repository(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::RepositoryNotFound(_))
    )
}

/// Map an error to the alert shown for it.
pub fn classify(err: anyhow::Error) -> Alert {
    if let Some(e) = err.downcast_ref::<ValidationError>() {
        return Alert {
            level: AlertLevel::Warning,
            message: e.to_string(),
        };
    }
    if let Some(e) = err.downcast_ref::<StateError>() {
        tracing::warn!(error = %e, "inconsistent state");
        return Alert {
            level: AlertLevel::Error,
            message: "Something went wrong. Please refresh and try again.".to_string(),
        };
    }
    tracing::error!(error = %format!("{err:#}"), "command failed");
    Alert {
        level: AlertLevel::Error,
        message: format!("{err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn classifies_by_error_type() {
        let alert = classify(ValidationError::EmptyClause.into());
        assert_eq!(alert.level, AlertLevel::Warning);
        assert_eq!(alert.message, "Enter the clause to check.");

        let alert = classify(StateError::FileNotFound(3).into());
        assert_eq!(alert.level, AlertLevel::Error);
        assert!(alert.message.starts_with("Something went wrong"));

        let alert = classify(anyhow!("disk full").context("saving repository"));
        assert_eq!(alert.level, AlertLevel::Error);
        assert_eq!(alert.message, "saving repository: disk full");
    }

    #[test]
    fn only_a_missing_repository_resets_the_selection() {
        assert!(is_missing_repository(&StateError::RepositoryNotFound("r".into()).into()));
        assert!(!is_missing_repository(&StateError::NoRepositorySelected.into()));
        assert!(!is_missing_repository(&anyhow!("database is locked")));
        assert!(!is_missing_repository(
            &anyhow!("database is locked").context("listing files")
        ));
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let cmd: Command = serde_json::from_str(r#"{"type":"check_clause","clause":"Pay in 30 days"}"#).unwrap();
        match cmd {
            Command::CheckClause { clause, scope } => {
                assert_eq!(clause, "Pay in 30 days");
                assert_eq!(scope, AnalysisScope::PerFile);
            }
            other => panic!("unexpected {:?}", other),
        }

        let cmd: Command =
            serde_json::from_str(r#"{"type":"navigate","page":"about_us"}"#).unwrap();
        assert!(matches!(cmd, Command::Navigate { page: Page::AboutUs }));
    }

    #[test]
    fn only_gate_commands_skip_login() {
        assert!(Command::AcknowledgeDisclaimer.allowed_before_login());
        assert!(Command::SignOut.allowed_before_login());
        assert!(!Command::ListRepositories.allowed_before_login());
        assert!(!Command::Navigate { page: Page::Disclaimer }.allowed_before_login());
    }
}
