// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;
use std::time::Instant;

use console::style;
use tempfile::TempDir;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::domain::NameRegistry;
use crate::error::{Error, Result};
use crate::handlers::{self, HandlerKind, Services};
use crate::services::{
    auth::{GitHubCredentials, WarehouseCredentials},
    git::GitService,
    github::{GitHub, RepoSlug},
    http::HttpClient,
    metrics::{self, RunMetrics},
    pypi::PyPI,
    quay::Quay,
    repository::PrescriptionsRepository,
    submit::{SubmitOutcome, Submission},
    warehouse::Warehouse,
    writer::PrescriptionWriter,
};

pub struct App {
    cli: Cli,
    config: Arc<Config>,
    cancel_token: CancellationToken,
}

/// Working copy of the prescriptions repository for one run. A fresh clone
/// lives as long as its temporary directory.
struct Workspace {
    git: GitService,
    _dir: Option<TempDir>,
}

impl App {
    pub fn new(cli: Cli) -> Result<Self> {
        let config = Config::load(&cli)?;
        debug!(
            repo = %config.repo,
            dry_run = config.dry_run,
            randomize = config.randomize,
            "config loaded"
        );
        let cancel_token = CancellationToken::new();
        Ok(Self {
            cli,
            config: Arc::new(config),
            cancel_token,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let cancel = self.cancel_token.clone();
        tokio::spawn(async move {
            signal::ctrl_c().await.ok();
            cancel.cancel();
        });

        match self.cli.command {
            Commands::Run { ref handlers } => {
                let handlers = if handlers.is_empty() {
                    self.config.selected_handlers()?
                } else {
                    handlers.clone()
                };
                self.refresh(&handlers).await
            }
            Commands::List => {
                self.list_handlers();
                Ok(())
            }
            Commands::Config => {
                let rendered = toml::to_string_pretty(self.config.as_ref())
                    .map_err(|e| Error::Config(e.to_string()))?;
                print!("{rendered}");
                Ok(())
            }
            Commands::Init => {
                let path = Config::create_default()?;
                println!("Created config: {}", path.display());
                Ok(())
            }
            Commands::Completions { shell } => {
                let mut cmd = <Cli as clap::CommandFactory>::command();
                clap_complete::generate(
                    shell,
                    &mut cmd,
                    "prescriptions-refresh",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }

    fn list_handlers(&self) {
        for kind in HandlerKind::ALL {
            println!(
                "{:<20} {}",
                style(kind.id()).bold(),
                kind.description()
            );
            println!("{:<20} {}", "", style(kind.sources().join(", ")).dim());
        }
    }

    // ─── Refresh ───

    async fn refresh(&self, handlers: &[HandlerKind]) -> Result<()> {
        if handlers.is_empty() {
            return Err(Error::NoHandlers);
        }
        let submit = !self.config.dry_run;
        self.config.require_credentials(handlers, submit)?;

        let http = HttpClient::new(&self.config, self.cancel_token.clone())?;
        let slug = RepoSlug::parse_remote(&self.config.repo);
        let github = GitHub::new(
            http.clone(),
            &self.config,
            GitHubCredentials::from_config(&self.config, slug.as_ref())?,
        );

        let workspace = self.workspace(&github, slug.as_ref(), submit).await?;
        let root = workspace.git.work_dir().to_path_buf();
        match workspace.git.head_commit() {
            Ok(head) => info!(root = %root.display(), head = %head, "working copy ready"),
            Err(e) => debug!(error = %e, "cannot read the checked out commit"),
        }

        let services = Arc::new(Services {
            config: Arc::clone(&self.config),
            github,
            quay: Quay::new(http.clone(), &self.config),
            pypi: PyPI::new(http.clone(), &self.config),
            warehouse: Warehouse::new(
                http.clone(),
                &self.config,
                WarehouseCredentials::from_config(&self.config)?,
            ),
            repository: PrescriptionsRepository::new(&root, &self.config),
        });

        let mut writer = PrescriptionWriter::new(&root, self.config.dry_run);
        let mut names = NameRegistry::new();
        let run_metrics = RunMetrics::new();
        let mut failed: Vec<String> = Vec::new();

        for &kind in handlers {
            if self.cancel_token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.print_status(&format!("Running {kind}..."));

            let handler = handlers::create_handler(kind, &services);
            let checkpoint = writer.checkpoint();
            let started = Instant::now();
            let result = handlers::run_handler(
                handler.as_ref(),
                &mut names,
                &mut writer,
                self.cancel_token.clone(),
            )
            .await;

            match result {
                Ok(summary) => {
                    info!(
                        handler = %kind,
                        created = summary.created,
                        updated = summary.updated,
                        removed = summary.removed,
                        unchanged = summary.unchanged,
                        "handler finished"
                    );
                    self.print_info(&format!(
                        "{kind}: {} changed, {} unchanged",
                        summary.changed(),
                        summary.unchanged
                    ));
                    run_metrics.handler_finished(kind.id(), summary, started.elapsed());
                }
                Err(e) => {
                    let reverted = writer.rollback_to(checkpoint)?;
                    if e.is_fatal() {
                        return Err(e);
                    }
                    error!(handler = %kind, error = %e, reverted, "handler failed, output rolled back");
                    self.print_warning(&format!("{kind} failed: {e}"));
                    run_metrics.handler_failed(kind.id(), started.elapsed());
                    failed.push(kind.id().to_string());
                }
            }
        }

        let totals = writer.summary();
        let changes = writer.into_changes();
        if submit {
            let submission = Submission::new(&workspace.git, &services.github, &self.config);
            let outcome = submission.submit(handlers, &changes).await;
            run_metrics.submitted(matches!(outcome, Ok(SubmitOutcome::Submitted { .. })));
            self.push_metrics(&http, &run_metrics).await;

            match outcome? {
                SubmitOutcome::NoChanges => self.print_info("No changes to submit"),
                SubmitOutcome::Submitted {
                    number,
                    url,
                    created,
                } => {
                    let verb = if created { "Opened" } else { "Updated" };
                    eprintln!(
                        "{} {verb} pull request #{number}: {}",
                        style("✓").green().bold(),
                        style(url).underlined()
                    );
                }
            }
        } else {
            self.push_metrics(&http, &run_metrics).await;
            self.print_info(&format!("Dry run, {} document(s) would change", totals.dry_run));
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::HandlersFailed { failed })
        }
    }

    /// Open the configured working copy, or shallow clone the repository
    /// into a temporary directory.
    async fn workspace(
        &self,
        github: &GitHub,
        slug: Option<&RepoSlug>,
        submit: bool,
    ) -> Result<Workspace> {
        if let Some(ref path) = self.config.workdir {
            self.print_status(&format!("Using working copy {}", path.display()));
            return Ok(Workspace {
                git: GitService::open(path)?,
                _dir: None,
            });
        }

        let dir = TempDir::new()?;
        let dest = dir.path().join("prescriptions");
        self.print_status(&format!("Cloning {}...", self.config.repo));

        let git = match slug {
            Some(slug) => {
                let token = if submit {
                    Some(github.push_token().await?)
                } else {
                    None
                };
                let url = clone_url(&self.config.github_url, slug, token.as_deref())?;
                GitService::clone_shallow(url.as_str(), &dest, token.as_deref())?
            }
            None => GitService::clone_shallow(&self.config.repo, &dest, None)?,
        };

        Ok(Workspace {
            git,
            _dir: Some(dir),
        })
    }

    async fn push_metrics(&self, http: &HttpClient, run_metrics: &RunMetrics) {
        let Some(ref gateway) = self.config.metrics_pushgateway_url else {
            return;
        };
        let instance = self
            .config
            .deployment_name
            .as_deref()
            .unwrap_or("prescriptions-refresh");
        if let Err(e) = metrics::push(http, gateway, instance, run_metrics).await {
            warn!(gateway = %gateway, error = %e, "failed to push metrics");
        }
    }

    // ─── Output Helpers ───

    fn print_status(&self, msg: &str) {
        eprintln!("{} {}", style("→").cyan(), msg);
    }

    fn print_info(&self, msg: &str) {
        eprintln!("{} {}", style("info:").cyan(), msg);
    }

    fn print_warning(&self, msg: &str) {
        eprintln!("{} {}", style("warning:").yellow().bold(), msg);
    }
}

/// HTTPS clone URL of `slug`, with `token` as the basic auth password.
pub fn clone_url(github_url: &str, slug: &RepoSlug, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(github_url)
        .map_err(|e| Error::Config(format!("invalid github_url '{github_url}': {e}")))?;
    url.set_path(&format!("{}/{}.git", slug.owner, slug.repo));
    if let Some(token) = token {
        url.set_username("x-access-token")
            .and_then(|()| url.set_password(Some(token)))
            .map_err(|()| Error::Config(format!("cannot add credentials to {github_url}")))?;
    }
    Ok(url)
}
