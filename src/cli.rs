// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use clap::Parser;
use clap_complete::Shell;

use crate::handlers::HandlerKind;

#[derive(Parser, Debug)]
#[command(name = "prescriptions-refresh")]
#[command(version)]
#[command(
    about = "Refresh resolver prescriptions from upstream services and open a pull request",
    long_about = None
)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true, env = "THOTH_PRESCRIPTIONS_REFRESH_DEBUG")]
    pub verbose: bool,

    /// Log the documents that would be written, touch nothing
    #[arg(long, global = true, env = "THOTH_PRESCRIPTIONS_DRY_RUN")]
    pub dry_run: bool,

    /// Shuffle the order projects and images are visited in
    #[arg(long, global = true, env = "THOTH_PRESCRIPTIONS_REFRESH_RANDOMIZE")]
    pub randomize: bool,

    /// Prescriptions repository to clone and open the pull request against
    #[arg(long, global = true, value_name = "URL")]
    pub prescriptions_repo: Option<String>,

    /// Comma separated pull request labels
    #[arg(long, global = true, value_name = "LABELS")]
    pub labels: Option<String>,

    /// Work in an existing clone instead of cloning the repository
    #[arg(long, global = true, value_name = "PATH")]
    pub workdir: Option<PathBuf>,

    /// Explicit config file (replaces the user config)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run handlers and submit the resulting changes
    Run {
        /// Handlers to run, in order (defaults to the `handlers` setting)
        #[arg(value_enum, value_delimiter = ',')]
        handlers: Vec<HandlerKind>,
    },
    /// List available handlers
    List,
    /// Show current configuration
    Config,
    /// Initialize config file
    Init,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
