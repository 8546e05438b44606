// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

// miette's Diagnostic derive generates code that triggers this false positive
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    #[diagnostic(code(prescriptions_refresh::config::error))]
    Config(String),

    #[error("Handler '{handler}' requires {credential}")]
    #[diagnostic(
        code(prescriptions_refresh::config::missing_credential),
        help("Set {env} in the environment or the config file")
    )]
    MissingCredential {
        handler: String,
        credential: String,
        env: String,
    },

    #[error("No handlers selected")]
    #[diagnostic(
        code(prescriptions_refresh::config::no_handlers),
        help(
            "Pass handler names to `run` or set THOTH_PRESCRIPTIONS_REFRESH_HANDLERS; `list` shows them"
        )
    )]
    NoHandlers,

    #[error("Prescription name '{name}' is already taken and cannot be disambiguated for {key}")]
    #[diagnostic(
        code(prescriptions_refresh::naming::collision),
        help("Two handlers or records produce the same semantic key; this is a handler bug")
    )]
    NameCollision { name: String, key: String },

    #[error("Invalid prescription {path}: {reason}")]
    #[diagnostic(code(prescriptions_refresh::prescription::invalid))]
    InvalidPrescription { path: String, reason: String },

    #[error("Record from {origin} is missing required field '{field}'")]
    #[diagnostic(code(prescriptions_refresh::record::missing_field))]
    MissingField { origin: String, field: String },

    #[error("{service} returned HTTP {status} for {url}")]
    #[diagnostic(code(prescriptions_refresh::upstream::status))]
    Upstream {
        service: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{service} request to {url} still failing after {attempts} attempts")]
    #[diagnostic(
        code(prescriptions_refresh::upstream::retries_exhausted),
        help("The service is rate limiting or unavailable; try again later or add tokens to the pool")
    )]
    RetriesExhausted {
        service: String,
        url: String,
        attempts: u32,
        status: Option<u16>,
    },

    #[error("Authentication failed: {0}")]
    #[diagnostic(code(prescriptions_refresh::auth::error))]
    Auth(String),

    #[error("Pull request submission failed: {0}")]
    #[diagnostic(code(prescriptions_refresh::submit::failed))]
    Submission(String),

    #[error("Handlers failed: {}", failed.join(", "))]
    #[diagnostic(
        code(prescriptions_refresh::run::handlers_failed),
        help("Changes of the remaining handlers were still submitted; see the log above")
    )]
    HandlersFailed { failed: Vec<String> },

    #[error("Prescription consumer stopped before the handler finished")]
    SinkClosed,

    #[error("Git error: {0}")]
    #[diagnostic(code(prescriptions_refresh::git::error))]
    Git(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether the error describes a single upstream item and the handler
    /// should carry on with the next one.
    pub fn is_item_failure(&self) -> bool {
        match self {
            Error::Upstream { .. } | Error::MissingField { .. } | Error::Json(_) => true,
            Error::Http(e) => !e.is_builder(),
            Error::RetriesExhausted { status, .. } => *status != Some(429),
            _ => false,
        }
    }

    /// Errors that abort the whole run instead of only the current handler.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Cancelled
                | Error::NameCollision { .. }
                | Error::RetriesExhausted {
                    status: Some(429),
                    ..
                }
                | Error::Auth(_)
                | Error::Config(_)
                | Error::MissingCredential { .. }
        )
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled => 0,
            Error::RetriesExhausted {
                status: Some(429), ..
            } => 3,
            _ => 1,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Auth(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
