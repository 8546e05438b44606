// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

pub mod auth;
pub mod git;
pub mod github;
pub mod http;
pub mod metrics;
pub mod pypi;
pub mod quay;
pub mod repository;
pub mod submit;
pub mod warehouse;
pub mod writer;
