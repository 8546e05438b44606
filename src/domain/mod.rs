// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

mod change;
mod naming;
mod prescription;
mod record;

pub use change::*;
pub use naming::*;
pub use prescription::*;
pub use record::*;
