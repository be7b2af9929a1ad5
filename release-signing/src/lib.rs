// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Release artifact signing.
//!
//! This crate signs release artifacts (installers, packages, update
//! archives, language packs) on behalf of signing tasks. Each requested
//! signing format maps to a [dispatch::SigningStrategy]: some sign a file as
//! a whole, others open a package and sign specific files inside it before
//! rebuilding it.
//!
//! Two kinds of signing servers do the actual signing:
//!
//! * Legacy servers, driven through an external `signtool` client
//!   authenticated by a token fetched ahead of time. (See [signtool].)
//! * Autograph, an HTTP service taking base64 encoded inputs in Hawk
//!   authenticated JSON requests. (See [autograph].)
//!
//! Formats prefixed with `autograph_` go to Autograph. Everything else goes
//! to the legacy servers.
//!
//! State shared by the operations of a run (configuration, server pool,
//! HTTP client) lives in a [context::SigningContext]. [script::run] drives a
//! whole signing task.

pub mod archive;
pub mod autograph;
pub mod config;
pub mod context;
pub mod dispatch;
mod error;
pub use error::*;
pub mod langpack;
pub mod mar;
pub mod omnija;
pub mod precomplete;
pub mod process;
pub mod retry;
pub mod script;
pub mod server;
pub mod signcode;
pub mod signtool;
pub mod task;
#[cfg(test)]
mod testutil;
pub mod util;
pub mod widevine;
