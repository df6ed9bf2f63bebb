/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Sandboxed per-instance filesystem layer for an isolated workload.
//!
//! [`Filesystem`] mediates every read, write, rename, copy, create, and
//! delete for a workload rooted at a fixed host directory, confining all of
//! them to that root regardless of what a caller's path says, and tracks
//! disk usage against an optional quota as mutations happen.
//!
//! This crate does not manage containers, speak the management API, pack
//! backup archives, capture process output, or load its own configuration
//! file — those are the embedding daemon's job. It assumes the root already
//! exists and a [`config::ServerConfig`] is supplied at construction.

pub mod accountant;
pub mod config;
pub mod error;
mod filesystem;
pub mod path;
mod resolve;
pub mod stat;
mod walker;

pub use accountant::DiskSpace;
pub use config::{OwnershipConfig, ServerConfig};
pub use error::FsError;
pub use filesystem::Filesystem;
pub use stat::StatInfo;
