//! clientdesk: an agency's admin area and client portal over one HTTP API.
//!
//! The library holds everything the `clientdesk` binary runs: configuration,
//! persistence backends, authentication and role routing, the portal domain
//! rules, file storage, and the axum web layer.

pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod portal;
pub mod settings;
pub mod storage;
pub mod web;

#[cfg(all(test, feature = "libsql"))]
pub(crate) mod testing;
