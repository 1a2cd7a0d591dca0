//! HTTP surface: router, session guards, handlers and the change feed.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod sse;
pub mod types;
