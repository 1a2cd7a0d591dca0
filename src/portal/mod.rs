//! Domain rules of the admin and client portals that sit above storage.

pub mod audit;
pub mod chat;
pub mod dashboard;
pub mod export;
pub mod requests;
pub mod validate;
pub mod weekly;
