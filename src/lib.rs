//! Change review engine.
//!
//! Tracks changes, their patch sets and votes, decides which votes survive a
//! new patch set, evaluates submit requirements across a project hierarchy,
//! and rebases chains of dependent changes, optionally on behalf of their
//! uploaders. Git storage, permissions and the account directory are
//! collaborators passed in when opening a [`server::ReviewServer`].

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod server;
pub mod services;

pub use config::ReviewConfig;
pub use error::ReviewError;
pub use server::{Collaborators, ReviewServer};
