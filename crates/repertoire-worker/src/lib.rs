//! Command-line front end for the repertoire engine over a file-backed store.

pub mod commands;
pub mod config;
pub mod error;
