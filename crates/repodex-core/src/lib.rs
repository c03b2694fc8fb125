//! Configuration loading and component wiring for repodex.

pub mod bootstrap;
pub mod config;
