pub mod app;
pub mod backend;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod factory;
pub mod orchestrator;
pub mod progress;
pub mod store;
pub mod template;
pub mod version;
pub mod workspace;

pub use error::{Error, Result};
