pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod process;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod service;
