pub mod cli;
pub mod json_store;
pub mod load_config;
pub mod local;

pub use cli::{run, Cli, Commands};
