pub mod cli;
pub mod crawl;
pub mod load_config;

pub use cli::{run, Cli, Commands};
