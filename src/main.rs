mod app;
mod backup;
mod cli;
mod config;
mod log;
mod rewrite;
mod scanner;
mod store;
mod version;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
