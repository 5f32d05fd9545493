//! Tidecache server binary.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use server::{Config, Server, logging};
use tracing::info;

#[derive(Parser)]
#[command(name = "tidecache")]
#[command(about = "In-memory slab cache server")]
struct Args {
    /// Path to configuration file; defaults apply when omitted
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    logging::init(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "tidecache starting");

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("cannot start server: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        eprintln!("server error: {}", e);
        process::exit(1);
    }
}
