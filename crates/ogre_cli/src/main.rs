//! OGRE CLI
//!
//! Command-line tools for OGRE object-graph replication.
//!
//! # Commands
//!
//! - `serve-demo` - Serve a demo social graph that changes on a timer
//! - `watch` - Replicate an object graph and print it after every update

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// OGRE replication tools.
#[derive(Parser)]
#[command(name = "ogre")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a demo Person/Likes graph that mutates on a timer
    ServeDemo {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        bind: SocketAddr,

        /// Milliseconds between mutations
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Replicate an object graph and print it after every update
    Watch {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        server: SocketAddr,

        /// Type domain id
        #[arg(short, long, default_value = commands::serve_demo::TYPE_DOMAIN_ID)]
        type_domain: String,

        /// Object graph id
        #[arg(short, long, default_value = commands::serve_demo::OBJECT_GRAPH_ID)]
        graph: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    // stdout carries the replica dump
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::ServeDemo { bind, interval_ms } => {
            commands::serve_demo::run(bind, interval_ms)?;
        }
        Commands::Watch {
            server,
            type_domain,
            graph,
            format,
        } => {
            commands::watch::run(server, &type_domain, &graph, &format)?;
        }
        Commands::Version => {
            println!("OGRE CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
