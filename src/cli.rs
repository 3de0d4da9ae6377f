use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// connbroker: routes workspace connections through a streaming gateway
#[derive(Parser)]
#[command(name = "connbroker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the broker API server
    Serve {
        /// Port to bind (defaults to BROKER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a connection through the URL pipeline and print the result
    Rewrite {
        /// Environment the connection belongs to
        #[arg(long)]
        env_id: String,
        /// Connection JSON file; reads stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
        /// Force the streaming gateway on regardless of configuration
        #[arg(long)]
        enable_gateway: bool,
        /// Principal forwarded to collaborators
        #[arg(long)]
        principal_id: Option<String>,
        /// Caller token forwarded to collaborators
        #[arg(long, env = "BROKER_USER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}
