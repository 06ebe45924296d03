//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the chat relay.

use clap::{Parser, Subcommand};

/// Chat Relay - bridge chat channels to remote task engines
///
/// `serve` runs the coordinator: relay clients connect to it over WebSocket
/// and chat lines are read from stdin. `relay` runs a relay client.
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator with the console chat adapter
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "CHAT_RELAY_CONFIG")]
        config: Option<String>,

        /// Listen address, overriding the configuration
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Run a relay client backed by the echo engine
    Relay {
        /// Path to configuration file
        #[arg(short, long, env = "CHAT_RELAY_CONFIG")]
        config: Option<String>,

        /// Coordinator WebSocket URL, overriding the configuration
        #[arg(short, long)]
        url: Option<String>,

        /// Client identity, overriding the configured or stored one
        #[arg(long)]
        client_id: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version {
        /// Show full build details
        #[arg(short, long)]
        detailed: bool,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
