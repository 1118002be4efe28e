//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Data directory for conversation history
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted conversation against in-memory wallet, storage and chain
    Demo {
        /// Peer wallet address (0x-prefixed hex); derived from a fixed seed if omitted
        #[arg(short, long)]
        peer: Option<String>,
        /// Amount of ether to send in the transfer message
        #[arg(short, long, default_value = "0.05")]
        amount: String,
        /// Make the chain revert the transfer
        #[arg(long)]
        revert: bool,
    },
    /// Print stored conversation history
    History {
        /// Only show the conversation with this peer
        #[arg(short, long)]
        peer: Option<String>,
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the default configuration, or write it to a file
    Config {
        /// Write the configuration to this path instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
}
