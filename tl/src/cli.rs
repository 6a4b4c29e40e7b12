//! CLI argument parsing for tplreload

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tl")]
#[command(author, version, about = "Handlebars template loader with incremental reload", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Template root directory (overrides config)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Template file extension, e.g. ".html" (overrides config)
    #[arg(short, long)]
    pub ext: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load every template and report how many parsed
    Check,

    /// Load and list template names with their source paths
    List,

    /// Load and render a single template
    Render {
        /// Logical template name, e.g. "pages/index.html"
        #[arg(required = true)]
        name: String,

        /// JSON file with the render data
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Load, then reload on an interval and report updated templates
    Watch {
        /// Poll interval in milliseconds (default: from config)
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Run a single reload and exit
        #[arg(long)]
        once: bool,
    },
}
