// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mycel", version, about = "Agent-mesh runtime: A2A tasks, peer delegation, sandboxed tools")]
pub struct Cli {
    /// Explicit config file (highest-priority layer)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (RUST_LOG controls the filter; defaults to info)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the agent and serve tasks until Ctrl+C
    Run,
    /// Print the merged configuration and exit
    ShowConfig,
    /// Internal: execute one sandboxed tool from an invocation spec.
    /// Spawned by the sandbox runner; not meant for interactive use.
    #[command(hide = true)]
    ToolRunner {
        /// Path to the invocation spec JSON
        #[arg(long)]
        spec: PathBuf,
    },
}
