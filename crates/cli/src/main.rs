// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use changelog_cli::commands::{dump, inspect, purge, verify};
use changelog_core::{Csn, Dn};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "changelog")]
#[command(about = "Inspect and maintain a replication changelog directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the domain state and every replica log with its bounds
    Inspect {
        /// Directory holding the changelog environment
        #[arg(long, short)]
        dir: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// Print the records of one replica log in CSN order
    Dump {
        #[arg(long, short)]
        dir: PathBuf,

        /// Replicated domain, e.g. "dc=example,dc=com"
        #[arg(long)]
        domain: Dn,

        #[arg(long, allow_negative_numbers = true)]
        server_id: i32,

        /// First CSN to print (24 hex digits)
        #[arg(long)]
        from: Option<Csn>,

        #[arg(long, short = 'n')]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },
    /// Decode every record and state entry, checking checksums
    Verify {
        #[arg(long, short)]
        dir: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// Remove records older than a CSN from every log
    Purge {
        #[arg(long, short)]
        dir: PathBuf,

        #[arg(long)]
        before: Csn,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    changelog_persistence::telemetry::init_tracing();
    changelog_persistence::telemetry::describe_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { dir, json } => inspect::run(&dir, json),
        Commands::Dump {
            dir,
            domain,
            server_id,
            from,
            limit,
            json,
        } => dump::run(&dir, &domain, server_id.into(), from, limit, json),
        Commands::Verify { dir, json } => verify::run(&dir, json),
        Commands::Purge { dir, before, json } => purge::run(&dir, before, json),
    }
}
