// Copyright 2026 tracedb Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `tracedb` command line tool: inspect, dump, verify and load databases.

mod commands;
mod error;
mod options;

use clap::{Parser, Subcommand};
use commands::{InfoArgs, LoadArgs, ReadArgs, VerifyArgs};
use options::DbArgs;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    db: DbArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the location and stored header of a blob.
    Info(InfoArgs),
    /// Dump a blob, or part of it.
    Read(ReadArgs),
    /// Check blobs against their stored checksums.
    Verify(VerifyArgs),
    /// Build a database from files, one blob per file.
    Load(LoadArgs),
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_line_number(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Command::Info(args) => commands::info(&cli.db, args),
        Command::Read(args) => commands::read(&cli.db, args),
        Command::Verify(args) => commands::verify(&cli.db, args),
        Command::Load(args) => commands::load(args),
    }
}
