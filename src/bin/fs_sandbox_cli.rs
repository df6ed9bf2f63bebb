/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fs_sandbox::{Filesystem, ServerConfig};
use log::info;

/// Exercise a sandboxed filesystem instance from a shell, for manual testing.
#[derive(Parser)]
struct Args {
    /// Path to a TOML fragment deserializing into `fs_sandbox::ServerConfig`.
    #[arg(long, default_value = "fs-sandbox.toml")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print disk usage against the configured quota.
    Usage,
    /// Print a `Stat` record for a path.
    Stat { path: String },
    /// List a directory's direct children.
    List { path: String },
    /// Write stdin to a path inside the sandbox.
    Write { path: String },
    /// Print a file's contents to stdout.
    Read { path: String },
    /// Delete a path, recursively if it is a directory.
    Delete { path: String },
    /// Force a full disk-usage recount.
    Recount,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {:?}", err);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    if PathBuf::from("log4rs.yml").exists() {
        log4rs::init_file("log4rs.yml", Default::default())
            .with_context(|| "failed to init logger")?;
    }

    let raw = fs::read_to_string(&args.config_path)
        .with_context(|| format!("failed to read config at '{}'", args.config_path.display()))?;
    let config: ServerConfig = toml::from_str(&raw).with_context(|| "failed to parse config")?;

    info!("opening sandbox at '{}'", config.root_directory);
    let sandbox = Filesystem::new(&config).with_context(|| "failed to open sandbox")?;

    match args.command {
        Command::Usage => {
            let usage = sandbox.disk_usage();
            println!(
                "used: {} bytes, limit: {} bytes, percent: {}",
                usage.bytes_used,
                usage.bytes_limit,
                usage
                    .percent_used
                    .map(|p| format!("{:.2}%", p))
                    .unwrap_or_else(|| "n/a".to_owned())
            );
        }
        Command::Stat { path } => {
            let info = sandbox.stat(&path)?;
            println!("{:#?}", info);
        }
        Command::List { path } => {
            for entry in sandbox.list_directory(&path)? {
                let kind = if entry.is_directory { "dir " } else { "file" };
                println!("{kind} {:>10} {}", entry.size, entry.name);
            }
        }
        Command::Write { path } => {
            let mut stdin = io::stdin().lock();
            sandbox.write_file(&path, &mut stdin)?;
        }
        Command::Read { path } => {
            let mut stdout = io::stdout().lock();
            sandbox.open(&path, &mut stdout)?;
            stdout.flush()?;
        }
        Command::Delete { path } => {
            sandbox.delete(&path)?;
        }
        Command::Recount => {
            let total = sandbox.recount();
            println!("recounted: {} bytes", total);
        }
    }

    Ok(())
}
