//! depot - command-line peer for the depot file server
//!
//! One command per invocation, one connection per command: store, fetch,
//! list, purge. Progress bars and the purge confirmation live here, not in
//! the library.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use depot::client;

#[derive(Parser, Debug)]
#[command(author, version, about = "Depot - store, fetch, list and purge files on a depot server")]
struct Args {
    /// Server address (host:port)
    #[arg(long, default_value = "127.0.0.1:42069")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file to the server
    Store {
        /// Local file to upload
        file: PathBuf,
        /// Name to store under (defaults to the file's base name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download a file from the server
    Fetch {
        /// Stored name to download
        name: String,
        /// Output path (defaults to the stored name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the files held by the server
    List,
    /// Delete every file on the server
    Purge {
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Store { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .with_context(|| format!("{} has no usable base name", file.display()))?,
            };
            let size = std::fs::metadata(&file)
                .with_context(|| format!("stat {}", file.display()))?
                .len();
            let bar = transfer_bar(size);
            client::store(&args.addr, &name, &file, |done| bar.set_position(done)).await?;
            bar.finish_and_clear();
            println!("stored {name} ({size} bytes)");
        }
        Command::Fetch { name, output } => {
            let dest = output.unwrap_or_else(|| PathBuf::from(&name));
            let bar = transfer_bar(0);
            let size = client::fetch(&args.addr, &name, &dest, |done, total| {
                bar.set_length(total);
                bar.set_position(done);
            })
            .await?;
            bar.finish_and_clear();
            println!("fetched {name} -> {} ({size} bytes)", dest.display());
        }
        Command::List => {
            let names = client::list(&args.addr).await?;
            if names.is_empty() {
                println!("no files stored");
            } else {
                for name in &names {
                    println!("{name}");
                }
                println!("{} file(s)", names.len());
            }
        }
        Command::Purge { yes } => {
            if !yes && !confirm_purge()? {
                println!("aborted");
                return Ok(());
            }
            let removed = client::purge(&args.addr).await?;
            println!("purged {removed} file(s)");
        }
    }
    Ok(())
}

fn confirm_purge() -> Result<bool> {
    eprint!("This will delete every file on the server. Continue? [y/N] ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "YES"))
}

fn transfer_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{bytes}/{total_bytes} [{bar:30}] {bytes_per_sec}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}
