use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tail-burn", version, about = "Single-use file drops over a tailnet")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Verbose logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Share one file with one tailnet user, then burn the link
    Send {
        /// Login allowed to download, e.g. alice@example.com
        #[arg(long)]
        target: String,

        /// Minutes before the share burns unused
        #[arg(long)]
        timeout: Option<u64>,

        /// Delete the source file after the share shuts down
        #[arg(long)]
        wipe: bool,

        /// Listen port
        #[arg(long)]
        port: Option<u16>,

        /// Listen address (defaults to the tailnet interface)
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Host name to print in the share URL
        #[arg(long)]
        public_host: Option<String>,

        /// File to share
        file: PathBuf,
    },

    /// Download a shared file and confirm receipt
    Receive {
        /// Share URL printed by `tail-burn send`
        url: String,

        /// Directory to save into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}
