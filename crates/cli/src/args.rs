use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "remora")]
#[command(version)]
#[command(about = "Passive network mapper: fingerprints capture traffic into logical and physical graphs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Map a capture file into logical and physical network graphs
    Map {
        /// Capture file to read (pcap or pcapng)
        #[arg(short, long)]
        pcap: PathBuf,

        /// Directory of fingerprint definitions (*.json)
        #[arg(short, long)]
        fingerprints: PathBuf,

        /// Output format
        #[arg(short = 'o', long = "format", default_value = "text", value_parser = ["text", "json"])]
        output_format: String,

        /// Matcher worker tasks (defaults to available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Finalize flows idle for longer than this many seconds
        #[arg(long = "idle-timeout-secs")]
        idle_timeout: Option<u64>,

        /// Finalize TCP flows on FIN or RST instead of at end of capture
        #[arg(long)]
        fin_finalizes: bool,
    },

    /// Validate a fingerprint directory and list its contents
    Fingerprints {
        /// Directory of fingerprint definitions (*.json)
        #[arg(short, long)]
        fingerprints: PathBuf,
    },
}
