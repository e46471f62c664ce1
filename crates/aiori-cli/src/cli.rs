use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ior-daos",
    about = "IOR-style benchmark over the DAOS array backend",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repeat for more detail (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a write/read/verify pass with N ranks against an in-process cluster
    Run(RunArgs),
    /// Show the object id a test file name maps to
    Oid(OidArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Number of ranks (threads)
    #[arg(short = 'n', long, default_value_t = 4)]
    pub ranks: usize,

    /// One file per rank instead of a single shared file
    #[arg(short = 'F', long)]
    pub file_per_proc: bool,

    /// Contiguous bytes each rank writes per segment
    #[arg(short, long, default_value = "1m", value_parser = parse_bytes)]
    pub block_size: u64,

    /// Bytes per transfer
    #[arg(short, long, default_value = "256k", value_parser = parse_bytes)]
    pub transfer_size: u64,

    /// Number of segments
    #[arg(short, long, default_value_t = 1)]
    pub segments: u64,

    /// Test file name
    #[arg(short = 'o', long, default_value = "testfile")]
    pub test_file: String,

    /// Visit transfers of a block in random order
    #[arg(short = 'z', long)]
    pub random: bool,

    /// Seed for random offsets
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Call fsync after the write phase
    #[arg(short = 'e', long)]
    pub fsync: bool,

    /// Keep the test file(s) after the run
    #[arg(short = 'k', long)]
    pub keep_file: bool,

    /// TOML file with a [daos] table
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Backend option, e.g. daos.oclass=RP_3GX (repeatable)
    #[arg(short = 'O', long = "option", value_name = "daos.KEY=VALUE")]
    pub options: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct OidArgs {
    /// Test file name
    pub name: String,

    /// Object class
    #[arg(long, default_value = "SX")]
    pub oclass: String,
}

fn parse_bytes(s: &str) -> Result<u64, String> {
    aiori_daos::parse_size(s).map_err(|e| e.to_string())
}
