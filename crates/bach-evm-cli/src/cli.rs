//! CLI argument parsing for bach-evm

use bach_primitives::{parse_u256, Address, U256};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Run bytecode against a throwaway state
#[derive(Parser, Debug)]
#[command(name = "bach-evm")]
#[command(about = "Run bytecode against a throwaway state")]
#[command(version)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "BACH_EVM_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Install code at the harness contract address and call it
    Run(RunArgs),
}

/// Built-in rule versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChainArg {
    /// Every fork active, latest prices
    Frozen,
    /// Ethereum Classic mainnet
    Mainnet,
    /// Morden testnet
    Morden,
    /// Mordor testnet
    Mordor,
}

/// Arguments of `run`
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Contract code (hex)
    #[arg(long)]
    pub code: String,

    /// Call data (hex)
    #[arg(long, default_value = "")]
    pub input: String,

    /// Gas limit
    #[arg(long, default_value = "10000000000")]
    pub gas: u64,

    /// Gas price (decimal or 0x hex)
    #[arg(long, default_value = "0", value_parser = parse_u256)]
    pub price: U256,

    /// Value sent with the call; the origin is credited with it first
    #[arg(long, default_value = "0", value_parser = parse_u256)]
    pub value: U256,

    /// Sender address
    #[arg(long)]
    pub origin: Option<Address>,

    /// Block number
    #[arg(long, default_value = "0")]
    pub block_number: u64,

    /// Built-in rule version
    #[arg(long, value_enum, default_value = "frozen")]
    pub chain: ChainArg,

    /// Chain config JSON file; overrides --chain
    #[arg(long)]
    pub chain_config: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
