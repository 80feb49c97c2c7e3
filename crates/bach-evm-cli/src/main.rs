//! bach-evm command-line runner
//!
//! ```bash
//! bach-evm run --code 0x6001600101 --gas 100000
//! bach-evm --json run --code 0x3d --chain mainnet --block-number 8772000
//! ```

mod cli;
mod output;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bach_evm::runtime::{self, Config, RuntimeOutput};
use bach_evm::{ChainConfig, FrozenRules, MemoryStateDb, RuleSet, StateDb};
use bach_primitives::{decode_hex, Address};
use cli::{ChainArg, Cli, Command, RunArgs};
use output::Output;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Command::Run(args) => {
            let result = run(&args)?;
            render(&result, cli.json).print();
        }
    }
    Ok(())
}

fn load_rules(chain: ChainArg, chain_config: Option<&Path>) -> Result<Arc<dyn RuleSet>> {
    if let Some(path) = chain_config {
        let config = ChainConfig::load(path)
            .with_context(|| format!("failed to load chain config {}", path.display()))?;
        return Ok(Arc::new(config));
    }
    let rules: Arc<dyn RuleSet> = match chain {
        ChainArg::Frozen => Arc::new(FrozenRules),
        ChainArg::Mainnet => Arc::new(ChainConfig::mainnet()),
        ChainArg::Morden => Arc::new(ChainConfig::morden()),
        ChainArg::Mordor => Arc::new(ChainConfig::mordor()),
    };
    Ok(rules)
}

fn run(args: &RunArgs) -> Result<RuntimeOutput> {
    let code = decode_hex(&args.code).context("invalid --code")?;
    let input = decode_hex(&args.input).context("invalid --input")?;
    let origin = args.origin.unwrap_or(Address::ZERO);

    let mut state = MemoryStateDb::new();
    if !args.value.is_zero() {
        state.add_balance(origin, args.value);
    }

    let cfg = Config {
        rules: Some(load_rules(args.chain, args.chain_config.as_deref())?),
        origin,
        block_number: args.block_number,
        gas_limit: Some(args.gas),
        gas_price: args.price,
        value: args.value,
        state: Some(state),
        ..Config::default()
    };

    tracing::info!("Running {} bytes of code at block {}", code.len(), args.block_number);
    let (result, _) = runtime::execute(&code, &input, cfg);
    tracing::info!("Gas used: {}", result.gas_used);
    Ok(result)
}

fn render(result: &RuntimeOutput, json: bool) -> Output {
    let address = serde_json::to_value(runtime::contract_address()).unwrap_or_default();
    Output::new(json)
        .field_value("address", address)
        .field("output", &format!("0x{}", hex::encode(&result.output)))
        .field_u64("gas_used", result.gas_used)
        .field_opt("error", result.error.as_ref().map(|e| e.to_string()))
}
