//! Rule versions: fork activation flags and gas tables keyed by block height.
//!
//! A [`RuleSet`] is a pure function of the block number. The same height
//! always yields the same flags and the same [`GasTable`], so the dispatcher
//! can run against any historical block without branching on fork names.

use std::path::Path;

use bach_primitives::BlockNumber;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};

/// Gas prices that changed between protocol versions.
///
/// Costs that never changed live in [`crate::gas::cost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasTable {
    /// EXTCODESIZE
    pub extcode_size: u64,
    /// EXTCODECOPY base cost
    pub extcode_copy: u64,
    /// EXTCODEHASH
    pub extcode_hash: u64,
    /// BALANCE
    pub balance: u64,
    /// SLOAD
    pub sload: u64,
    /// Base cost of the CALL family
    pub calls: u64,
    /// SELFDESTRUCT
    pub suicide: u64,
    /// EXP cost per exponent byte
    pub exp_byte: u64,
    /// Surcharge for SELFDESTRUCT into a new account.
    ///
    /// `Some` also marks the 63/64 call-gas forwarding rule.
    pub create_by_suicide: Option<u64>,
    /// Code deposit cost per byte of deployed code
    pub create_data: u64,
}

impl GasTable {
    /// Frontier and Homestead prices
    pub const FRONTIER: GasTable = GasTable {
        extcode_size: 20,
        extcode_copy: 20,
        extcode_hash: 0,
        balance: 20,
        sload: 50,
        calls: 40,
        suicide: 0,
        exp_byte: 10,
        create_by_suicide: None,
        create_data: 200,
    };

    /// Prices after the gas reprice fork (EIP-150)
    pub const GAS_REPRICE: GasTable = GasTable {
        extcode_size: 700,
        extcode_copy: 700,
        extcode_hash: 0,
        balance: 400,
        sload: 200,
        calls: 700,
        suicide: 5000,
        exp_byte: 10,
        create_by_suicide: Some(25000),
        create_data: 200,
    };

    /// Prices after the Die Hard fork (EIP-160)
    pub const DIEHARD: GasTable = GasTable {
        exp_byte: 50,
        ..GasTable::GAS_REPRICE
    };

    /// Prices after Agharta, which adds EXTCODEHASH
    pub const AGHARTA: GasTable = GasTable {
        extcode_hash: 400,
        ..GasTable::DIEHARD
    };

    /// Whether calls forward at most all but one 64th of the remaining gas
    pub fn caps_call_gas(&self) -> bool {
        self.create_by_suicide.is_some()
    }
}

/// Fork activation and pricing for a chain, as a function of block height.
///
/// Implementations must be total and monotone: once a flag is true at
/// height `h` it stays true for every height above `h`.
pub trait RuleSet: Send + Sync {
    /// DELEGATECALL, failing code deposit on out-of-gas
    fn is_homestead(&self, number: BlockNumber) -> bool;

    /// REVERT, RETURNDATA, STATICCALL, EIP-161 account rules, EIP-170 code size
    fn is_atlantis(&self, number: BlockNumber) -> bool;

    /// Bit shifts, EXTCODEHASH, CREATE2
    fn is_agharta(&self, number: BlockNumber) -> bool;

    /// Gas prices in force at `number`
    fn gas_table(&self, number: BlockNumber) -> GasTable;
}

/// Rules for ad-hoc execution: every fork active, latest prices.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrozenRules;

impl RuleSet for FrozenRules {
    fn is_homestead(&self, _number: BlockNumber) -> bool {
        true
    }

    fn is_atlantis(&self, _number: BlockNumber) -> bool {
        true
    }

    fn is_agharta(&self, _number: BlockNumber) -> bool {
        true
    }

    fn gas_table(&self, _number: BlockNumber) -> GasTable {
        GasTable::AGHARTA
    }
}

/// Chain parameters loaded once at startup and shared read-only.
///
/// A missing activation height means the fork never activates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier
    pub chain_id: u64,
    /// Homestead activation height
    #[serde(default)]
    pub homestead_block: Option<BlockNumber>,
    /// Gas reprice (EIP-150) activation height
    #[serde(default)]
    pub gas_reprice_block: Option<BlockNumber>,
    /// Die Hard (EIP-160) activation height
    #[serde(default)]
    pub diehard_block: Option<BlockNumber>,
    /// Atlantis activation height
    #[serde(default)]
    pub atlantis_block: Option<BlockNumber>,
    /// Agharta activation height
    #[serde(default)]
    pub agharta_block: Option<BlockNumber>,
}

fn active(fork: Option<BlockNumber>, number: BlockNumber) -> bool {
    fork.map_or(false, |block| number >= block)
}

impl ChainConfig {
    /// Ethereum Classic mainnet
    pub fn mainnet() -> Self {
        Self {
            chain_id: 61,
            homestead_block: Some(1_150_000),
            gas_reprice_block: Some(2_500_000),
            diehard_block: Some(3_000_000),
            atlantis_block: Some(8_772_000),
            agharta_block: Some(9_573_000),
        }
    }

    /// Morden testnet
    pub fn morden() -> Self {
        Self {
            chain_id: 62,
            homestead_block: Some(494_000),
            gas_reprice_block: Some(1_783_000),
            diehard_block: Some(1_915_000),
            atlantis_block: Some(4_729_274),
            agharta_block: Some(5_000_381),
        }
    }

    /// Mordor testnet
    pub fn mordor() -> Self {
        Self {
            chain_id: 63,
            homestead_block: Some(0),
            gas_reprice_block: Some(0),
            diehard_block: Some(0),
            atlantis_block: Some(0),
            agharta_block: Some(301_243),
        }
    }

    /// Look up a preset by name
    pub fn by_name(name: &str) -> ConfigResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mainnet" | "classic" => Ok(Self::mainnet()),
            "morden" => Ok(Self::morden()),
            "mordor" => Ok(Self::mordor()),
            _ => Err(ConfigError::UnknownChain(name.to_string())),
        }
    }

    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        info!("Loaded chain config {} from {}", config.chain_id, path.display());
        Ok(config)
    }

    /// Whether the gas reprice fork is active at `number`
    pub fn is_gas_reprice(&self, number: BlockNumber) -> bool {
        active(self.gas_reprice_block, number)
    }

    /// Whether the Die Hard fork is active at `number`
    pub fn is_diehard(&self, number: BlockNumber) -> bool {
        active(self.diehard_block, number)
    }
}

impl RuleSet for ChainConfig {
    fn is_homestead(&self, number: BlockNumber) -> bool {
        active(self.homestead_block, number)
    }

    fn is_atlantis(&self, number: BlockNumber) -> bool {
        active(self.atlantis_block, number)
    }

    fn is_agharta(&self, number: BlockNumber) -> bool {
        active(self.agharta_block, number)
    }

    fn gas_table(&self, number: BlockNumber) -> GasTable {
        if self.is_agharta(number) {
            GasTable::AGHARTA
        } else if self.is_diehard(number) {
            GasTable::DIEHARD
        } else if self.is_gas_reprice(number) {
            GasTable::GAS_REPRICE
        } else {
            GasTable::FRONTIER
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ==================== Gas tables ====================

    #[test]
    fn test_gas_table_history() {
        assert_eq!(GasTable::FRONTIER.balance, 20);
        assert_eq!(GasTable::GAS_REPRICE.balance, 400);
        assert_eq!(GasTable::DIEHARD.exp_byte, 50);
        assert_eq!(GasTable::DIEHARD.calls, 700);
        assert_eq!(GasTable::AGHARTA.extcode_hash, 400);
        assert_eq!(GasTable::AGHARTA.create_by_suicide, Some(25000));
        assert!(!GasTable::FRONTIER.caps_call_gas());
        assert!(GasTable::GAS_REPRICE.caps_call_gas());
    }

    #[test]
    fn test_frozen_rules() {
        let rules = FrozenRules;
        for n in [0, 1, u64::MAX] {
            assert!(rules.is_homestead(n));
            assert!(rules.is_atlantis(n));
            assert!(rules.is_agharta(n));
            assert_eq!(rules.gas_table(n), GasTable::AGHARTA);
        }
    }

    // ==================== Activation boundaries ====================

    #[test]
    fn test_mainnet_boundaries() {
        let rules = ChainConfig::mainnet();
        assert!(!rules.is_homestead(1_149_999));
        assert!(rules.is_homestead(1_150_000));
        assert_eq!(rules.gas_table(2_499_999), GasTable::FRONTIER);
        assert_eq!(rules.gas_table(2_500_000), GasTable::GAS_REPRICE);
        assert_eq!(rules.gas_table(3_000_000), GasTable::DIEHARD);
        assert!(!rules.is_atlantis(8_771_999));
        assert!(rules.is_atlantis(8_772_000));
        assert_eq!(rules.gas_table(9_573_000), GasTable::AGHARTA);
    }

    #[test]
    fn test_flags_are_monotone() {
        let rules = ChainConfig::morden();
        let heights = [0u64, 494_000, 1_783_000, 1_915_000, 4_729_274, 5_000_381, 10_000_000];
        for pair in heights.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            assert!(!rules.is_homestead(lo) || rules.is_homestead(hi));
            assert!(!rules.is_atlantis(lo) || rules.is_atlantis(hi));
            assert!(!rules.is_agharta(lo) || rules.is_agharta(hi));
        }
    }

    #[test]
    fn test_missing_fork_never_activates() {
        let rules = ChainConfig::from_json_str(r#"{"chain_id": 1337, "homestead_block": 0}"#).unwrap();
        assert!(rules.is_homestead(0));
        assert!(!rules.is_atlantis(u64::MAX));
        assert_eq!(rules.gas_table(u64::MAX), GasTable::FRONTIER);
    }

    // ==================== Loading ====================

    #[test]
    fn test_by_name() {
        assert_eq!(ChainConfig::by_name("Mordor").unwrap().chain_id, 63);
        assert_eq!(ChainConfig::by_name("classic").unwrap(), ChainConfig::mainnet());
        assert!(matches!(
            ChainConfig::by_name("ropsten"),
            Err(ConfigError::UnknownChain(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&ChainConfig::mordor()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = ChainConfig::load(file.path()).unwrap();
        assert_eq!(loaded, ChainConfig::mordor());
        assert_eq!(loaded.gas_table(301_242), GasTable::DIEHARD);
        assert_eq!(loaded.gas_table(301_243), GasTable::AGHARTA);
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            ChainConfig::load("/nonexistent/chain.json"),
            Err(ConfigError::Io(_))
        ));
        assert!(matches!(
            ChainConfig::from_json_str("{\"homestead_block\": 1}"),
            Err(ConfigError::Json(_))
        ));
    }
}
