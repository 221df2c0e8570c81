use std::str::FromStr;

/// Validators per sync committee, and the number of sub-aggregates the
/// beacon API splits them into.
pub const SYNC_COMMITTEE_SIZE: usize = 512;
pub const SYNC_COMMITTEE_SUBNET_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub genesis_timestamp: u64,
    pub slot_duration_ms: u64,
    pub slots_per_epoch: u64,
    pub epochs_per_sync_committee_period: u64,
    /// Execution-layer chain id, as the Etherscan-style API expects it.
    pub execution_chain_id: u64,
}

pub trait ChainInfo {
    fn as_str(&self) -> String;
    fn config(&self) -> ChainConfig;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Ethereum,
    Gnosis,
}

impl ChainInfo for Chain {
    fn as_str(&self) -> String {
        let val = match self {
            Self::Ethereum => "ethereum",
            Self::Gnosis => "gnosis",
        };
        val.to_owned()
    }

    fn config(&self) -> ChainConfig {
        match self {
            Self::Ethereum => ChainConfig {
                genesis_timestamp: 1606824023,
                slot_duration_ms: 12_000,
                slots_per_epoch: 32,
                epochs_per_sync_committee_period: 256,
                execution_chain_id: 1,
            },
            Self::Gnosis => ChainConfig {
                genesis_timestamp: 1638993340,
                slot_duration_ms: 5_000,
                slots_per_epoch: 16,
                epochs_per_sync_committee_period: 256,
                execution_chain_id: 100,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown chain {0}")]
pub struct ChainParseError(String);

impl FromStr for Chain {
    type Err = ChainParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" => Ok(Self::Ethereum),
            "gnosis" => Ok(Self::Gnosis),
            other => Err(ChainParseError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_chains() {
        assert_eq!("ethereum".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("Gnosis".parse::<Chain>().unwrap(), Chain::Gnosis);
        assert!("goerli".parse::<Chain>().is_err());
    }

    #[test]
    fn gnosis_preset() {
        let config = Chain::Gnosis.config();
        assert_eq!(config.slot_duration_ms, 5_000);
        assert_eq!(config.slots_per_epoch, 16);
        assert_eq!(config.epochs_per_sync_committee_period, 256);
    }

    #[test]
    fn ethereum_preset() {
        let config = Chain::Ethereum.config();
        assert_eq!(config.slot_duration_ms, 12_000);
        assert_eq!(config.slots_per_epoch, 32);
    }
}
