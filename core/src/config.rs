use std::time::Duration;

use obsidian_qbft_types::{ProposerPolicy, SortMode};
use serde::{Deserialize, Serialize};

/// Consensus engine configuration.
///
/// Defaults mirror the chain's genesis parameters; per-block overrides
/// arrive through ordered [`Transition`]s.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QbftConfig {
    /// Base timeout for each consensus round; doubles per failed round.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Ceiling for the exponential round timeout.
    #[serde(with = "humantime_serde")]
    pub max_request_timeout: Duration,

    /// Minimum difference between two consecutive block timestamps.
    #[serde(with = "humantime_serde")]
    pub block_period: Duration,

    /// How the proposer for a view is selected.
    pub proposer_policy: ProposerPolicy,

    /// Canonical validator ordering.
    pub validator_sort: SortMode,

    /// Number of blocks after which to checkpoint and reset votes.
    pub epoch: u64,

    /// How far into the future a proposal timestamp may point before it
    /// is treated as a future block.
    #[serde(with = "humantime_serde")]
    pub allowed_future_block_time: Duration,

    /// Ordered per-block overrides, applied in ascending block order.
    pub transitions: Vec<Transition>,
}

impl Default for QbftConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_request_timeout: Duration::from_secs(60),
            block_period: Duration::from_secs(5),
            proposer_policy: ProposerPolicy::RoundRobin,
            validator_sort: SortMode::Byte,
            epoch: 30_000,
            allowed_future_block_time: Duration::from_secs(5),
            transitions: Vec::new(),
        }
    }
}

/// A configuration override that activates at a block number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transition {
    pub block: u64,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    #[serde(with = "humantime_serde")]
    pub max_request_timeout: Option<Duration>,

    #[serde(with = "humantime_serde")]
    pub block_period: Option<Duration>,

    pub epoch: Option<u64>,

    #[serde(with = "humantime_serde")]
    pub allowed_future_block_time: Option<Duration>,
}

impl QbftConfig {
    /// The effective configuration at `block`, with every transition at
    /// or below it applied in order.
    pub fn at(&self, block: u64) -> Self {
        let mut config = self.clone();
        for transition in self.transitions.iter().take_while(|t| t.block <= block) {
            if let Some(v) = transition.request_timeout {
                config.request_timeout = v;
            }
            if let Some(v) = transition.max_request_timeout {
                config.max_request_timeout = v;
            }
            if let Some(v) = transition.block_period {
                config.block_period = v;
            }
            if let Some(v) = transition.epoch {
                config.epoch = v;
            }
            if let Some(v) = transition.allowed_future_block_time {
                config.allowed_future_block_time = v;
            }
        }
        config
    }

    /// Timeout for a round: `min(request_timeout * 2^round,
    /// max_request_timeout)`.
    pub fn round_timeout(&self, round: u64) -> Duration {
        let factor = 1u32.checked_shl(round.min(31) as u32).unwrap_or(u32::MAX);
        self.request_timeout
            .saturating_mul(factor)
            .min(self.max_request_timeout)
    }
}
