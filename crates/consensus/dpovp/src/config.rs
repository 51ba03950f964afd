//! DPoVP Configuration Types

use crate::{
    constants::{
        DEFAULT_CONFIRM_BROADCAST_MAX_AGE_SECS, DEFAULT_EVIL_RELEASE_INTERVAL,
        DEFAULT_INTERIM_DURATION, DEFAULT_MAX_DEPUTY_COUNT, DEFAULT_MINE_TIMEOUT_MS,
        DEFAULT_REWARD_CHECK_HEIGHT, DEFAULT_TERM_DURATION, MAX_EXTRA_LENGTH,
    },
    errors::{DpovpError, DpovpResult},
};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// DPoVP consensus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpovpConfig {
    /// Blocks per term. Snapshot heights are multiples of this (default: 1,000,000)
    pub term_duration: u64,

    /// Blocks between a snapshot and the switch to the new deputies (default: 1,000)
    pub interim_duration: u64,

    /// Offset into a term at which the reward pool must be set (default: 100,000)
    pub reward_check_height: u64,

    /// Length of one deputy's mining slot in milliseconds (default: 10,000)
    pub mine_timeout_ms: u64,

    /// Maximum header extra bytes (default: 256)
    pub max_extra_len: usize,

    /// Lower gas limit bound for mined blocks
    pub min_gas_limit: u64,

    /// Gas limit mined blocks converge to
    pub target_gas_limit: u64,

    /// Gas limit adjustment divisor (default: 1024)
    pub gas_limit_bound_divisor: u64,

    /// Rounding unit for term salaries (default: 10^16)
    pub reward_precision: U256,

    /// Upper bound on the deputy count of any term (default: 17)
    pub max_deputy_count: u32,

    /// Confirmations of blocks older than this are not broadcast (default: 180)
    pub confirm_broadcast_max_age_secs: u64,

    /// Blocks an evil miner stays marked (default: 1,000)
    pub evil_release_interval: u64,

    /// Allowed clock skew for received blocks in seconds (default: 1)
    pub future_block_tolerance_secs: u64,
}

impl Default for DpovpConfig {
    fn default() -> Self {
        Self {
            term_duration: DEFAULT_TERM_DURATION,
            interim_duration: DEFAULT_INTERIM_DURATION,
            reward_check_height: DEFAULT_REWARD_CHECK_HEIGHT,
            mine_timeout_ms: DEFAULT_MINE_TIMEOUT_MS,
            max_extra_len: MAX_EXTRA_LENGTH,
            min_gas_limit: 5_000,
            target_gas_limit: 500_000_000,
            gas_limit_bound_divisor: 1024,
            reward_precision: U256::from(10_000_000_000_000_000u64),
            max_deputy_count: DEFAULT_MAX_DEPUTY_COUNT,
            confirm_broadcast_max_age_secs: DEFAULT_CONFIRM_BROADCAST_MAX_AGE_SECS,
            evil_release_interval: DEFAULT_EVIL_RELEASE_INTERVAL,
            future_block_tolerance_secs: 1,
        }
    }
}

impl DpovpConfig {
    /// Create a new DPoVP config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set term and interim durations
    pub const fn with_term(mut self, term_duration: u64, interim_duration: u64) -> Self {
        self.term_duration = term_duration;
        self.interim_duration = interim_duration;
        self
    }

    /// Set reward check height
    pub const fn with_reward_check_height(mut self, height: u64) -> Self {
        self.reward_check_height = height;
        self
    }

    /// Set mining slot length
    pub const fn with_mine_timeout_ms(mut self, timeout: u64) -> Self {
        self.mine_timeout_ms = timeout;
        self
    }

    /// Set gas limit bounds
    pub const fn with_gas_limits(mut self, min: u64, target: u64) -> Self {
        self.min_gas_limit = min;
        self.target_gas_limit = target;
        self
    }

    /// Set salary precision
    pub const fn with_reward_precision(mut self, precision: U256) -> Self {
        self.reward_precision = precision;
        self
    }

    /// Set maximum deputy count
    pub const fn with_max_deputy_count(mut self, count: u32) -> Self {
        self.max_deputy_count = count;
        self
    }

    /// Set evil release interval
    pub const fn with_evil_release_interval(mut self, interval: u64) -> Self {
        self.evil_release_interval = interval;
        self
    }

    /// Check the parameters are usable.
    pub fn validate(&self) -> DpovpResult<()> {
        if self.term_duration == 0 || self.interim_duration == 0 {
            return Err(DpovpError::InvalidConfig("term and interim durations must be non-zero".into()))
        }
        if self.interim_duration >= self.term_duration {
            return Err(DpovpError::InvalidConfig("interim duration must be shorter than a term".into()))
        }
        if self.reward_check_height == 0 || self.reward_check_height >= self.term_duration {
            return Err(DpovpError::InvalidConfig(format!(
                "reward check height {} outside term of {} blocks",
                self.reward_check_height, self.term_duration
            )));
        }
        if self.mine_timeout_ms == 0 {
            return Err(DpovpError::InvalidConfig("mine timeout must be non-zero".into()))
        }
        if self.min_gas_limit > self.target_gas_limit {
            return Err(DpovpError::InvalidConfig("min gas limit above target".into()))
        }
        if self.gas_limit_bound_divisor == 0 || self.reward_precision.is_zero() {
            return Err(DpovpError::InvalidConfig("divisor and precision must be non-zero".into()))
        }
        if self.max_deputy_count == 0 {
            return Err(DpovpError::InvalidConfig("max deputy count must be non-zero".into()))
        }
        Ok(())
    }

    /// Term index covering `height`
    pub const fn term_index(&self, height: u64) -> u64 {
        crate::term_index_of(height, self.term_duration, self.interim_duration)
    }

    /// Whether `height` embeds the next term's deputies
    pub const fn is_snapshot_height(&self, height: u64) -> bool {
        crate::is_snapshot_height(height, self.term_duration)
    }

    /// Whether `height` is the first block of a new term, where salaries are paid
    pub const fn is_reward_height(&self, height: u64) -> bool {
        height > self.term_duration && height % self.term_duration == self.interim_duration + 1
    }

    /// Whether `height` is the point where the running term's reward pool must be set
    pub const fn is_reward_check_height(&self, height: u64) -> bool {
        height > 0 && height % self.term_duration == self.reward_check_height
    }
}
