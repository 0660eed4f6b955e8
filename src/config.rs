// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global protocol configuration - Single Source of Truth
//!
//! This module centralizes ALL wire constants and runtime configuration.
//! **NEVER hardcode elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (magic, version, sizes)
//! - **Level 2 (Dynamic)**: [`BeaconConfig`] for runtime beacon tuning

use std::time::Duration;

// =======================================================================
// Wire protocol constants
// =======================================================================

/// Sentinel byte identifying a valid protocol frame.
///
/// Every frame starts with this byte; anything else is a framing error and
/// the receiver drops the whole datagram.
pub const PV_MAGIC: u8 = 0xCA;

/// Protocol version advertised in outgoing frame headers.
///
/// Receivers record the peer's version but do not validate it beyond that.
pub const PV_VERSION: u8 = 1;

/// Size of the fixed frame header in bytes.
///
/// Layout: `magic | version | flags | command | payload_len(u32)`.
pub const PV_MESSAGE_HEADER_SIZE: usize = 8;

/// Flags bit selecting big-endian payload interpretation (bit 7).
///
/// Bits 0-6 are reserved and must be zero for UDP.
pub const PV_FLAG_BIG_ENDIAN: u8 = 0x80;

/// Receive buffer size for UDP datagrams.
///
/// Largest representable UDP payload plus header slack, so a maximum-size
/// datagram never truncates.
pub const MAX_UDP_RECV: usize = 0xFFFF + 16;

/// Conservative maximum for outgoing UDP datagrams (fits a common MTU).
pub const MAX_UDP_SEND: usize = 1440;

// =======================================================================
// Command codes
// =======================================================================

/// Beacon announcement (server presence).
pub const CMD_BEACON: u8 = 0;
/// Connection validation handshake.
pub const CMD_CONNECTION_VALIDATION: u8 = 1;
/// Echo request/reply.
pub const CMD_ECHO: u8 = 2;

// =======================================================================
// Beacon timing
// =======================================================================

/// Lower bound for the fast beacon period, in seconds.
pub const MIN_BEACON_PERIOD: f64 = 1.0;

/// Slow beacon period, in seconds, used once the count limit is reached.
pub const SLOW_BEACON_PERIOD: f64 = 180.0;

/// Number of fast beacons emitted before switching to the slow period.
pub const BEACON_COUNT_LIMIT: u16 = 10;

/// Lower bound for the beacon count limit.
pub const MIN_BEACON_COUNT_LIMIT: u16 = 3;

/// Runtime beacon tuning with clamped bounds.
///
/// The fast period is configurable (programmatically or via the
/// `PVNET_BEACON_PERIOD` environment variable); the slow period and count
/// limit are fixed at their compiled defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconConfig {
    /// Period between beacons until the count limit is reached.
    pub fast_period: Duration,
    /// Period between beacons after the count limit is reached.
    pub slow_period: Duration,
    /// Beacon count at which the cadence switches from fast to slow.
    pub count_limit: u16,
}

impl BeaconConfig {
    /// Build a configuration from a requested fast period in seconds.
    ///
    /// Clamps: fast >= 1 s, slow = max(180 s, fast), limit = max(10, 3).
    pub fn new(fast_period_secs: f64) -> Self {
        let fast = fast_period_secs.max(MIN_BEACON_PERIOD);
        let slow = SLOW_BEACON_PERIOD.max(fast);
        BeaconConfig {
            fast_period: Duration::from_secs_f64(fast),
            slow_period: Duration::from_secs_f64(slow),
            count_limit: BEACON_COUNT_LIMIT.max(MIN_BEACON_COUNT_LIMIT),
        }
    }

    /// Build a configuration from `PVNET_BEACON_PERIOD` (seconds), falling
    /// back to the minimum fast period when unset or unparsable.
    pub fn from_env() -> Self {
        let fast = std::env::var("PVNET_BEACON_PERIOD")
            .ok()
            .and_then(|raw| match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => {
                    log::debug!(
                        "[config] ignoring invalid PVNET_BEACON_PERIOD='{}'",
                        raw
                    );
                    None
                }
            })
            .unwrap_or(MIN_BEACON_PERIOD);
        Self::new(fast)
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self::new(MIN_BEACON_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_period_clamped_to_minimum() {
        let config = BeaconConfig::new(0.01);
        assert_eq!(config.fast_period, Duration::from_secs(1));
    }

    #[test]
    fn test_slow_period_never_below_fast() {
        let config = BeaconConfig::new(600.0);
        assert_eq!(config.fast_period, Duration::from_secs(600));
        assert_eq!(config.slow_period, Duration::from_secs(600));
    }

    #[test]
    fn test_defaults() {
        let config = BeaconConfig::default();
        assert_eq!(config.fast_period, Duration::from_secs(1));
        assert_eq!(config.slow_period, Duration::from_secs(180));
        assert_eq!(config.count_limit, 10);
    }
}
