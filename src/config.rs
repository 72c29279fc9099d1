//! Bridge configuration.

use crate::binary::DEFAULT_MAX_FRAME_LEN;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default backend address (the voice server running on the same host).
pub const DEFAULT_BACKEND_ADDR: &str = "127.0.0.1:64738";

/// Settings shared by every bridging session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// `host:port` of the voice server.
    pub backend_addr: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// Samples pushed to a playout track per drain tick (10 ms at 48 kHz).
    pub playout_frame_samples: usize,
    /// Samples per encoded outbound frame; a multiple of the playout frame.
    pub egress_frame_samples: usize,
    /// Decoded frames buffered per remote speaker. The server may deliver up
    /// to four packets back to back, so at least five are needed.
    pub jitter_slots: usize,
    /// Largest frame payload accepted from the backend.
    pub max_frame_len: usize,
    /// Append an all-zero position block to outbound voice frames.
    pub send_position: bool,
    pub opus_bitrate_bps: u32,
    pub opus_complexity: u8,
    /// Depth of each session's input queue (capture, peer data, control).
    pub input_queue_depth: usize,
    /// Frames queued for the backend before new ones are dropped.
    pub backend_queue_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend_addr: DEFAULT_BACKEND_ADDR.to_string(),
            sample_rate: 48_000,
            channels: 1,
            playout_frame_samples: 480,
            egress_frame_samples: 480,
            jitter_slots: 5,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            send_position: false,
            opus_bitrate_bps: 40_000,
            opus_complexity: 9,
            input_queue_depth: 256,
            backend_queue_depth: 256,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(Error::Config("sample rate and channels must be non-zero".into()));
        }
        if self.playout_frame_samples == 0 {
            return Err(Error::Config("playout frame must be non-empty".into()));
        }
        if self.egress_frame_samples == 0
            || self.egress_frame_samples % self.playout_frame_samples != 0
        {
            return Err(Error::Config(format!(
                "egress frame ({}) must be a multiple of the playout frame ({})",
                self.egress_frame_samples, self.playout_frame_samples
            )));
        }
        if !(5..=64).contains(&self.jitter_slots) {
            return Err(Error::Config(format!(
                "jitter_slots must be within 5..=64, got {}",
                self.jitter_slots
            )));
        }
        if self.max_frame_len == 0 || self.input_queue_depth == 0 || self.backend_queue_depth == 0 {
            return Err(Error::Config(
                "max_frame_len and queue depths must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Interval between two playout drains.
    pub fn playout_period(&self) -> Duration {
        let samples_per_channel = self.playout_frame_samples as u64 / self.channels.max(1) as u64;
        Duration::from_micros(samples_per_channel * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_and_ticks_every_10ms() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.playout_period(), Duration::from_millis(10));
    }

    #[test]
    fn egress_frame_must_align_with_playout_frame() {
        let config = BridgeConfig {
            egress_frame_samples: 1920,
            ..BridgeConfig::default()
        };
        config.validate().unwrap();

        let config = BridgeConfig {
            egress_frame_samples: 500,
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn too_few_jitter_slots_rejected() {
        let config = BridgeConfig {
            jitter_slots: 4,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_backend_queue_rejected() {
        let config = BridgeConfig {
            backend_queue_depth: 0,
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
