//! Transport configuration
//!
//! Embedded as the `[transport]` table of the CLI configuration file, but
//! usable on its own by library callers.

use devices::LEDGER_USB_VENDOR_ID;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Only descriptors with this vendor id are visible
    #[serde(default = "TransportConfig::default_vendor_id")]
    pub vendor_id: u16,
    /// Native error messages that mean the device was unplugged
    #[serde(default = "TransportConfig::default_disconnect_signals")]
    pub disconnect_signals: Vec<String>,
    /// Window after a snapshot during which duplicate live events are dropped
    #[serde(default = "TransportConfig::default_race_window_ms")]
    pub race_window_ms: u64,
    /// Per-subscriber buffer of the live event feed
    #[serde(default = "TransportConfig::default_live_buffer")]
    pub live_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            disconnect_signals: Self::default_disconnect_signals(),
            race_window_ms: Self::default_race_window_ms(),
            live_buffer: Self::default_live_buffer(),
        }
    }
}

impl TransportConfig {
    fn default_vendor_id() -> u16 {
        LEDGER_USB_VENDOR_ID
    }

    fn default_disconnect_signals() -> Vec<String> {
        vec!["I/O error".to_string()]
    }

    fn default_race_window_ms() -> u64 {
        500
    }

    fn default_live_buffer() -> usize {
        64
    }

    pub fn race_window(&self) -> Duration {
        Duration::from_millis(self.race_window_ms)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> crate::Result<()> {
        if self.live_buffer == 0 {
            return Err(crate::Error::Config(
                "live_buffer must be greater than zero".to_string(),
            ));
        }

        if self.disconnect_signals.iter().any(|s| s.trim().is_empty()) {
            return Err(crate::Error::Config(
                "Empty entry in disconnect_signals".to_string(),
            ));
        }

        Ok(())
    }
}
