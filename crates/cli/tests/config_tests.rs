//! Integration tests for configuration parsing
//!
//! Tests the `ledger-hid` configuration file, including:
//! - Minimal and full documents
//! - Defaults for omitted sections
//! - Invalid configuration handling
//! - Save/load round trip through the filesystem

use cli::CliConfig;
use std::time::Duration;

mod parsing {
    use super::*;

    const FULL_CONFIG: &str = r#"
[logging]
level = "debug"

[transport]
vendor_id = 0x2c97
disconnect_signals = ["I/O error", "No such device"]
race_window_ms = 250
live_buffer = 16

[usb]
exchange_timeout_ms = 2000
hid_interface = 0
poll_interval_ms = 500
"#;

    #[test]
    fn test_full_config() {
        let config = CliConfig::from_toml(FULL_CONFIG).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.transport.vendor_id, 0x2c97);
        assert_eq!(
            config.transport.disconnect_signals,
            vec!["I/O error".to_string(), "No such device".to_string()]
        );
        assert_eq!(config.transport.race_window(), Duration::from_millis(250));
        assert_eq!(config.transport.live_buffer, 16);
        assert_eq!(config.usb.exchange_timeout(), Duration::from_secs(2));
        assert_eq!(config.usb.hid_interface, Some(0));
        assert_eq!(config.usb.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CliConfig::from_toml("").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.transport.vendor_id, 0x2c97);
        assert_eq!(config.transport.disconnect_signals, vec!["I/O error"]);
        assert_eq!(config.transport.race_window(), Duration::from_millis(500));
        assert_eq!(config.usb.exchange_timeout_ms, 5000);
        assert_eq!(config.usb.hid_interface, None);
        assert_eq!(config.usb.poll_interval_ms, 1000);
    }

    #[test]
    fn test_partial_section() {
        let config = CliConfig::from_toml(
            r#"
[transport]
disconnect_signals = []
"#,
        )
        .unwrap();

        assert!(config.transport.disconnect_signals.is_empty());
        assert_eq!(config.transport.live_buffer, 64);
    }
}

mod validation {
    use super::*;

    #[test]
    fn test_invalid_log_level() {
        let result = CliConfig::from_toml(
            r#"
[logging]
level = "loud"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_live_buffer() {
        let result = CliConfig::from_toml(
            r#"
[transport]
live_buffer = 0
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_disconnect_signal() {
        let result = CliConfig::from_toml(
            r#"
[transport]
disconnect_signals = ["  "]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeouts() {
        assert!(CliConfig::from_toml("[usb]\nexchange_timeout_ms = 0\n").is_err());
        assert!(CliConfig::from_toml("[usb]\npoll_interval_ms = 0\n").is_err());
    }

    #[test]
    fn test_vendor_id_out_of_range() {
        assert!(CliConfig::from_toml("[transport]\nvendor_id = 70000\n").is_err());
    }
}

mod persistence {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        config.logging.level = "trace".to_string();
        config.usb.hid_interface = Some(1);
        config.save(&path).unwrap();

        let loaded = CliConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.logging.level, "trace");
        assert_eq!(loaded.usb.hid_interface, Some(1));
        assert_eq!(loaded.transport, config.transport);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(dir.path().join("missing.toml"))).is_err());
    }
}
