//! Recognition of device-vanished errors
//!
//! Native layers report an unplugged device as an ordinary error message. The
//! set of messages that mean "unplugged" differs per platform, so it is
//! injected rather than hard-coded.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectSignals {
    messages: HashSet<String>,
}

impl Default for DisconnectSignals {
    fn default() -> Self {
        Self::new(["I/O error"])
    }
}

impl DisconnectSignals {
    pub fn new<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            messages: messages.into_iter().map(Into::into).collect(),
        }
    }

    /// Recognize nothing; every exchange error propagates unchanged
    pub fn none() -> Self {
        Self {
            messages: HashSet::new(),
        }
    }

    pub fn with_signal(mut self, message: impl Into<String>) -> Self {
        self.messages.insert(message.into());
        self
    }

    /// Exact match on the full native message
    pub fn matches(&self, message: &str) -> bool {
        self.messages.contains(message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<&crate::TransportConfig> for DisconnectSignals {
    fn from(config: &crate::TransportConfig) -> Self {
        Self::new(config.disconnect_signals.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_signals() {
        let signals = DisconnectSignals::default();
        assert!(signals.matches("I/O error"));
        assert!(!signals.matches("i/o error"));
        assert!(!signals.matches("I/O error: timeout"));
    }

    #[test]
    fn test_extend_signals() {
        let signals = DisconnectSignals::default().with_signal("No such device");
        assert_eq!(signals.len(), 2);
        assert!(signals.matches("No such device"));
    }

    #[test]
    fn test_from_config() {
        let config = crate::TransportConfig {
            disconnect_signals: vec!["gone".to_string()],
            ..Default::default()
        };
        let signals = DisconnectSignals::from(&config);
        assert!(signals.matches("gone"));
        assert!(!signals.matches("I/O error"));
        assert!(DisconnectSignals::none().is_empty());
    }
}
