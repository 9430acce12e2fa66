//! Configuration of the partial escape analysis phase.

use std::env;
use std::str::FromStr;

/// Configuration for [`super::PartialEscapePhase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeaConfig {
    /// Run the phase at all.
    pub enabled: bool,

    /// Maximum discovery/mutation rounds per graph.
    pub max_rounds: usize,

    /// Longest constant-length array that is tracked.
    pub max_array_length: usize,

    /// Fold constants after each mutating round.
    pub canonicalize: bool,

    /// Verify the graph after each mutating round.
    pub verify: bool,

    /// Log every processed node and merged state at trace level.
    pub trace: bool,
}

impl Default for PeaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rounds: 3,
            max_array_length: 32,
            canonicalize: true,
            verify: cfg!(debug_assertions),
            trace: false,
        }
    }
}

impl PeaConfig {
    /// Configuration for tests: verification always on.
    pub fn for_testing() -> Self {
        Self {
            verify: true,
            ..Self::default()
        }
    }

    /// Read overrides from `PEA_ENABLED`, `PEA_MAX_ROUNDS`,
    /// `PEA_MAX_ARRAY_LENGTH` and `PEA_TRACE`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(enabled) = parse_flag("PEA_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(rounds) = parse_var("PEA_MAX_ROUNDS") {
            config.max_rounds = rounds;
        }
        if let Some(length) = parse_var("PEA_MAX_ARRAY_LENGTH") {
            config.max_array_length = length;
        }
        if let Some(trace) = parse_flag("PEA_TRACE") {
            config.trace = trace;
        }
        config
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok()?.trim().parse().ok()
}

fn parse_flag(name: &str) -> Option<bool> {
    match env::var(name).ok()?.trim() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PeaConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.max_array_length, 32);
        assert!(PeaConfig::for_testing().verify);
    }

    #[test]
    fn test_from_env_overrides() {
        env::set_var("PEA_MAX_ROUNDS", "5");
        env::set_var("PEA_TRACE", "on");
        env::set_var("PEA_MAX_ARRAY_LENGTH", "not a number");
        let config = PeaConfig::from_env();
        env::remove_var("PEA_MAX_ROUNDS");
        env::remove_var("PEA_TRACE");
        env::remove_var("PEA_MAX_ARRAY_LENGTH");

        assert_eq!(config.max_rounds, 5);
        assert!(config.trace);
        assert_eq!(config.max_array_length, 32);
    }
}
