//! Caller policy knobs for observational memory.
//!
//! The engine never decides when to observe or reflect; these values are
//! carried on each record (opaquely, as JSON) so the calling agent loop can
//! read its policy back and build activation parameters from it.

use obsmem_state::MemoryScope;
use serde::{Deserialize, Serialize};

use crate::activation::ActivationParams;
use crate::error::{OmError, OmResult};

/// Policy configuration for one observational memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// Raw-message token budget before observation is due.
    pub message_tokens_threshold: u64,
    /// Pending-token interval at which a buffered observation cycle starts.
    pub buffer_tokens: u64,
    /// Fraction of `message_tokens_threshold` released per activation.
    pub buffer_activation: f64,
    /// Active-observation token budget before reflection is due.
    pub reflection_tokens_threshold: u64,
    pub scope: MemoryScope,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            message_tokens_threshold: 30_000,
            buffer_tokens: 6_000,
            buffer_activation: 0.8,
            reflection_tokens_threshold: 40_000,
            scope: MemoryScope::Thread,
        }
    }
}

impl ObservationConfig {
    pub fn with_message_tokens_threshold(mut self, tokens: u64) -> Self {
        self.message_tokens_threshold = tokens;
        self
    }

    pub fn with_buffer_tokens(mut self, tokens: u64) -> Self {
        self.buffer_tokens = tokens;
        self
    }

    pub fn with_buffer_activation(mut self, ratio: f64) -> Self {
        self.buffer_activation = ratio;
        self
    }

    pub fn with_reflection_tokens_threshold(mut self, tokens: u64) -> Self {
        self.reflection_tokens_threshold = tokens;
        self
    }

    pub fn with_scope(mut self, scope: MemoryScope) -> Self {
        self.scope = scope;
        self
    }

    /// Create from environment variables, starting from the defaults.
    ///
    /// Reads:
    /// - OBSMEM_MESSAGE_TOKENS
    /// - OBSMEM_BUFFER_TOKENS
    /// - OBSMEM_BUFFER_ACTIVATION
    /// - OBSMEM_REFLECTION_TOKENS
    /// - OBSMEM_SCOPE ("thread" | "resource")
    pub fn from_env() -> OmResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> OmResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("OBSMEM_MESSAGE_TOKENS") {
            cfg.message_tokens_threshold = parse_var("OBSMEM_MESSAGE_TOKENS", &v)?;
        }
        if let Some(v) = lookup("OBSMEM_BUFFER_TOKENS") {
            cfg.buffer_tokens = parse_var("OBSMEM_BUFFER_TOKENS", &v)?;
        }
        if let Some(v) = lookup("OBSMEM_BUFFER_ACTIVATION") {
            cfg.buffer_activation = parse_var("OBSMEM_BUFFER_ACTIVATION", &v)?;
        }
        if let Some(v) = lookup("OBSMEM_REFLECTION_TOKENS") {
            cfg.reflection_tokens_threshold = parse_var("OBSMEM_REFLECTION_TOKENS", &v)?;
        }
        if let Some(v) = lookup("OBSMEM_SCOPE") {
            cfg.scope = v.parse().map_err(OmError::Config)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> OmResult<()> {
        if !(0.0..=1.0).contains(&self.buffer_activation) {
            return Err(OmError::Config(format!(
                "buffer_activation must be within [0, 1], got {}",
                self.buffer_activation
            )));
        }
        if self.message_tokens_threshold == 0 {
            return Err(OmError::Config(
                "message_tokens_threshold must be greater than zero".to_string(),
            ));
        }
        if self.reflection_tokens_threshold == 0 {
            return Err(OmError::Config(
                "reflection_tokens_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Opaque form stored on the record.
    pub fn to_record_config(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Read a config back from a record's opaque field. Missing keys take defaults.
    pub fn from_record_config(value: &serde_json::Value) -> OmResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| OmError::Config(e.to_string()))
    }

    /// Activation parameters for the configured ratio and threshold.
    pub fn activation_params(&self, current_pending_tokens: u64) -> ActivationParams {
        ActivationParams::new(
            self.buffer_activation,
            self.message_tokens_threshold,
            current_pending_tokens,
        )
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> OmResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| OmError::Config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = ObservationConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.buffer_activation, 0.8);
        assert_eq!(cfg.scope, MemoryScope::Thread);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let cfg = ObservationConfig::from_lookup(lookup(&[
            ("OBSMEM_MESSAGE_TOKENS", "5000"),
            ("OBSMEM_BUFFER_ACTIVATION", "0.5"),
            ("OBSMEM_SCOPE", "resource"),
        ]))
        .unwrap();
        assert_eq!(cfg.message_tokens_threshold, 5000);
        assert_eq!(cfg.buffer_activation, 0.5);
        assert_eq!(cfg.scope, MemoryScope::Resource);
        assert_eq!(cfg.buffer_tokens, 6_000);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = ObservationConfig::from_lookup(lookup(&[("OBSMEM_BUFFER_TOKENS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("OBSMEM_BUFFER_TOKENS"));

        let err = ObservationConfig::from_lookup(lookup(&[("OBSMEM_BUFFER_ACTIVATION", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, OmError::Config(_)));
    }

    #[test]
    fn test_record_config_round_trip_fills_missing_keys() {
        let partial = serde_json::json!({"buffer_tokens": 1234});
        let cfg = ObservationConfig::from_record_config(&partial).unwrap();
        assert_eq!(cfg.buffer_tokens, 1234);
        assert_eq!(cfg.message_tokens_threshold, 30_000);

        let stored = cfg.to_record_config();
        assert_eq!(ObservationConfig::from_record_config(&stored).unwrap(), cfg);
        assert_eq!(
            ObservationConfig::from_record_config(&serde_json::Value::Null).unwrap(),
            ObservationConfig::default()
        );
    }

    #[test]
    fn test_activation_params_from_config() {
        let cfg = ObservationConfig::default()
            .with_message_tokens_threshold(5000)
            .with_buffer_activation(0.8);
        let params = cfg.activation_params(6000);
        assert_eq!(params.message_tokens_threshold, 5000);
        assert_eq!(params.current_pending_tokens, 6000);
        assert!(!params.force_max_activation);
    }
}
