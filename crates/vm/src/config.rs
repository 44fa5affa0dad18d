//! VM resource limits and LLM client settings
//!
//! Every limit is a hard cap: the interpreter fails the instruction that
//! would exceed it rather than truncating. A limit of zero is rejected
//! at construction.
//!
//! ## Environment variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `OLLAMA_HOST` | Base URL of the LLM endpoint |
//! | `OLLAMA_MODEL` | Default model identifier |

use sovereign_core::ConfigError;
use std::time::Duration;

/// Resource bounds and LLM settings for one VM instance.
#[derive(Debug, Clone, PartialEq)]
pub struct VmConfig {
    /// Cap on data-stack depth
    pub max_stack_size: usize,
    /// Cap on control-stack depth
    pub max_control_depth: usize,
    /// Cap on distinct memory keys
    pub max_memory_entries: usize,
    /// Cap on dispatched instructions per `run` call
    pub max_execution_steps: u64,
    /// Semantic cap on nested calls (equals the control-stack limit by
    /// default)
    pub max_call_depth: usize,
    /// Deadline applied to every LLM invocation
    pub llm_request_timeout: Duration,
    /// LLM endpoint base URL
    pub llm_endpoint: String,
    /// Default model identifier
    pub default_model: String,
}

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen2.5-coder";

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_stack_size: 1024,
            max_control_depth: 256,
            max_memory_entries: 4096,
            max_execution_steps: 100_000,
            max_call_depth: 256,
            llm_request_timeout: Duration::from_secs(30),
            llm_endpoint: DEFAULT_ENDPOINT.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl VmConfig {
    /// Defaults with endpoint and model overridden from the environment.
    pub fn from_env() -> Self {
        let mut config = VmConfig::default();
        if let Some(host) = std::env::var("OLLAMA_HOST").ok().filter(|s| !s.is_empty()) {
            config.llm_endpoint = host;
        }
        if let Some(model) = std::env::var("OLLAMA_MODEL").ok().filter(|s| !s.is_empty()) {
            config.default_model = model;
        }
        config
    }

    /// Tight limits for validating evolution candidates.
    pub fn sandbox() -> Self {
        VmConfig {
            max_stack_size: 100,
            max_control_depth: 20,
            max_memory_entries: 1000,
            max_execution_steps: 1000,
            max_call_depth: 20,
            llm_request_timeout: Duration::from_secs(1),
            ..VmConfig::default()
        }
    }

    /// Reject zero limits and a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn nonzero(value: u64, name: &str) -> Result<(), ConfigError> {
            if value == 0 {
                Err(ConfigError::new(format!("{} must be positive", name)))
            } else {
                Ok(())
            }
        }
        nonzero(self.max_stack_size as u64, "max_stack_size")?;
        nonzero(self.max_control_depth as u64, "max_control_depth")?;
        nonzero(self.max_memory_entries as u64, "max_memory_entries")?;
        nonzero(self.max_execution_steps, "max_execution_steps")?;
        nonzero(self.max_call_depth as u64, "max_call_depth")?;
        if self.llm_request_timeout.is_zero() {
            return Err(ConfigError::new("llm_request_timeout must be positive"));
        }
        if self.llm_endpoint.is_empty() {
            return Err(ConfigError::new("llm_endpoint must not be empty"));
        }
        Ok(())
    }
}
