use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Excavator process and API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcavatorConfig {
    /// Path to the excavator executable
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Address the API listens on
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// First API port handed out; each instance gets its own port
    #[serde(default = "default_api_port_base")]
    pub api_port_base: u16,

    /// Number of ports available above `api_port_base`
    #[serde(default = "default_api_port_span")]
    pub api_port_span: u16,

    /// TCP connect timeout (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Response timeout (milliseconds)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Extra command line arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ExcavatorConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            api_host: default_api_host(),
            api_port_base: default_api_port_base(),
            api_port_span: default_api_port_span(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            extra_args: Vec::new(),
        }
    }
}

impl ExcavatorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Port for the n-th launched instance
    pub fn port_for(&self, sequence: u64) -> u16 {
        let span = u64::from(self.api_port_span.max(1));
        self.api_port_base.saturating_add((sequence % span) as u16)
    }
}

// Default value functions for serde
fn default_executable() -> PathBuf { PathBuf::from("excavator") }
fn default_api_host() -> String { "127.0.0.1".to_string() }
fn default_api_port_base() -> u16 { 3456 }
fn default_api_port_span() -> u16 { 64 }
fn default_connect_timeout_ms() -> u64 { 1000 }
fn default_response_timeout_ms() -> u64 { 5000 }
