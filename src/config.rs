//! Link configuration.
//!
//! Everything the core consumes from configuration. The peer-dependent
//! limits (`nicklen` and friends) are not configured; they arrive in the
//! capability advertisement.

use serde::Deserialize;

use crate::error::{ProtocolError, Result};

fn default_realname() -> String {
    "services client".to_string()
}

/// Configuration for one uplink.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Our SID, 3 characters from `[A-Z0-9]`.
    pub sid: String,
    /// The server name we introduce ourselves as.
    pub hostname: String,
    /// Password we send in our `SERVER` introduction.
    pub sendpass: String,
    /// Password the uplink must present in its `SERVER` introduction.
    pub recvpass: String,
    /// Our server description.
    pub serverdesc: String,
    /// Default realname for spawned clients.
    #[serde(default = "default_realname")]
    pub realname: String,
}

impl LinkConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ProtocolError::InvalidArgument(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}
