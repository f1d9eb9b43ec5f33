//! Browser driver settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Run without a visible window (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Ready-state wait and remote command timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// IANA timezone reported to pages.
    #[serde(default = "default_timezone")]
    pub timezone: Option<String>,
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

fn default_timezone() -> Option<String> {
    Some("Asia/Kolkata".to_string())
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            remote_url: None,
            timezone: default_timezone(),
        }
    }
}
