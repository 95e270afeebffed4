//! Proxy settings and `http_proxy` synthesis
//!
//! The proxy password is kept in an obfuscated storage form and only turned
//! back into cleartext when the decoder environment is built. The storage form
//! is base64, which keeps it out of casual sight in config files but is not
//! encryption.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{PlaybackError, Result};

/// Secret held in its at-rest form
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObfuscatedSecret(String);

impl ObfuscatedSecret {
    /// Wrap a value read from storage
    pub fn from_stored(stored: impl Into<String>) -> Self {
        Self(stored.into())
    }

    /// Obfuscate a cleartext value for storage
    pub fn obfuscate(plain: &str) -> Self {
        Self(STANDARD.encode(plain.as_bytes()))
    }

    /// At-rest form
    pub fn stored(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Recover the cleartext value
    pub fn reveal(&self) -> Result<String> {
        let bytes = STANDARD
            .decode(self.0.trim())
            .map_err(|e| PlaybackError::Settings(format!("proxy password: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| PlaybackError::Settings(format!("proxy password: {}", e)))
    }
}

impl fmt::Debug for ObfuscatedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObfuscatedSecret(***)")
    }
}

/// Network proxy used by the decoder for streamed tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Empty login means an anonymous proxy
    #[serde(default)]
    pub login: String,

    #[serde(default)]
    pub password: ObfuscatedSecret,
}

fn default_host() -> String {
    "proxy".to_string()
}

fn default_port() -> u16 {
    3128
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            login: String::new(),
            password: ObfuscatedSecret::default(),
        }
    }
}

impl ProxySettings {
    /// Value for the `http_proxy` variable, `None` when the proxy is off
    ///
    /// Format: `http://[login:password@]host:port`, with login and password
    /// percent-encoded.
    pub fn http_proxy(&self) -> Result<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        let host = self.host.trim();
        if host.is_empty() {
            return Err(PlaybackError::Settings("proxy host is empty".to_string()));
        }
        let mut url = Url::parse(&format!("http://{}:{}", host, self.port))
            .map_err(|e| PlaybackError::Settings(format!("proxy address: {}", e)))?;
        if url.path() != "/" || url.query().is_some() {
            return Err(PlaybackError::Settings(format!(
                "proxy host '{}' is not a host name",
                host
            )));
        }

        let login = self.login.trim();
        if !login.is_empty() {
            let password = self.password.reveal()?;
            let rejected = || PlaybackError::Settings("proxy credentials rejected".to_string());
            url.set_username(login).map_err(|()| rejected())?;
            url.set_password(Some(&password)).map_err(|()| rejected())?;
        }

        let mut value = String::from(url);
        // Url always serializes a root path
        if value.ends_with('/') {
            value.pop();
        }
        Ok(Some(value))
    }

    /// Same shape as `http_proxy()` with the password masked, for logs
    pub fn masked(&self) -> String {
        let login = self.login.trim();
        if login.is_empty() {
            format!("http://{}:{}", self.host.trim(), self.port)
        } else {
            format!("http://{}:***@{}:{}", login, self.host.trim(), self.port)
        }
    }
}
