//! Decoder settings supplied by the configuration store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{PlaybackError, Result};
use crate::proxy::ProxySettings;

/// How to launch and talk to the external decoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderSettings {
    /// Executable name or forced path (default: mplayer)
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Argument template; `{file}` and `{start}` (seconds) are substituted
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Extra user arguments, whitespace separated, inserted before the template
    #[serde(default)]
    pub extra_args: String,

    /// Extra environment, space separated `key=value` tokens
    #[serde(default)]
    pub env_variables: String,

    /// Ask the decoder to normalize volume
    #[serde(default)]
    pub use_volume_normalization: bool,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub protocol: ProtocolSettings,
}

fn default_program() -> PathBuf {
    PathBuf::from("mplayer")
}

fn default_args() -> Vec<String> {
    ["-quiet", "-slave", "-ss", "{start}", "{file}"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            extra_args: String::new(),
            env_variables: String::new(),
            use_volume_normalization: false,
            proxy: ProxySettings::default(),
            protocol: ProtocolSettings::default(),
        }
    }
}

impl DecoderSettings {
    /// Environment overlay for the decoder: user variables, then `http_proxy`
    pub fn environment(&self) -> Result<BTreeMap<String, String>> {
        let mut env = parse_env_variables(&self.env_variables)?;
        if let Some(proxy) = self.proxy.http_proxy()? {
            tracing::debug!("Using proxy settings: {}", self.proxy.masked());
            env.insert("http_proxy".to_string(), proxy);
        }
        Ok(env)
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.as_os_str().is_empty() {
            return Err(PlaybackError::Settings(
                "decoder program is empty".to_string(),
            ));
        }
        if !self.args.iter().any(|a| a.contains("{file}")) {
            return Err(PlaybackError::Settings(
                "decoder arguments must contain {file}".to_string(),
            ));
        }
        parse_env_variables(&self.env_variables)?;
        crate::protocol::ResponseRules::compile(&self.protocol)?;
        Ok(())
    }
}

/// Parse `var1=xxx var2=yyy` into a map
///
/// Values may contain `=`; a token without `=` is rejected.
pub fn parse_env_variables(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for token in raw.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                env.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(PlaybackError::Settings(format!(
                    "malformed environment token '{}'",
                    token
                )))
            }
        }
    }
    Ok(env)
}

/// Decoder-specific command verbs and response patterns
///
/// Defaults match mplayer slave mode. `{value}` is substituted in `seek`
/// (percent) and `volume` (0-100).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSettings {
    #[serde(default = "default_quit")]
    pub quit: String,

    #[serde(default = "default_pause")]
    pub pause: String,

    /// mplayer toggles pause with the same verb
    #[serde(default = "default_pause")]
    pub resume: String,

    #[serde(default = "default_seek")]
    pub seek: String,

    #[serde(default = "default_volume")]
    pub volume: String,

    #[serde(default = "default_query_length")]
    pub query_length: String,

    #[serde(default = "default_query_position")]
    pub query_position: String,

    #[serde(default = "default_end_pattern")]
    pub end_pattern: String,

    #[serde(default = "default_start_pattern")]
    pub start_pattern: String,

    /// First capture group is the position in seconds
    #[serde(default = "default_position_pattern")]
    pub position_pattern: String,

    /// First capture group is the length in seconds
    #[serde(default = "default_length_pattern")]
    pub length_pattern: String,
}

fn default_quit() -> String {
    "quit".to_string()
}

fn default_pause() -> String {
    "pause".to_string()
}

fn default_seek() -> String {
    "seek {value} 1".to_string()
}

fn default_volume() -> String {
    "volume {value} 1".to_string()
}

fn default_query_length() -> String {
    "get_time_length".to_string()
}

fn default_query_position() -> String {
    "get_time_pos".to_string()
}

fn default_end_pattern() -> String {
    r"^Exiting.*End".to_string()
}

fn default_start_pattern() -> String {
    r"Starting playback".to_string()
}

fn default_position_pattern() -> String {
    r"ANS_TIME_POSITION=(-?[0-9]+(?:\.[0-9]+)?)".to_string()
}

fn default_length_pattern() -> String {
    r"ANS_LENGTH=([0-9]+(?:\.[0-9]+)?)".to_string()
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            quit: default_quit(),
            pause: default_pause(),
            resume: default_pause(),
            seek: default_seek(),
            volume: default_volume(),
            query_length: default_query_length(),
            query_position: default_query_position(),
            end_pattern: default_end_pattern(),
            start_pattern: default_start_pattern(),
            position_pattern: default_position_pattern(),
            length_pattern: default_length_pattern(),
        }
    }
}
