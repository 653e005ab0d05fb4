// src/config/mod.rs
pub mod credentials;
pub mod settings;

pub use credentials::Credentials;
pub use settings::{BotSettings, ChannelEntry, DeliverySettings, RawChannelId, Settings};

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::ConfigError;

/// Inline settings (TOML or JSON), handy on PaaS hosts without a filesystem.
pub const ENV_INLINE: &str = "RELAY_CONFIG";
/// Explicit settings file path.
pub const ENV_PATH: &str = "RELAY_CONFIG_PATH";

const FALLBACK_TOML: &str = "config/relay.toml";
const FALLBACK_JSON: &str = "config/relay.json";

/// Load settings from an explicit path. Supports TOML or JSON formats.
pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_settings(&content, ext.as_str())
}

/// Load settings using env vars + fallbacks:
/// 1) $RELAY_CONFIG (inline content)
/// 2) $RELAY_CONFIG_PATH (must exist)
/// 3) config/relay.toml
/// 4) config/relay.json
/// 5) built-in defaults (no channels)
pub fn load_settings_default() -> Result<Settings, ConfigError> {
    if let Some(inline) = std::env::var(ENV_INLINE).ok().filter(|s| !s.trim().is_empty()) {
        info!("settings loaded from ${ENV_INLINE}");
        return parse_settings(&inline, "");
    }
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(ConfigError::MissingFile {
                var: ENV_PATH,
                path: pb,
            });
        }
        info!(path = %pb.display(), "settings loaded");
        return load_settings_from(&pb);
    }
    for fallback in [FALLBACK_TOML, FALLBACK_JSON] {
        let pb = PathBuf::from(fallback);
        if pb.exists() {
            info!(path = %pb.display(), "settings loaded");
            return load_settings_from(&pb);
        }
    }
    warn!("no settings file found, using defaults");
    Ok(Settings::default())
}

fn parse_settings(s: &str, hint_ext: &str) -> Result<Settings, ConfigError> {
    let settings = parse_any(s, hint_ext)?;
    settings.validate()?;
    Ok(settings)
}

fn parse_any(s: &str, hint_ext: &str) -> Result<Settings, ConfigError> {
    if hint_ext == "json" {
        return serde_json::from_str(s).map_err(|e| ConfigError::Parse(format!("json: {e}")));
    }
    // TOML first, JSON fallback.
    match toml::from_str::<Settings>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => match serde_json::from_str::<Settings>(s) {
            Ok(v) => Ok(v),
            Err(_) if hint_ext == "toml" => Err(ConfigError::Parse(format!("toml: {toml_err}"))),
            Err(json_err) => Err(ConfigError::Parse(format!(
                "neither toml ({toml_err}) nor json ({json_err})"
            ))),
        },
    }
}
