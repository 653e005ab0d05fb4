// src/config/credentials.rs
use std::fmt;

use tracing::warn;

use crate::delivery::{Destination, Routes};
use crate::error::ConfigError;

pub const ENV_VK_TOKEN: &str = "VK_TOKEN";
pub const ENV_WEBHOOK: &str = "DISCORD_WEBHOOK";
pub const ENV_THREAD_WEBHOOK: &str = "DISCORD_THREAD_WEBHOOK";
pub const ENV_THREAD_ID: &str = "DISCORD_THREAD_ID";

/// Secrets and webhook routes. Only ever read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub vk_token: String,
    pub routes: Routes,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Credentials::from_env`] over an arbitrary variable source.
    /// Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let vk_token = get(ENV_VK_TOKEN).ok_or(ConfigError::MissingVar(ENV_VK_TOKEN))?;
        let main = get(ENV_WEBHOOK)
            .map(Destination::new)
            .ok_or(ConfigError::MissingVar(ENV_WEBHOOK))?;
        check_destination(ENV_WEBHOOK, &main)?;

        let thread_id = get(ENV_THREAD_ID);
        let calendar = match get(ENV_THREAD_WEBHOOK) {
            Some(url) => {
                let dest = Destination {
                    webhook_url: url,
                    thread_id,
                };
                check_destination(ENV_THREAD_WEBHOOK, &dest)?;
                Some(dest)
            }
            None => {
                if thread_id.is_some() {
                    warn!("{ENV_THREAD_ID} is set without {ENV_THREAD_WEBHOOK}; ignoring it");
                }
                None
            }
        };

        Ok(Self {
            vk_token,
            routes: Routes { main, calendar },
        })
    }
}

/// Fail at startup on a webhook that could never be posted to.
pub(crate) fn check_destination(field: &'static str, dest: &Destination) -> Result<(), ConfigError> {
    dest.endpoint().map(|_| ()).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

/// `abcdefghij...uvwxyz0123` style masking for logs.
pub fn mask(value: &str) -> String {
    let n = value.chars().count();
    if n <= 20 {
        return "*".repeat(n);
    }
    let head: String = value.chars().take(10).collect();
    let tail: String = value.chars().skip(n - 10).collect();
    format!("{head}...{tail}")
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("vk_token", &mask(&self.vk_token))
            .field("main_webhook", &mask(&self.routes.main.webhook_url))
            .field(
                "calendar_webhook",
                &self.routes.calendar.as_ref().map(|d| mask(&d.webhook_url)),
            )
            .finish()
    }
}
