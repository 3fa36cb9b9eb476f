use super::SettingsError;
use std::fmt;

pub const REST_URL_VAR: &str = "KRAKEN_API_SPOT_REST_URL";
pub const API_KEY_VAR: &str = "KRAKEN_API_SPOT_PUBLIC";
pub const API_SECRET_VAR: &str = "KRAKEN_API_SPOT_SECRET";

/// Kraken spot REST endpoint and API key pair
#[derive(Clone)]
pub struct Credentials {
    pub rest_url: String,
    pub api_key: String,
    /// Base64-encoded private key, as issued by Kraken
    pub api_secret: String,
}

impl Credentials {
    pub fn new(rest_url: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            rest_url: rest_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        }
    }

    /// Read credentials from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(SettingsError::MissingEnv(name))
        };

        Ok(Self::new(
            &require(REST_URL_VAR)?,
            &require(API_KEY_VAR)?,
            &require(API_SECRET_VAR)?,
        ))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("rest_url", &self.rest_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
