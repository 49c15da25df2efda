//! Process-wide system parameters.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// Base URL of the API the worker authenticates against.
pub const API_HOST: &str = "api_host";
/// Login path appended to [`API_HOST`].
pub const API_LOGIN_URL: &str = "api_login_url";
/// Login email.
pub const API_LOGIN_EMAIL: &str = "api_login_email";
/// Login password.
pub const API_LOGIN_PASSWORD: &str = "api_login_password";
/// Value of the `Content-Language` header on task API calls.
pub const DEFAULT_LANGUAGE: &str = "default_language";

/// Read-only key/value configuration shared by every job a worker runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemParams(HashMap<String, String>);

impl SystemParams {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flat JSON object of strings.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Add or replace one entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Apply `key=value` overrides on top of the current entries.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in overrides {
            self.0.insert(k.into(), v.into());
        }
        self
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Look up a key, empty when absent.
    pub fn value(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
