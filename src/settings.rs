//! Run settings from the environment.
//!
//! Values come from environment variables, overlaid by the
//! `project_settings` object of the `SHUB_SETTINGS` JSON document that
//! Scrapy Cloud injects. Command line flags override both.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::Error as CrateError;
use crate::storage::{DEFAULT_B2_ENDPOINT, StorageConfig};

/// Environment variable holding the Scrapy Cloud settings document
pub const SHUB_SETTINGS_VAR: &str = "SHUB_SETTINGS";

const API_KEY: &[&str] = &["API_KEY", "SHUB_APIKEY"];
const PROJECT_ID: &[&str] = &["PROJECT_ID", "SHUB_PROJECT_ID"];
const B2_ENDPOINT: &[&str] = &["B2_ENDPOINT"];
const B2_KEY_ID: &[&str] = &["B2_KEY_ID", "B2_ACCOUNT_ID"];
const B2_APPLICATION_KEY: &[&str] = &["B2_APPLICATION_KEY"];
const ITEMS_STORE: &[&str] = &["ITEMS_STORE"];
const FILES_STORE: &[&str] = &["FILES_STORE"];
const FILES_ENCRYPTION_KEY: &[&str] = &["FILES_ENCRYPTION_KEY"];

/// Error type for settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// `SHUB_SETTINGS` is not valid JSON
    #[error("Invalid SHUB_SETTINGS: {0}")]
    InvalidShubSettings(#[from] serde_json::Error),

    /// A required setting has no value
    #[error("Missing setting {0}")]
    Missing(&'static str),

    /// The items store is not a B2 URI
    #[error("Items store must start with b2://, got {0}")]
    InvalidItemsStore(String),
}

impl From<SettingsError> for CrateError {
    fn from(err: SettingsError) -> Self {
        CrateError::Config(err.to_string())
    }
}

/// Settings shared by the crawl and export commands
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub b2_endpoint: Option<String>,
    pub b2_key_id: Option<String>,
    pub b2_application_key: Option<String>,
    pub items_store: Option<String>,
    pub files_store: Option<String>,
    pub files_encryption_key: Option<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("project_id", &self.project_id)
            .field("b2_endpoint", &self.b2_endpoint)
            .field("b2_key_id", &self.b2_key_id)
            .field(
                "b2_application_key",
                &self.b2_application_key.as_ref().map(|_| "<redacted>"),
            )
            .field("items_store", &self.items_store)
            .field("files_store", &self.files_store)
            .field(
                "files_encryption_key",
                &self.files_encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which returns the value of a variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_settings = match lookup(SHUB_SETTINGS_VAR).filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let mut document: Map<String, Value> = serde_json::from_str(&raw)?;
                match document.remove("project_settings") {
                    Some(Value::Object(settings)) => settings,
                    _ => Map::new(),
                }
            }
            None => Map::new(),
        };

        let get = |names: &[&str]| -> Option<String> {
            names
                .iter()
                .find_map(|&name| project_setting(&project_settings, name))
                .or_else(|| names.iter().find_map(|&name| lookup(name)))
                .filter(|value| !value.is_empty())
        };

        Ok(Self {
            api_key: get(API_KEY),
            project_id: get(PROJECT_ID),
            b2_endpoint: get(B2_ENDPOINT),
            b2_key_id: get(B2_KEY_ID),
            b2_application_key: get(B2_APPLICATION_KEY),
            items_store: get(ITEMS_STORE),
            files_store: get(FILES_STORE),
            files_encryption_key: get(FILES_ENCRYPTION_KEY),
        })
    }

    /// Storage credentials for the backend registry
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            b2_endpoint: self
                .b2_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_B2_ENDPOINT.to_string()),
            b2_key_id: self.b2_key_id.clone(),
            b2_application_key: self.b2_application_key.clone(),
        }
    }

    /// The items store, which must be a `b2://` URI
    pub fn items_store(&self) -> Result<&str, SettingsError> {
        let store = self
            .items_store
            .as_deref()
            .ok_or(SettingsError::Missing("ITEMS_STORE"))?;
        if !store.starts_with("b2://") {
            return Err(SettingsError::InvalidItemsStore(store.to_string()));
        }
        Ok(store)
    }
}

fn project_setting(settings: &Map<String, Value>, name: &str) -> Option<String> {
    match settings.get(name)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}
