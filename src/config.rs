use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

fn default_base_url() -> String { "http://localhost:8080/api".to_owned() }
fn default_timeout()  -> u64    { 30 }

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api:    ApiConfig,
    pub picker: Option<PickerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url:        String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    pub access_token:    Option<String>,
    pub refresh_token:   Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url:        default_base_url(),
            timeout_seconds: default_timeout(),
            access_token:    None,
            refresh_token:   None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PickerConfig {
    /// Name of a built-in theme; ignored when theme.toml exists.
    pub theme: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let path = config_dir().join("config.toml");
        if path.exists() {
            Self::parse(&std::fs::read_to_string(&path)?)
        } else {
            Ok(AppConfig::default())
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn theme_name(&self) -> Option<&str> {
        self.picker.as_ref().and_then(|p| p.theme.as_deref())
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("villabook")
}
