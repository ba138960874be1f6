use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::catalog::{CatalogSettings, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_PAGE_SIZE};

pub const DEFAULT_BASE_URL: &str = "https://hackmyvm.eu";
pub const DEFAULT_DOWNLOAD_URL: &str = "https://downloads.hackmyvm.eu";
pub const DEFAULT_USER_AGENT: &str = "HMV-CLI-Pro/0.1.0";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HmvConfig {
    #[serde(default)]
    pub account: AccountSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub catalog: CatalogSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AccountSection {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub base_url: Option<String>,
    pub download_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CatalogSection {
    pub concurrency_limit: Option<usize>,
    pub page_size: Option<usize>,
    pub reconcile_status: Option<bool>,
}

impl HmvConfig {
    /// Resolve the site root: env HMV_BASE_URL > config > DEFAULT_BASE_URL.
    pub fn base_url(&self) -> String {
        let value = env_string("HMV_BASE_URL")
            .or_else(|| self.http.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        value.trim_end_matches('/').to_string()
    }

    pub fn download_url(&self) -> String {
        let value = env_string("HMV_DOWNLOAD_URL")
            .or_else(|| self.http.download_url.clone())
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_URL.to_string());
        value.trim_end_matches('/').to_string()
    }

    pub fn user_agent(&self) -> String {
        env_string("HMV_USER_AGENT")
            .or_else(|| self.http.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn timeout_ms(&self) -> u64 {
        env_parsed("HMV_HTTP_TIMEOUT_MS")
            .or(self.http.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn connect_timeout_ms(&self) -> u64 {
        env_parsed("HMV_HTTP_CONNECT_TIMEOUT_MS")
            .or(self.http.connect_timeout_ms)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS)
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            concurrency_limit: env_parsed("HMV_CONCURRENCY")
                .or(self.catalog.concurrency_limit)
                .unwrap_or(DEFAULT_CONCURRENCY_LIMIT)
                .max(1),
            page_size: env_parsed("HMV_PAGE_SIZE")
                .or(self.catalog.page_size)
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .max(1),
            reconcile_status: self.catalog.reconcile_status.unwrap_or(true),
        }
    }
}

/// Load and parse an HmvConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<HmvConfig> {
    if !config_path.exists() {
        return Ok(HmvConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: HmvConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct AccountConfigPatch {
    pub set_username: Option<String>,
}

/// Update `[account]` keys while preserving all other config sections.
/// Returns `true` when a write occurred.
pub fn patch_account_config(config_path: &Path, patch: &AccountConfigPatch) -> Result<bool> {
    let Some(username) = &patch.set_username else {
        return Ok(false);
    };
    let username = username.trim();
    if username.is_empty() {
        bail!("username cannot be empty");
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    let account_entry = root_table
        .entry("account".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let account_table = account_entry.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!("[account] must be a table in {}", config_path.display())
    })?;
    account_table.insert(
        "username".to_string(),
        Value::String(username.to_string()),
    );

    if root == original && config_path.exists() {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_no_account() {
        let config = HmvConfig::default();
        assert!(config.account.username.is_none());
        assert!(config.http.base_url.is_none());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, HmvConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[account]
username = "ouba"

[http]
base_url = "https://mirror.example.org/"
timeout_ms = 5000

[catalog]
concurrency_limit = 5
page_size = 10
reconcile_status = false
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.account.username.as_deref(), Some("ouba"));
        assert_eq!(
            config.http.base_url.as_deref(),
            Some("https://mirror.example.org/")
        );
        assert_eq!(config.http.timeout_ms, Some(5000));
        assert_eq!(config.catalog.concurrency_limit, Some(5));
        assert_eq!(config.catalog.page_size, Some(10));
        assert_eq!(config.catalog.reconcile_status, Some(false));
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[ui]\ntheme = \"dark\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.account.username.is_none());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[account\nusername = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn patch_account_config_preserves_other_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[catalog]\npage_size = 30\n").expect("write config");

        let wrote = patch_account_config(
            &config_path,
            &AccountConfigPatch {
                set_username: Some(" ouba ".to_string()),
            },
        )
        .expect("patch");
        assert!(wrote);

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.account.username.as_deref(), Some("ouba"));
        assert_eq!(config.catalog.page_size, Some(30));
    }

    #[test]
    fn patch_account_config_is_noop_without_changes() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("nested").join("config.toml");
        let patch = AccountConfigPatch {
            set_username: Some("ouba".to_string()),
        };
        assert!(patch_account_config(&config_path, &patch).expect("first patch"));
        assert!(!patch_account_config(&config_path, &patch).expect("second patch"));
        assert!(!patch_account_config(&config_path, &AccountConfigPatch::default()).expect("empty"));
    }

    #[test]
    fn patch_account_config_rejects_blank_username() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        let error = patch_account_config(
            &config_path,
            &AccountConfigPatch {
                set_username: Some("   ".to_string()),
            },
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("cannot be empty"));
    }

    #[test]
    fn catalog_settings_fall_back_to_defaults() {
        let config = HmvConfig {
            catalog: CatalogSection {
                concurrency_limit: Some(0),
                page_size: None,
                reconcile_status: None,
            },
            ..HmvConfig::default()
        };
        let settings = config.catalog_settings();
        assert_eq!(settings.concurrency_limit, 1);
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert!(settings.reconcile_status);
    }
}
