use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::config::{AccountConfigPatch, HmvConfig, patch_account_config};
use crate::runtime::ResolvedPaths;

pub const MISSING_CREDENTIALS_MESSAGE: &str =
    "No saved credentials. Run `hmv config` to store your username and password.";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredSecret {
    password: String,
}

/// Persist the username into config.toml and the password into the owner-only
/// credentials file.
pub fn save_credentials(paths: &ResolvedPaths, username: &str, password: &str) -> Result<()> {
    if password.is_empty() {
        bail!("password cannot be empty");
    }
    patch_account_config(
        &paths.config_path,
        &AccountConfigPatch {
            set_username: Some(username.to_string()),
        },
    )?;
    write_secret(&paths.credentials_path, password)
}

pub fn load_credentials(paths: &ResolvedPaths, config: &HmvConfig) -> Result<Credentials> {
    load_credentials_with_lookup(paths, config, |key| env::var(key).ok())
}

fn load_credentials_with_lookup<F>(
    paths: &ResolvedPaths,
    config: &HmvConfig,
    lookup_env: F,
) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let username = lookup_env("HMV_USERNAME")
        .or_else(|| config.account.username.clone())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let password = match lookup_env("HMV_PASSWORD").filter(|value| !value.is_empty()) {
        Some(password) => Some(password),
        None => read_secret(&paths.credentials_path)?,
    };

    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials { username, password }),
        _ => bail!(MISSING_CREDENTIALS_MESSAGE),
    }
}

fn read_secret(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let stored: StoredSecret =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(stored.password).filter(|value| !value.is_empty()))
}

fn write_secret(path: &Path, password: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("credentials path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string(&StoredSecret {
        password: password.to_string(),
    })
    .context("failed to serialize credentials")?;
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    restrict_permissions(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
