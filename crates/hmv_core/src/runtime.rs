use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const STATE_DIR_NAME: &str = ".hmv";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const CREDENTIALS_FILENAME: &str = "credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub home: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub home_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self {
            cwd,
            home_dir: dirs::home_dir(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub credentials_path: PathBuf,
    pub state_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "state_dir={} ({})\nconfig_path={} ({})\nconfig_exists={}\ncredentials_path={}\ncredentials_exists={}",
            normalize_for_display(&self.state_dir),
            self.state_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            self.config_path.exists(),
            normalize_for_display(&self.credentials_path),
            self.credentials_path.exists(),
        )
    }

    /// `.env` in the state directory, loaded after the working directory's one.
    pub fn dotenv_path(&self) -> PathBuf {
        self.state_dir.join(".env")
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (state_dir, state_source) = if let Some(path) = overrides.home.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("HMV_HOME")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        let Some(home) = context.home_dir.as_deref() else {
            bail!("could not determine the home directory; pass --home or set HMV_HOME");
        };
        (home.join(STATE_DIR_NAME), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("HMV_CONFIG")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (state_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(ResolvedPaths {
        credentials_path: state_dir.join(CREDENTIALS_FILENAME),
        state_dir,
        config_path,
        state_source,
        config_source,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
