//! Effective configuration of the library manager.
//!
//! Every setting is resolved in order: command line flag, environment
//! variable, the JSON settings file `<data_dir>/boardpm.json`, built-in
//! default. Environment and home directory come from the [`Runtime`].

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::LocationRoots;
use crate::runtime::Runtime;

pub const SETTINGS_FILE: &str = "boardpm.json";

pub const ENV_DATA_DIR: &str = "BOARDPM_DATA_DIR";
pub const ENV_USER_DIR: &str = "BOARDPM_USER_DIR";
pub const ENV_BUILTIN_DIR: &str = "BOARDPM_BUILTIN_DIR";
pub const ENV_DOWNLOADS_DIR: &str = "BOARDPM_DOWNLOADS_DIR";
pub const ENV_CATALOG: &str = "BOARDPM_CATALOG";

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub downloads_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub builtin_dir: Option<PathBuf>,
    pub sketch_dir: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
}

/// Contents of the settings file; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Settings {
    downloads_dir: Option<PathBuf>,
    user_dir: Option<PathBuf>,
    builtin_dir: Option<PathBuf>,
    sketch_dir: Option<PathBuf>,
    catalog_path: Option<PathBuf>,
    download_timeout_secs: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub user_dir: PathBuf,
    pub builtin_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sketch_dir: Option<PathBuf>,
    pub catalog_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Config {
    #[tracing::instrument(skip(runtime))]
    pub fn resolve<R: Runtime>(runtime: &R, overrides: &ConfigOverrides) -> Result<Self> {
        let home = runtime.home_dir();
        let home_based = |relative: &str| -> Result<PathBuf> {
            home.as_ref()
                .map(|h| h.join(relative))
                .ok_or_else(|| anyhow!("Cannot determine home directory"))
        };

        let data_dir = match pick(overrides.data_dir.clone(), env_path(runtime, ENV_DATA_DIR), None) {
            Some(dir) => dir,
            None => home_based(".boardpm")?,
        };

        let settings_path = data_dir.join(SETTINGS_FILE);
        let settings = load_settings(runtime, &settings_path)?;

        let downloads_dir = pick(
            overrides.downloads_dir.clone(),
            env_path(runtime, ENV_DOWNLOADS_DIR),
            settings.downloads_dir,
        )
        .unwrap_or_else(|| data_dir.join("staging"));

        let user_dir = match pick(
            overrides.user_dir.clone(),
            env_path(runtime, ENV_USER_DIR),
            settings.user_dir,
        ) {
            Some(dir) => dir,
            None => home_based("Arduino/libraries")?,
        };

        let builtin_dir = pick(
            overrides.builtin_dir.clone(),
            env_path(runtime, ENV_BUILTIN_DIR),
            settings.builtin_dir,
        )
        .unwrap_or_else(|| data_dir.join("libraries"));

        let catalog_path = pick(
            overrides.catalog_path.clone(),
            env_path(runtime, ENV_CATALOG),
            settings.catalog_path,
        )
        .unwrap_or_else(|| data_dir.join("library_index.json"));

        let config = Self {
            sketch_dir: overrides.sketch_dir.clone().or(settings.sketch_dir),
            download_timeout_secs: settings.download_timeout_secs,
            user_agent: settings
                .user_agent
                .unwrap_or_else(|| format!("boardpm/{}", env!("BOARDPM_VERSION"))),
            data_dir,
            downloads_dir,
            user_dir,
            builtin_dir,
            catalog_path,
        };
        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn roots(&self) -> LocationRoots {
        LocationRoots {
            user: self.user_dir.clone(),
            builtin: self.builtin_dir.clone(),
            sketch: self.sketch_dir.clone(),
        }
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Writes the effective configuration to the settings file.
    pub fn init<R: Runtime>(&self, runtime: &R, overwrite: bool) -> Result<PathBuf> {
        let path = self.settings_path();
        if runtime.exists(&path) && !overwrite {
            bail!(
                "Settings file {:?} already exists, use --overwrite to replace it",
                path
            );
        }
        runtime.create_dir_all(&self.data_dir)?;
        runtime
            .write(&path, self.to_json()?.as_bytes())
            .with_context(|| format!("Failed to write settings file {:?}", path))?;
        Ok(path)
    }
}

fn pick(flag: Option<PathBuf>, env: Option<PathBuf>, file: Option<PathBuf>) -> Option<PathBuf> {
    flag.or(env).or(file)
}

fn env_path<R: Runtime>(runtime: &R, key: &str) -> Option<PathBuf> {
    runtime
        .env_var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn load_settings<R: Runtime>(runtime: &R, path: &Path) -> Result<Settings> {
    if !runtime.exists(path) {
        return Ok(Settings::default());
    }
    let content = runtime
        .read_to_string(path)
        .with_context(|| format!("Failed to read settings file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid settings file {:?}", path))
}
