//! Settings loading: `config.toml` plus `HUB__SECTION__KEY` environment
//! overrides, using the `config` crate's own `Environment` source rather
//! than one hand-rolled variable per field.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use config::{Config, Environment, File};
use hub_common::config::Settings;

use crate::cli::CliArgs;

const ENV_WORK_DIR: &str = "HUB_WORK_DIR";

/// Resolves the work directory: `--work-dir`, else `$HUB_WORK_DIR`, else
/// `~/.hub-server`, creating it if needed.
pub fn work_directory(args: &CliArgs) -> Result<PathBuf> {
    let work_dir = if let Some(work_dir) = &args.work_dir {
        tracing::info!("using work dir from cmd arg");
        PathBuf::from(work_dir)
    } else if let Ok(env_work_dir) = env::var(ENV_WORK_DIR) {
        tracing::info!("using work dir from env var");
        PathBuf::from(env_work_dir)
    } else {
        default_work_dir()?
    };

    std::fs::create_dir_all(&work_dir)?;
    tracing::info!("using work dir: {}", work_dir.display());
    Ok(work_dir)
}

fn default_work_dir() -> Result<PathBuf> {
    let home_dir = home::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home_dir.join(".hub-server"))
}

/// Loads [`Settings`] from `config_path` (default `<work_dir>/config.toml`),
/// falling back to built-in defaults if absent, then lets
/// `HUB__SECTION__KEY` environment variables override any field.
pub fn load_settings(work_dir: &Path, config_path: Option<String>) -> Result<Settings> {
    let config_file = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| work_dir.join("config.toml"));

    let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

    if config_file.exists() {
        builder = builder.add_source(File::from(config_file));
    } else {
        tracing::info!("no config file found at {}; using defaults and env overrides", config_file.display());
    }

    let config = builder
        .add_source(Environment::with_prefix("HUB").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}
