//! Configuration resolution for mtrack-rc
//!
//! Every setting resolves as command line → environment (`MTRACK_*`) →
//! TOML file → compiled default. Sources are optional: a source with no
//! settings at all is simply not registered. A source with only part of its
//! settings is a configuration error.

use crate::sources::music::{DEFAULT_API_BASE, DEFAULT_TOKEN_URL};
use mtrack_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use mtrack_common::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Module name used for the config file and root folder resolution
pub const MODULE_NAME: &str = "mtrack-rc";

pub const DEFAULT_CYCLE_PERIOD_SECS: u64 = 86_400;
pub const DEFAULT_CONTROL_LISTEN: &str = "127.0.0.1:5731";

pub const ENV_CYCLE_PERIOD_SECS: &str = "MTRACK_CYCLE_PERIOD_SECS";
pub const ENV_CONTROL_LISTEN: &str = "MTRACK_CONTROL_LISTEN";
pub const ENV_PERSIST_WATERMARKS: &str = "MTRACK_PERSIST_WATERMARKS";
pub const ENV_DISAMBIGUATION_URL: &str = "MTRACK_DISAMBIGUATION_URL";
pub const ENV_DISAMBIGUATION_TIMEOUT_SECS: &str = "MTRACK_DISAMBIGUATION_TIMEOUT_SECS";
pub const ENV_REPORT_URL: &str = "MTRACK_REPORT_URL";
pub const ENV_AUDIOBOOK_URL: &str = "MTRACK_AUDIOBOOK_URL";
pub const ENV_AUDIOBOOK_TOKEN: &str = "MTRACK_AUDIOBOOK_TOKEN";
pub const ENV_MUSIC_CLIENT_ID: &str = "MTRACK_MUSIC_CLIENT_ID";
pub const ENV_MUSIC_CLIENT_SECRET: &str = "MTRACK_MUSIC_CLIENT_SECRET";
pub const ENV_MUSIC_REFRESH_TOKEN: &str = "MTRACK_MUSIC_REFRESH_TOKEN";
pub const ENV_SHELF_CAMERA_URL: &str = "MTRACK_SHELF_CAMERA_URL";
pub const ENV_SHELF_READER_URL: &str = "MTRACK_SHELF_READER_URL";

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// TOML file the settings were read from
    pub config_path: Option<PathBuf>,
    pub root_folder: Option<PathBuf>,
    pub period_secs: Option<u64>,
    pub listen: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudiobookSettings {
    pub library_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MusicSettings {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub api_base: String,
    pub token_url: String,
    /// TOML file a rotated refresh token is written back to
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShelfSettings {
    pub camera_url: String,
    pub reader_url: String,
}

/// Fully resolved reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub cycle_period: Duration,
    pub control_listen: String,
    pub persist_watermarks: bool,
    pub disambiguation_url: Option<String>,
    pub disambiguation_timeout: Option<Duration>,
    pub report_url: Option<String>,
    pub audiobook: Option<AudiobookSettings>,
    pub music: Option<MusicSettings>,
    pub shelf: Option<ShelfSettings>,
}

/// Non-blank environment variable
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Environment value first, then TOML value; blank strings count as unset
fn env_or(name: &str, toml_value: Option<&String>) -> Option<String> {
    env_var(name).or_else(|| toml_value.filter(|v| !v.trim().is_empty()).cloned())
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={}: {}", name, raw, e))),
        None => Ok(None),
    }
}

impl ReconcilerConfig {
    /// Merge command line, environment and TOML values
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Result<Self> {
        let root_folder = RootFolderResolver::new(MODULE_NAME)
            .with_cli_arg(cli.root_folder.clone())
            .with_toml_root(toml.root_folder.clone())
            .resolve();

        let period_secs = match cli.period_secs {
            Some(secs) => secs,
            None => parse_env(ENV_CYCLE_PERIOD_SECS)?
                .or(toml.cycle_period_secs)
                .unwrap_or(DEFAULT_CYCLE_PERIOD_SECS),
        };
        if period_secs == 0 {
            return Err(Error::Config("cycle period must be at least 1 second".to_string()));
        }

        let control_listen = cli
            .listen
            .clone()
            .or_else(|| env_or(ENV_CONTROL_LISTEN, toml.control_listen.as_ref()))
            .unwrap_or_else(|| DEFAULT_CONTROL_LISTEN.to_string());

        let persist_watermarks = parse_env(ENV_PERSIST_WATERMARKS)?
            .or(toml.persist_watermarks)
            .unwrap_or(true);

        let disambiguation_timeout = parse_env::<u64>(ENV_DISAMBIGUATION_TIMEOUT_SECS)?
            .or(toml.disambiguation_timeout_secs)
            .map(mtrack_common::time::secs_to_duration);

        Ok(Self {
            root_folder,
            log_level: toml
                .logging
                .level
                .clone()
                .unwrap_or_else(|| "info".to_string()),
            cycle_period: mtrack_common::time::secs_to_duration(period_secs),
            control_listen,
            persist_watermarks,
            disambiguation_url: env_or(ENV_DISAMBIGUATION_URL, toml.disambiguation_url.as_ref()),
            disambiguation_timeout,
            report_url: env_or(ENV_REPORT_URL, toml.report_url.as_ref()),
            audiobook: resolve_audiobook(toml),
            music: resolve_music(toml, cli.config_path.as_ref())?,
            shelf: resolve_shelf(toml)?,
        })
    }

    /// Disambiguation endpoint, required to run a cycle
    pub fn require_disambiguation_url(&self) -> Result<&str> {
        self.disambiguation_url.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "No disambiguation engine configured. Set {} or `disambiguation_url` in {}.toml",
                ENV_DISAMBIGUATION_URL, MODULE_NAME
            ))
        })
    }

    /// Report endpoint, required to run a cycle
    pub fn require_report_url(&self) -> Result<&str> {
        self.report_url.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "No report endpoint configured. Set {} or `report_url` in {}.toml",
                ENV_REPORT_URL, MODULE_NAME
            ))
        })
    }

    pub fn root_folder_initializer(&self) -> RootFolderInitializer {
        RootFolderInitializer::new(self.root_folder.clone())
    }

    /// Log the resolved settings (never the secrets)
    pub fn log_summary(&self) {
        info!("Root folder: {}", self.root_folder.display());
        info!(
            "Cycle period: {} ({}s)",
            mtrack_common::time::format_period(self.cycle_period),
            self.cycle_period.as_secs()
        );
        info!(
            "Watermark persistence: {}",
            if self.persist_watermarks { "sqlite" } else { "memory" }
        );
        match self.disambiguation_timeout {
            Some(t) => info!("Disambiguation timeout: {}s", t.as_secs()),
            None => info!("Disambiguation timeout: none"),
        }
        info!(
            audiobook = self.audiobook.is_some(),
            music = self.music.is_some(),
            shelf = self.shelf.is_some(),
            "Configured sources"
        );
    }
}

fn resolve_audiobook(toml: &TomlConfig) -> Option<AudiobookSettings> {
    let library_url = env_or(ENV_AUDIOBOOK_URL, toml.audiobook.library_url.as_ref())?;
    Some(AudiobookSettings {
        library_url,
        token: env_or(ENV_AUDIOBOOK_TOKEN, toml.audiobook.token.as_ref()),
    })
}

fn resolve_music(
    toml: &TomlConfig,
    config_path: Option<&PathBuf>,
) -> Result<Option<MusicSettings>> {
    let client_id = env_or(ENV_MUSIC_CLIENT_ID, toml.music.client_id.as_ref());
    let client_secret = env_or(ENV_MUSIC_CLIENT_SECRET, toml.music.client_secret.as_ref());
    let refresh_token = env_or(ENV_MUSIC_REFRESH_TOKEN, toml.music.refresh_token.as_ref());

    match (client_id, client_secret, refresh_token) {
        (None, None, None) => Ok(None),
        (Some(client_id), Some(client_secret), Some(refresh_token)) => Ok(Some(MusicSettings {
            client_id,
            client_secret,
            refresh_token,
            api_base: toml
                .music
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            token_url: toml
                .music
                .token_url
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            config_path: config_path.cloned(),
        })),
        _ => Err(Error::Config(
            "Music source needs client_id, client_secret and refresh_token together".to_string(),
        )),
    }
}

fn resolve_shelf(toml: &TomlConfig) -> Result<Option<ShelfSettings>> {
    let camera_url = env_or(ENV_SHELF_CAMERA_URL, toml.shelf.camera_url.as_ref());
    let reader_url = env_or(ENV_SHELF_READER_URL, toml.shelf.reader_url.as_ref());

    match (camera_url, reader_url) {
        (None, None) => Ok(None),
        (Some(camera_url), Some(reader_url)) => Ok(Some(ShelfSettings {
            camera_url,
            reader_url,
        })),
        (Some(_), None) => Err(Error::Config(
            "shelf.camera_url is set but shelf.reader_url is missing".to_string(),
        )),
        (None, Some(_)) => Err(Error::Config(
            "shelf.reader_url is set but shelf.camera_url is missing".to_string(),
        )),
    }
}
