//! Configuration loading and root folder resolution
//!
//! Every setting resolves in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is never fatal: the caller gets defaults and a warning.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the root folder
pub const ENV_ROOT_FOLDER: &str = "MTRACK_ROOT_FOLDER";
/// Shorter alias for [`ENV_ROOT_FOLDER`]
pub const ENV_ROOT: &str = "MTRACK_ROOT";
/// Environment variable naming an explicit TOML config file
pub const ENV_CONFIG: &str = "MTRACK_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "mtrack.db";

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/mtrack (or /var/lib/mtrack for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("mtrack"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/mtrack"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("mtrack"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mtrack"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("mtrack"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\mtrack"))
        } else {
            PathBuf::from("./mtrack_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "mtrack_rc=debug"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Audiobook library endpoint settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudiobookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Streaming music credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Override for the Web API base (tests, proxies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Override for the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

/// Shelf camera and spine reader endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShelfConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_url: Option<String>,
}

/// Contents of `mtrack-rc.toml`
///
/// All fields are optional so that a partial file still loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_period_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_listen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_watermarks: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disambiguation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disambiguation_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    // Tables last: TOML forbids plain keys after a table header
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audiobook: AudiobookConfig,
    #[serde(default)]
    pub music: MusicConfig,
    #[serde(default)]
    pub shelf: ShelfConfig,
}

/// Default TOML path for a module: `<config_dir>/mtrack/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mtrack").join(format!("{}.toml", module_name)))
}

/// Resolve which TOML file to read: explicit path → `MTRACK_CONFIG` → default
pub fn resolve_config_path(cli_arg: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    default_config_path(module_name)
}

/// Load a TOML config file
///
/// A missing file yields the default config with a warning. A file that
/// exists but cannot be parsed is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    #[cfg(unix)]
    if check_toml_permissions_loose(path).unwrap_or(false) {
        warn!(
            "Config file {} is readable by other users; it may hold credentials (chmod 600)",
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))?;
    debug!("Loaded config file {}", path.display());
    Ok(config)
}

/// Write the config atomically (temp file + rename), 0600 on Unix
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// True if group or other users can read the file
#[cfg(unix)]
pub fn check_toml_permissions_loose(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o077 != 0)
}

/// Root folder resolution
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Command-line override (priority 1)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Value from an already loaded TOML file (priority 3)
    pub fn with_toml_root(mut self, path: Option<PathBuf>) -> Self {
        self.toml_root = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        for var in [ENV_ROOT_FOLDER, ENV_ROOT] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        debug!(
            module = %self.module_name,
            "No root folder configured, using compiled default"
        );
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder).map_err(|e| {
            Error::Config(format!(
                "Failed to create root folder {}: {}",
                self.root_folder.display(),
                e
            ))
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}
