pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::Cli;
use crate::error::ConfigError;
use anyhow::Context;
use std::path::Path;

/// Name of the config file in both the global config dir and the workspace.
pub const CONFIG_FILE_NAME: &str = "warden.toml";

/// Load configuration by merging global, workspace, and CLI sources.
/// Precedence: CLI > workspace config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config, or the file named by --config.
    let global = match &cli.config {
        Some(path) => load_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?
            .unwrap_or_default(),
        None => load_global_config(),
    };

    // Determine workspace path from CLI or global config, for loading workspace config.
    let workspace_path = cli
        .workspace
        .clone()
        .or_else(|| global.workspace.clone())
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    // Layer 2: Workspace config (workspace/warden.toml)
    let workspace = load_workspace_config(&workspace_path);

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    // Merge: CLI > workspace > global > defaults
    let config = cli_partial
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize();

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found or unreadable.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(p) => load_toml_file(&p).unwrap_or_else(|e| {
            tracing::warn!(path = %p.display(), "Config error: {e}");
            None
        }),
        None => {
            tracing::debug!("Could not determine global config directory");
            None
        }
    }
    .unwrap_or_default()
}

/// Load workspace config from workspace/warden.toml.
/// Returns empty PartialConfig if file not found or unreadable.
fn load_workspace_config(workspace_path: &Path) -> PartialConfig {
    let config_path = workspace_path.join(CONFIG_FILE_NAME);
    load_toml_file(&config_path)
        .unwrap_or_else(|e| {
            tracing::warn!(path = %config_path.display(), "Config error: {e}");
            None
        })
        .unwrap_or_default()
}

/// Load and parse a TOML config file into a PartialConfig.
/// `Ok(None)` means the file does not exist.
fn load_toml_file(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let config_file =
                toml::from_str::<ConfigFile>(&contents).map_err(|e| ConfigError::ParseError {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            tracing::info!("Loaded config from {}", path.display());
            Ok(Some(config_file.to_partial()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(None)
        }
        Err(e) => Err(ConfigError::IoError(e)),
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/warden/warden.toml
/// macOS: ~/Library/Application Support/warden/warden.toml
fn global_config_path() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "", "warden")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Convert global CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    PartialConfig {
        workspace: cli.workspace.clone(),
        state_dir: cli.state_dir.clone(),
        stop_timeout_ms: cli.stop_timeout_ms,
        ..Default::default()
    }
}
