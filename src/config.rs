//! Configuration loading and schema definitions for aeta.
//!
//! This module provides types and functions for loading aeta configuration
//! from TOML files or strings. The schema covers test discovery, the
//! parallelization policy, result storage, the REST server and the remote
//! client.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads aeta configuration from a TOML file.
///
/// Every section is optional; missing values take their documented
/// defaults. Derived URL paths are computed while parsing.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use aeta::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("aeta.toml"))?;
/// println!("REST path: {}", config.server.rest_path);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads aeta configuration from a TOML string.
///
/// # Example
///
/// ```
/// use aeta::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [tests]
///     package_names = "tests1, tests2,"
///
///     [server]
///     url_path = "/aeta"
/// "#)?;
///
/// assert_eq!(config.tests.package_names, vec!["tests1", "tests2"]);
/// assert_eq!(config.server.rest_path, "/aeta/rest/");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
