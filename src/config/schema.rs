//! Configuration schema definitions for aeta.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every section has defaults, so an empty file is
//! a valid configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── TestsConfig            - Test packages, module pattern, free functions
//! ├── ParallelizeConfig      - Unit granularity policy
//! ├── StorageConfig          - Storage mode, backend, queue, cleanup delays
//! │   └── StoreBackend       - Tagged enum selecting the store backend
//! │       ├── Memory         - In-process maps
//! │       └── Fs             - JSON files and blobs under a directory
//! ├── ServerConfig           - Listen address, URL prefix, worker count
//! └── ClientConfig           - Poll interval, authentication attempts
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

/// Smallest delay between two runs of a batch cleanup call.
pub const MIN_BATCH_CLEANUP_DELAY_SECS: u64 = 10;

/// Smallest delay before a blob cleanup call may run.
pub const MIN_BLOB_CLEANUP_DELAY_SECS: u64 = 11;

/// Root configuration structure for aeta.
///
/// # TOML Structure
///
/// ```toml
/// [tests]
/// package_names = ["sample_package"]
/// module_pattern = "^test_[\\w]+$"
///
/// [parallelize]
/// modules = true
/// classes = true
/// methods = false
///
/// [storage]
/// mode = "deferred"
/// backend = { type = "fs", path = "~/.aeta/store" }
///
/// [server]
/// listen = "127.0.0.1:8080"
/// url_path = "/tests/"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Where tests live and how they are recognised.
    #[serde(default)]
    pub tests: TestsConfig,

    /// How finely tests are split into independently scheduled units.
    #[serde(default)]
    pub parallelize: ParallelizeConfig,

    /// Result storage and deferred work settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// REST server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote client settings.
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Checks the values serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the module pattern is not a valid regex, the
    /// listen address does not parse, the worker count is zero, or the
    /// inline payload limit is zero.
    pub fn validate(&self) -> Result<()> {
        regex::Regex::new(&self.tests.module_pattern).with_context(|| {
            format!(
                "Invalid tests.module_pattern: {}",
                self.tests.module_pattern
            )
        })?;

        self.server
            .listen
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid server.listen: {}", self.server.listen))?;

        if self.server.workers == 0 {
            bail!("server.workers must be at least 1");
        }

        if self.storage.max_inline_json_bytes == 0 {
            bail!("storage.max_inline_json_bytes must be at least 1");
        }

        if self.tests.test_method_prefix.is_empty() {
            bail!("tests.test_method_prefix must not be empty");
        }

        Ok(())
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// Test discovery settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `package_names` | `[]` |
/// | `module_pattern` | `^test_[\w]+$` |
/// | `include_test_functions` | true |
/// | `test_method_prefix` | `test` |
/// | `package_scan_depth` | 0 (unlimited) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestsConfig {
    /// Dotted names of the packages (or modules) that hold tests.
    ///
    /// Accepts a TOML array or a comma separated string; blank entries are
    /// dropped, so `"a, b,"` is the same as `["a", "b"]`.
    #[serde(default, deserialize_with = "deserialize_name_list")]
    pub package_names: Vec<String>,

    /// Regex a module's short name must match to be collected from a package.
    #[serde(default = "default_module_pattern")]
    pub module_pattern: String,

    /// Wrap free test functions of a module in a synthetic test class.
    #[serde(default = "default_true")]
    pub include_test_functions: bool,

    /// Prefix that marks a method or free function as a test.
    #[serde(default = "default_test_method_prefix")]
    pub test_method_prefix: String,

    /// How many subpackage levels to descend below a package (0 = unlimited).
    #[serde(default)]
    pub package_scan_depth: usize,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            package_names: Vec::new(),
            module_pattern: default_module_pattern(),
            include_test_functions: true,
            test_method_prefix: default_test_method_prefix(),
            package_scan_depth: 0,
        }
    }
}

fn default_module_pattern() -> String {
    r"^test_[\w]+$".to_string()
}

fn default_test_method_prefix() -> String {
    "test".to_string()
}

fn default_true() -> bool {
    true
}

/// Splits a comma separated list of names, trimming and dropping blanks.
///
/// # Example
///
/// ```
/// use aeta::config::parse_name_list;
///
/// assert_eq!(parse_name_list("a, b,"), vec!["a", "b"]);
/// assert!(parse_name_list("").is_empty());
/// ```
pub fn parse_name_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameList {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_name_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match NameList::deserialize(deserializer)? {
        NameList::Joined(value) => parse_name_list(&value),
        NameList::List(values) => values
            .iter()
            .flat_map(|value| parse_name_list(value))
            .collect(),
    })
}

/// Unit granularity policy.
///
/// A coarser flag dominates a finer one: with `classes = false`, classes
/// are never split into methods even if `methods = true`. Modules and
/// classes that declare fixtures are never split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParallelizeConfig {
    #[serde(default = "default_true")]
    pub modules: bool,
    #[serde(default = "default_true")]
    pub classes: bool,
    #[serde(default = "default_true")]
    pub methods: bool,
}

impl Default for ParallelizeConfig {
    fn default() -> Self {
        Self {
            modules: true,
            classes: true,
            methods: true,
        }
    }
}

/// How a batch is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Discovery and unit runs go through the work queue; callers poll.
    #[default]
    #[serde(alias = "datastore")]
    Deferred,
    /// Everything runs inside the request; nothing is persisted.
    Immediate,
}

/// Backend for batch and task records and for oversized payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process maps, lost on restart.
    #[default]
    Memory,
    /// JSON records and blobs under a directory (`~` is expanded).
    Fs { path: String },
}

impl StoreBackend {
    /// Returns the expanded directory of a file backend.
    pub fn fs_path(&self) -> Option<PathBuf> {
        match self {
            StoreBackend::Memory => None,
            StoreBackend::Fs { path } => Some(PathBuf::from(shellexpand::tilde(path).as_ref())),
        }
    }
}

/// Result storage and deferred work settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `mode` | deferred |
/// | `backend` | memory |
/// | `test_queue` | `default` |
/// | `max_inline_json_bytes` | 1,000,000 |
/// | `batch_cleanup_delay_secs` | 300 (floor 10) |
/// | `blob_cleanup_delay_secs` | 60 (floor 11) |
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub mode: StorageMode,

    #[serde(default)]
    pub backend: StoreBackend,

    /// Name of the queue deferred calls are added to.
    #[serde(default = "default_test_queue")]
    pub test_queue: String,

    /// Payloads larger than this are written to the blob store.
    #[serde(default = "default_max_inline_json_bytes")]
    pub max_inline_json_bytes: usize,

    /// Delay between checks of the batch cleanup call.
    #[serde(default = "default_batch_cleanup_delay")]
    pub batch_cleanup_delay_secs: u64,

    /// Delay before an oversized payload's blob is considered for deletion.
    #[serde(default = "default_blob_cleanup_delay")]
    pub blob_cleanup_delay_secs: u64,
}

impl StorageConfig {
    /// Batch cleanup delay, never below [`MIN_BATCH_CLEANUP_DELAY_SECS`].
    pub fn batch_cleanup_delay(&self) -> Duration {
        Duration::from_secs(
            self.batch_cleanup_delay_secs
                .max(MIN_BATCH_CLEANUP_DELAY_SECS),
        )
    }

    /// Blob cleanup delay, never below [`MIN_BLOB_CLEANUP_DELAY_SECS`].
    pub fn blob_cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.blob_cleanup_delay_secs.max(MIN_BLOB_CLEANUP_DELAY_SECS))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            backend: StoreBackend::default(),
            test_queue: default_test_queue(),
            max_inline_json_bytes: default_max_inline_json_bytes(),
            batch_cleanup_delay_secs: default_batch_cleanup_delay(),
            blob_cleanup_delay_secs: default_blob_cleanup_delay(),
        }
    }
}

fn default_test_queue() -> String {
    "default".to_string()
}

fn default_max_inline_json_bytes() -> usize {
    1_000_000
}

fn default_batch_cleanup_delay() -> u64 {
    300
}

fn default_blob_cleanup_delay() -> u64 {
    60
}

/// REST server settings.
///
/// `rest_path` and `deferred_path` are derived from `url_path` once, when
/// the section is parsed or built with [`ServerConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "ServerSection", into = "ServerSection")]
pub struct ServerConfig {
    pub listen: String,
    /// URL prefix of every aeta route, with leading and trailing slash.
    pub url_path: String,
    /// Number of in-process workers draining the deferred queue.
    pub workers: usize,
    /// `<url_path>rest/`
    pub rest_path: String,
    /// `<url_path>deferred/`
    pub deferred_path: String,
}

impl ServerConfig {
    pub fn new(listen: impl Into<String>, url_path: &str, workers: usize) -> Self {
        let url_path = normalize_url_path(url_path);
        Self {
            listen: listen.into(),
            rest_path: format!("{}rest/", url_path),
            deferred_path: format!("{}deferred/", url_path),
            url_path,
            workers,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(default_listen(), &default_url_path(), default_workers())
    }
}

fn normalize_url_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

#[derive(Deserialize, Serialize)]
struct ServerSection {
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default = "default_url_path")]
    url_path: String,
    #[serde(default = "default_workers")]
    workers: usize,
}

impl From<ServerSection> for ServerConfig {
    fn from(section: ServerSection) -> Self {
        ServerConfig::new(section.listen, &section.url_path, section.workers)
    }
}

impl From<ServerConfig> for ServerSection {
    fn from(config: ServerConfig) -> Self {
        ServerSection {
            listen: config.listen,
            url_path: config.url_path,
            workers: config.workers,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_url_path() -> String {
    "/tests/".to_string()
}

fn default_workers() -> usize {
    4
}

/// Remote client settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Delay between two polls of a running batch.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How many 401/403 replies are tolerated before giving up.
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_auth_attempts: default_max_auth_attempts(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_auth_attempts() -> u32 {
    2
}
