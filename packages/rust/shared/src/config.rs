//! Application configuration for DocAssembler.
//!
//! User config lives at `~/.docassembler/docassembler.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocAssemblerError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docassembler.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docassembler";

// ---------------------------------------------------------------------------
// Config structs (matching docassembler.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retrieval pacing and HTTP settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Render stage settings.
    #[serde(default)]
    pub render: RenderConfig,

    /// Index resolution settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Document footer settings.
    #[serde(default)]
    pub document: DocumentConfig,

    /// Registered provider specifications.
    #[serde(default)]
    pub providers: Vec<ProviderRegistryEntry>,
}

/// How far a provider run proceeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadDepth {
    /// Retrieve and extract every observed document.
    #[default]
    Full,
    /// Retrieve only the first newly discovered document.
    OneDocument,
    /// Resolve and reconcile the index without retrieval.
    IndexOnly,
    /// Load and validate the specification only.
    TopLevel,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Where rendered documents and the retrieval cache are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Default load depth for `run`.
    #[serde(default)]
    pub load_depth: LoadDepth,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            load_depth: LoadDepth::default(),
        }
    }
}

fn default_output_dir() -> String {
    "~/docassembler-output".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Minimum ms between the starts of two network-bound retrievals.
    #[serde(default = "default_min_fetch_interval")]
    pub min_fetch_interval_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_fetch_interval_ms: default_min_fetch_interval(),
            timeout_secs: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_min_fetch_interval() -> u64 {
    2000
}
fn default_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("DocAssembler/{}", env!("CARGO_PKG_VERSION"))
}

/// `[render]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Maximum number of documents rendered concurrently.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Font family recorded on every rendered document.
    #[serde(default = "default_font_family")]
    pub font_family: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            font_family: default_font_family(),
        }
    }
}

fn default_pool_size() -> usize {
    2
}
fn default_font_family() -> String {
    "Calibri".into()
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// How many levels of sub-index pages are followed.
    #[serde(default = "default_sub_index_depth")]
    pub sub_index_depth: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            sub_index_depth: default_sub_index_depth(),
        }
    }
}

fn default_sub_index_depth() -> u32 {
    1
}

/// `[document]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Organisation named in the footer.
    #[serde(default = "default_organisation")]
    pub organisation_name: String,

    /// Footer template; `{organisation}`, `{provider}` and `{date}` are substituted.
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            organisation_name: default_organisation(),
            disclaimer: default_disclaimer(),
        }
    }
}

fn default_organisation() -> String {
    "Your organisation".into()
}
fn default_disclaimer() -> String {
    "This information was provided by {organisation}, sourced from {provider} on {date}. \
     It is general information only and does not replace advice from your health professional. \
     The latest version is available at:"
        .into()
}

impl DocumentConfig {
    /// Render the footer text for one document.
    pub fn render_disclaimer(&self, provider: &str, date: &str) -> String {
        self.disclaimer
            .replace("{organisation}", &self.organisation_name)
            .replace("{provider}", provider)
            .replace("{date}", date)
    }
}

/// `[[providers]]` entry: a registered provider specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistryEntry {
    /// Provider name, as declared in the specification.
    pub name: String,
    /// Path to the specification file.
    pub spec_path: String,
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for one provider run, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Output directory for rendered documents and the `cache/` directory.
    pub output_dir: PathBuf,
    pub load_depth: LoadDepth,
    pub min_fetch_interval: Duration,
    pub timeout: Duration,
    pub user_agent: String,
    pub pool_size: usize,
    pub font_family: String,
    pub sub_index_depth: u32,
    pub document: DocumentConfig,
}

impl RunConfig {
    /// Directory holding cached retrievals.
    pub fn cache_dir(&self) -> PathBuf {
        self.output_dir.join("cache")
    }
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: expand_home(&config.defaults.output_dir),
            load_depth: config.defaults.load_depth,
            min_fetch_interval: Duration::from_millis(config.fetch.min_fetch_interval_ms),
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            user_agent: config.fetch.user_agent.clone(),
            pool_size: config.render.pool_size.max(1),
            font_family: config.render.font_family.clone(),
            sub_index_depth: config.index.sub_index_depth,
            document: config.document.clone(),
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docassembler/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocAssemblerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docassembler/docassembler.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocAssemblerError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocAssemblerError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocAssemblerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocAssemblerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocAssemblerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
