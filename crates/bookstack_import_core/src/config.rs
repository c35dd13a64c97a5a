use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = ".bookstack-import.toml";
pub const DEFAULT_USER_AGENT: &str = "bookstack-import/0.1";
pub const DEFAULT_SKIP_DIRS: &[&str] = &["media", "docx"];
pub const DEFAULT_INTERNAL_LINK_SCHEMES: &[&str] = &["onenote:"];

pub const ENV_URL: &str = "BOOKSTACK_URL";
pub const ENV_TOKEN_ID: &str = "BOOKSTACK_TOKEN_ID";
pub const ENV_TOKEN_SECRET: &str = "BOOKSTACK_TOKEN_SECRET";
pub const ENV_IMPORT_PATH: &str = "BOOKSTACK_IMPORT_PATH";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub bookstack: BookStackSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BookStackSection {
    pub url: Option<String>,
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub import_path: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub skip_dirs: Option<Vec<String>>,
    pub internal_link_schemes: Option<Vec<String>>,
}

/// Load and parse a FileConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<FileConfig> {
    if !config_path.exists() {
        return Ok(FileConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: FileConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Everything needed to talk to one BookStack instance.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub token_id: String,
    pub token_secret: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl ClientSettings {
    pub fn authorization(&self) -> String {
        format!("Token {}:{}", self.token_id, self.token_secret)
    }
}

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub import_path: PathBuf,
    pub skip_dirs: Vec<String>,
    pub internal_link_schemes: Vec<String>,
    pub normalize_arrows: bool,
    pub dedup_attachments: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub client: ClientSettings,
    pub import: ImportSettings,
}

/// Values that take precedence over both the environment and the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub import_path: Option<PathBuf>,
    pub dedup_attachments: bool,
    pub keep_arrows: bool,
}

pub fn resolve_config(file: &FileConfig, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    resolve_config_with_lookup(file, overrides, |key| env::var(key).ok())
}

fn resolve_config_with_lookup<F>(
    file: &FileConfig,
    overrides: &ConfigOverrides,
    lookup_env: F,
) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let section = &file.bookstack;
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let mut missing = Vec::new();
    let mut required = |key: &'static str, fallback: Option<&String>| {
        let value = lookup(key).or_else(|| {
            fallback
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        });
        if value.is_none() {
            missing.push(key);
        }
        value.unwrap_or_default()
    };

    let base_url = required(ENV_URL, section.url.as_ref());
    let token_id = required(ENV_TOKEN_ID, section.token_id.as_ref());
    let token_secret = required(ENV_TOKEN_SECRET, section.token_secret.as_ref());
    let import_path = match overrides.import_path.clone() {
        Some(path) => path,
        None => {
            let file_path = section
                .import_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned());
            PathBuf::from(required(ENV_IMPORT_PATH, file_path.as_ref()))
        }
    };

    if !missing.is_empty() {
        bail!(
            "missing required configuration: {}\nSet them in the environment, a .env file, or the [bookstack] table of {DEFAULT_CONFIG_FILENAME}",
            missing.join(", ")
        );
    }

    let user_agent = lookup("BOOKSTACK_USER_AGENT")
        .or_else(|| section.user_agent.clone())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    Ok(ResolvedConfig {
        client: ClientSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            token_id,
            token_secret,
            user_agent,
            timeout_ms: parse_or(lookup("BOOKSTACK_HTTP_TIMEOUT_MS"), 30_000),
            max_retries: parse_or(lookup("BOOKSTACK_HTTP_RETRIES"), 2),
            max_write_retries: parse_or(lookup("BOOKSTACK_HTTP_WRITE_RETRIES"), 0),
            retry_delay_ms: parse_or(lookup("BOOKSTACK_HTTP_RETRY_DELAY_MS"), 500),
        },
        import: ImportSettings {
            import_path,
            skip_dirs: section
                .skip_dirs
                .clone()
                .unwrap_or_else(|| to_owned_list(DEFAULT_SKIP_DIRS)),
            internal_link_schemes: section
                .internal_link_schemes
                .clone()
                .unwrap_or_else(|| to_owned_list(DEFAULT_INTERNAL_LINK_SCHEMES)),
            normalize_arrows: !overrides.keep_arrows,
            dedup_attachments: overrides.dedup_attachments,
        },
    })
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}
