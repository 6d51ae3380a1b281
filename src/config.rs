use crate::extract::{LlmExtractor, RegexExtractor, SymbolExtractor};
use crate::query::{CONTEXT_BUDGET, DEFAULT_MAX_TOKENS};
use crate::remote::GitHubClient;
use crate::sync::SyncOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding `database`
pub const DATABASE_ENV: &str = "REPOCTX_DATABASE";
pub const LLM_API_KEY_ENV: &str = "LLM_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RepoctxConfig {
    pub database: Option<String>,
    pub extractor: ExtractorChoice,
    pub github: GitHubConfig,
    pub sync: SyncConfig,
    pub budget: BudgetConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorChoice {
    #[default]
    Regex,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    pub branch: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: crate::remote::github::GITHUB_API_URL.to_string(),
            branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub concurrency: usize,
    pub lease_ttl_secs: u64,
    pub webhook_lease_wait_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease_ttl_secs: 300,
            webhook_lease_wait_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub default_max_tokens: usize,
    pub context_budget: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: DEFAULT_MAX_TOKENS,
            context_budget: CONTEXT_BUDGET,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    /// Never written to disk; filled from `LLM_API_KEY`
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

impl RepoctxConfig {
    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup(DATABASE_ENV).filter(|v| !v.is_empty()) {
            self.database = Some(db);
        }
        if let Some(key) = lookup(LLM_API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(key);
        }
    }

    pub fn database_path(&self, base: &Path) -> PathBuf {
        match &self.database {
            Some(db) => {
                let path = PathBuf::from(db);
                if path.is_absolute() { path } else { base.join(path) }
            }
            None => default_database_path_in(base),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            branch: self.github.branch.clone(),
            concurrency: self.sync.concurrency.max(1),
            lease_ttl: Duration::from_secs(self.sync.lease_ttl_secs.max(1)),
            webhook_lease_wait: Duration::from_secs(self.sync.webhook_lease_wait_secs),
        }
    }

    pub fn github_client(&self) -> GitHubClient {
        GitHubClient::from_env().with_api_url(self.github.api_url.clone())
    }

    pub fn build_extractor(&self) -> anyhow::Result<Arc<dyn SymbolExtractor>> {
        match self.extractor {
            ExtractorChoice::Regex => Ok(Arc::new(RegexExtractor::new())),
            ExtractorChoice::Llm => {
                let Some(key) = self.llm.api_key.clone() else {
                    anyhow::bail!("extractor = \"llm\" needs {} to be set", LLM_API_KEY_ENV);
                };
                Ok(Arc::new(LlmExtractor::new(
                    self.llm.api_url.clone(),
                    key,
                    self.llm.model.clone(),
                )))
            }
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("repoctx.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".repoctx").join("repoctx.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<RepoctxConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: RepoctxConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

/// Load the config file if present, else defaults, then apply the environment.
pub fn load_effective(path: Option<&Path>) -> anyhow::Result<RepoctxConfig> {
    let mut config = load_config(path)?.unwrap_or_default();
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

pub fn write_config(path: &Path, config: &RepoctxConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".repoctx/";

    let mut content = if gitignore_path.exists() {
        std::fs::read_to_string(&gitignore_path)?
    } else {
        String::new()
    };
    if content.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}
