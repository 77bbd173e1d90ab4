use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CatalogConfig {
    #[serde(default)]
    pub reconcile: ReconcileSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReconcileSection {
    pub page_size: Option<usize>,
    pub on_error: Option<FailurePolicy>,
}

/// What the driver does after a unit of work fails to commit.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Abort => "abort",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continue" => Some(Self::Continue),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

impl CatalogConfig {
    /// Resolve page size: env CATALOGTOOL_PAGE_SIZE > config > DEFAULT_PAGE_SIZE.
    pub fn page_size(&self) -> Result<usize> {
        self.page_size_with_lookup(|key| env::var(key).ok())
    }

    /// Resolve failure policy: env CATALOGTOOL_ON_ERROR > config > continue.
    pub fn failure_policy(&self) -> Result<FailurePolicy> {
        self.failure_policy_with_lookup(|key| env::var(key).ok())
    }

    fn page_size_with_lookup<F>(&self, lookup_env: F) -> Result<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let page_size = match lookup_env("CATALOGTOOL_PAGE_SIZE")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("CATALOGTOOL_PAGE_SIZE is not a number: {value}"))?,
            None => self.reconcile.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        };
        if page_size == 0 {
            bail!("reconcile page size must be at least 1");
        }
        Ok(page_size)
    }

    fn failure_policy_with_lookup<F>(&self, lookup_env: F) -> Result<FailurePolicy>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup_env("CATALOGTOOL_ON_ERROR")
            && !value.trim().is_empty()
        {
            return FailurePolicy::parse(&value).ok_or_else(|| {
                anyhow::anyhow!("CATALOGTOOL_ON_ERROR must be `continue` or `abort`, got `{value}`")
            });
        }
        Ok(self.reconcile.on_error.unwrap_or_default())
    }
}

/// Load and parse a CatalogConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CatalogConfig> {
    if !config_path.exists() {
        return Ok(CatalogConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CatalogConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
