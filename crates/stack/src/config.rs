use anyhow::{Context, Result};
use plexus_core::RemovalPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_STACK_NAME: &str = "plexus-aws-infrastructure";
pub const DATA_LAKE_BUCKET: &str = "plexus-training-data-lake";
pub const RESULTS_BUCKET: &str = "plexus-athena-query-results";
pub const DATABASE_NAME: &str = "plexus_training_data";
pub const CRAWLER_NAME: &str = "plexus-training-data-crawler";
/// Skip every `metadata.json` unless its parent path segment ends in `m`.
pub const METADATA_EXCLUSION: &str = "**[!m]/metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Revision {
    /// No resources.
    Skeleton,
    /// Fixed bucket names, broad crawler permissions.
    FixedName,
    /// Randomized bucket name, object-scoped S3 permissions.
    #[default]
    LeastPrivilege,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Exact name for `fixed-name`, prefix for `least-privilege`.
    pub bucket_name: Option<String>,
    pub removal_policy: Option<RemovalPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub database_name: String,
    pub description: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_name: DATABASE_NAME.to_string(),
            description: "Tables discovered in the Plexus training data lake".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub name: String,
    /// Overrides the revision's exclusion patterns when set.
    pub exclusions: Option<Vec<String>>,
}

impl Default for CrawlerConfig {
    fn default() -> Self { Self { name: CRAWLER_NAME.to_string(), exclusions: None } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub stack_name: String,
    pub region: Option<String>,
    /// Catalog owner; the deploying account when unset.
    pub account: Option<String>,
    pub revision: Revision,
    pub data_lake: BucketConfig,
    pub results: BucketConfig,
    pub catalog: CatalogConfig,
    pub crawler: CrawlerConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            region: None,
            account: None,
            revision: Revision::default(),
            data_lake: BucketConfig::default(),
            results: BucketConfig::default(),
            catalog: CatalogConfig::default(),
            crawler: CrawlerConfig::default(),
        }
    }
}

impl StackConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_yaml(raw: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(raw)?)
    }

    /// Configured region, else the one the AWS CLI environment would pick.
    pub fn resolved_region(&self) -> Option<String> {
        self.region_from(|key| std::env::var(key).ok())
    }

    /// Empty values at any step fall through to the next one.
    fn region_from(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        let set = |v: Option<String>| v.filter(|r| !r.is_empty());
        set(self.region.clone())
            .or_else(|| set(env("AWS_REGION")))
            .or_else(|| set(env("AWS_DEFAULT_REGION")))
    }

    pub(crate) fn data_lake_removal(&self) -> RemovalPolicy {
        self.data_lake.removal_policy.unwrap_or(match self.revision {
            Revision::FixedName => RemovalPolicy::Retain,
            _ => RemovalPolicy::Destroy,
        })
    }

    pub(crate) fn exclusions(&self) -> Vec<String> {
        match (&self.crawler.exclusions, self.revision) {
            (Some(custom), _) => custom.clone(),
            (None, Revision::FixedName) => vec![METADATA_EXCLUSION.to_string()],
            (None, _) => Vec::new(),
        }
    }
}
