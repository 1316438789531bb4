//! Typed shape of an experiment contract
//!
//! Field names serialize as camelCase and enum values are spelled exactly as
//! they appear in `contract/<key>.json` files.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Root document declaring one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentContract {
    /// Unique key, also the remote experiment id
    pub experiment_key: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub hypothesis: String,

    /// Variant name -> variant
    pub variants: BTreeMap<String, Variant>,

    /// Source edits, applied in order
    pub code_changes: Vec<CodeChange>,

    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,

    /// Share of eligible traffic enrolled, 0-100
    #[serde(default = "default_percentage")]
    pub allocation: f64,

    pub branch_config: BranchConfig,

    #[serde(default)]
    pub deployment: DeploymentConfig,

    #[serde(default)]
    pub statsig: StatsigConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestConfig>,

    #[serde(default)]
    pub metadata: ContractMetadata,
}

impl ExperimentContract {
    /// Fills derived defaults that serde cannot express
    pub(crate) fn normalize(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = self.experiment_key.clone();
        }
        for (key, variant) in self.variants.iter_mut() {
            if variant.name.trim().is_empty() {
                variant.name = key.clone();
            }
        }
        self
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_config.branch_name
    }

    pub fn variant_names(&self) -> Vec<&str> {
        self.variants.keys().map(String::as_str).collect()
    }

    pub fn wants_pull_request(&self) -> bool {
        self.pull_request.as_ref().map(|pr| pr.enabled).unwrap_or(false)
    }
}

/// One arm of the experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub parameters: Map<String, Value>,

    pub pass_percentage: f64,
}

/// How the injected code reads the experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WrapStrategy {
    GetExperiment,
    GetExperimentParams,
}

impl WrapStrategy {
    pub const VALUES: &'static [&'static str] = &["getExperiment", "getExperimentParams"];

    pub fn function_name(&self) -> &'static str {
        match self {
            Self::GetExperiment => "getExperiment",
            Self::GetExperimentParams => "getExperimentParams",
        }
    }
}

impl Default for WrapStrategy {
    fn default() -> Self {
        Self::GetExperiment
    }
}

/// Where the snippet lands relative to the target declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionPoint {
    Before,
    After,
    Replace,
}

impl InsertionPoint {
    pub const VALUES: &'static [&'static str] = &["before", "after", "replace"];
}

impl Default for InsertionPoint {
    fn default() -> Self {
        Self::After
    }
}

/// Directive to instrument one function or component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    pub file: String,

    pub function: String,

    #[serde(default)]
    pub wrap_with: WrapStrategy,

    /// Identifier the injected code binds to the experiment value
    pub parameter_usage: String,

    #[serde(default)]
    pub insertion_point: InsertionPoint,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Public,
    UserId,
    Email,
    Country,
    CustomField,
    EnvironmentTier,
    Url,
    Branch,
    BrowserName,
    OsName,
}

impl ConditionType {
    pub const VALUES: &'static [&'static str] = &[
        "public",
        "user_id",
        "email",
        "country",
        "custom_field",
        "environment_tier",
        "url",
        "branch",
        "browser_name",
        "os_name",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Any,
    None,
    Eq,
    Neq,
    StrContainsAny,
    StrContainsNone,
    StrMatches,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ConditionOperator {
    pub const VALUES: &'static [&'static str] = &[
        "any",
        "none",
        "eq",
        "neq",
        "str_contains_any",
        "str_contains_none",
        "str_matches",
        "gt",
        "gte",
        "lt",
        "lte",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    pub operator: ConditionOperator,

    #[serde(default)]
    pub target_value: Value,

    /// Custom field name when `type` is `custom_field`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetingRule {
    pub name: String,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default = "default_percentage")]
    pub pass_percentage: f64,

    /// Empty means every environment
    #[serde(default)]
    pub environments: Vec<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchConfig {
    pub branch_name: String,

    #[serde(default = "default_branch")]
    pub base_branch: String,

    #[serde(default = "default_branch")]
    pub target_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Vercel,
    Netlify,
    Manual,
}

impl Platform {
    pub const VALUES: &'static [&'static str] = &["vercel", "netlify", "manual"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default = "default_platform")]
    pub platform: Platform,

    #[serde(default = "default_true")]
    pub wait_for_deployment: bool,

    /// Milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Vercel,
            wait_for_deployment: true,
            timeout: DEFAULT_DEPLOYMENT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    #[serde(rename = "userID")]
    UserId,
    #[serde(rename = "stableID")]
    StableId,
}

impl IdType {
    pub const VALUES: &'static [&'static str] = &["userID", "stableID"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserId => "userID",
            Self::StableId => "stableID",
        }
    }
}

/// Deployment tier, shared by the contract and the environment settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Development,
    Staging,
    Production,
}

impl Tier {
    pub const VALUES: &'static [&'static str] = &["development", "staging", "production"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "development" => Some(Self::Development),
            "staging" => Some(Self::Staging),
            "production" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsigConfig {
    #[serde(default = "default_id_type")]
    pub id_type: IdType,

    #[serde(default = "default_tier")]
    pub environment: Tier,

    #[serde(default)]
    pub auto_start: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting_gate_id: Option<String>,
}

impl Default for StatsigConfig {
    fn default() -> Self {
        Self {
            id_type: IdType::UserId,
            environment: Tier::Development,
            auto_start: false,
            targeting_gate_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub reviewers: Vec<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Free-form keys, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const DEFAULT_DEPLOYMENT_TIMEOUT_MS: u64 = 300_000;

fn default_percentage() -> f64 {
    100.0
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_platform() -> Platform {
    Platform::Vercel
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_DEPLOYMENT_TIMEOUT_MS
}

fn default_id_type() -> IdType {
    IdType::UserId
}

fn default_tier() -> Tier {
    Tier::Development
}
