//! Bootstrap template for new experiments

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::Path;

use super::model::{
    BranchConfig, CodeChange, Condition, ConditionOperator, ConditionType, ContractMetadata,
    DeploymentConfig, ExperimentContract, StatsigConfig, TargetingRule, Variant,
};
use super::validate::validate;
use crate::error::{ContractValidationError, Result};
use crate::types::branch_for_key;

/// A contract that has not been validated yet, typically missing code changes
#[derive(Debug, Clone, PartialEq)]
pub struct PartialContract(ExperimentContract);

impl PartialContract {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.0).unwrap_or(Value::Null)
    }

    /// Adds code changes and runs full validation
    pub fn complete(
        mut self,
        code_changes: Vec<CodeChange>,
    ) -> std::result::Result<ExperimentContract, ContractValidationError> {
        self.0.code_changes = code_changes;
        validate(&self.to_value())
    }

    /// Writes the template as pretty JSON, creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.0)?;
        std::fs::write(path, content + "\n")?;
        Ok(())
    }
}

impl Deref for PartialContract {
    type Target = ExperimentContract;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Template contract with a 50/50 control/treatment split
pub fn create_default(experiment_key: &str) -> PartialContract {
    let branch = branch_for_key(experiment_key);

    let mut variants = BTreeMap::new();
    variants.insert(
        "control".to_string(),
        Variant {
            name: "control".to_string(),
            description: "Current experience".to_string(),
            parameters: Map::new(),
            pass_percentage: 50.0,
        },
    );
    variants.insert(
        "treatment".to_string(),
        Variant {
            name: "treatment".to_string(),
            description: "New experience".to_string(),
            parameters: Map::new(),
            pass_percentage: 50.0,
        },
    );

    let targeting_rules = vec![TargetingRule {
        name: "Experiment branch".to_string(),
        conditions: vec![Condition {
            condition_type: ConditionType::Branch,
            operator: ConditionOperator::Any,
            target_value: json!([branch.clone()]),
            field: None,
        }],
        pass_percentage: 100.0,
        environments: Vec::new(),
    }];

    let mut extra = Map::new();
    extra.insert("createdAt".to_string(), json!(Utc::now().to_rfc3339()));

    PartialContract(ExperimentContract {
        experiment_key: experiment_key.to_string(),
        name: experiment_key.to_string(),
        description: String::new(),
        hypothesis: String::new(),
        variants,
        code_changes: Vec::new(),
        targeting_rules,
        allocation: 100.0,
        branch_config: BranchConfig {
            branch_name: branch,
            base_branch: "main".to_string(),
            target_branch: "main".to_string(),
        },
        deployment: DeploymentConfig::default(),
        statsig: StatsigConfig::default(),
        pull_request: None,
        metadata: ContractMetadata {
            author: None,
            tags: Vec::new(),
            extra,
        },
    })
}
