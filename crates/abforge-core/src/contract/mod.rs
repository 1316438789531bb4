//! Experiment contracts
//!
//! A contract is the JSON document (`contract/<key>.json`) that declares an
//! experiment: its variants, the source files to instrument, targeting, and how
//! the preview deployment and remote experiment are handled. It is read and
//! validated once per CLI invocation and never mutated afterwards.

pub mod model;
pub mod template;
pub mod validate;

pub use model::{
    BranchConfig, CodeChange, Condition, ConditionOperator, ConditionType, ContractMetadata,
    DeploymentConfig, ExperimentContract, IdType, InsertionPoint, Platform, PullRequestConfig,
    StatsigConfig, TargetingRule, Tier, Variant, WrapStrategy,
};
pub use template::{create_default, PartialContract};
pub use validate::{is_valid_branch_name, is_valid_key, validate};

use std::path::{Path, PathBuf};

use crate::error::{AbforgeError, ContractValidationError, Result};

/// Directory holding contract files, relative to the project root
pub const CONTRACT_DIR: &str = "contract";

/// `<root>/contract/<key>.json`
pub fn contract_path(root: &Path, key: &str) -> PathBuf {
    root.join(CONTRACT_DIR).join(format!("{}.json", key))
}

/// Read, parse and validate a contract file
pub fn load_contract(path: &Path) -> Result<ExperimentContract> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AbforgeError::from(e).context(format!("reading {}", path.display())))?;

    let raw: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        ContractValidationError::new(vec![format!("contract: invalid JSON: {}", e)])
    })?;

    let contract = validate(&raw)?;
    tracing::debug!(
        key = %contract.experiment_key,
        variants = contract.variants.len(),
        code_changes = contract.code_changes.len(),
        "contract loaded"
    );
    Ok(contract)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_path_uses_contract_dir() {
        let path = contract_path(Path::new("/repo"), "btn");
        assert_eq!(path, PathBuf::from("/repo/contract/btn.json"));
    }

    #[test]
    fn load_reports_invalid_json_as_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_contract(&path).unwrap_err();
        assert!(matches!(err, AbforgeError::ContractValidation(_)));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = load_contract(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err.root(), AbforgeError::Io(_)));
    }
}
