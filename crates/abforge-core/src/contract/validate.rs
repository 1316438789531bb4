//! Contract validation
//!
//! Validation walks the raw JSON value instead of relying on serde so that
//! every violated constraint is reported, not only the first one serde trips on.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use super::model::{
    ConditionOperator, ConditionType, ExperimentContract, IdType, InsertionPoint, Platform, Tier,
    WrapStrategy,
};
use crate::error::ContractValidationError;

lazy_static! {
    static ref KEY_PATTERN: Regex = Regex::new(r"(?i)^[a-z0-9_-]+$").unwrap();
    static ref BRANCH_PATTERN: Regex = Regex::new(r"(?i)^exp/[a-z0-9_-]+$").unwrap();
}

const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// True for keys usable as `exp/<key>` branch suffixes
pub fn is_valid_key(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}

/// True for branch names of the form `exp/<key>`
pub fn is_valid_branch_name(branch: &str) -> bool {
    BRANCH_PATTERN.is_match(branch)
}

/// Validate a raw contract document and return the typed contract.
///
/// All violations are collected as `"<field path>: <message>"` lines.
pub fn validate(raw: &Value) -> Result<ExperimentContract, ContractValidationError> {
    let mut checker = Checker::default();

    let Some(root) = raw.as_object() else {
        return Err(ContractValidationError::new(vec![
            "contract: expected a JSON object".to_string(),
        ]));
    };

    checker.check_root(root);

    if !checker.issues.is_empty() {
        return Err(ContractValidationError::new(checker.issues));
    }

    let contract: ExperimentContract = serde_json::from_value(raw.clone())
        .map_err(|e| ContractValidationError::new(vec![format!("contract: {}", e)]))?;

    Ok(contract.normalize())
}

#[derive(Default)]
struct Checker {
    issues: Vec<String>,
}

impl Checker {
    fn issue(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(format!("{}: {}", path, message.into()));
    }

    fn check_root(&mut self, root: &Map<String, Value>) {
        match root.get("experimentKey") {
            None => self.issue("experimentKey", "is required"),
            Some(value) => {
                if let Some(key) = self.string(value, "experimentKey") {
                    if !is_valid_key(key) {
                        self.issue(
                            "experimentKey",
                            format!("'{}' must match [a-z0-9_-]+", key),
                        );
                    }
                }
            }
        }

        for field in ["name", "description", "hypothesis"] {
            if let Some(value) = root.get(field) {
                self.string(value, field);
            }
        }

        match root.get("variants") {
            None => self.issue("variants", "is required"),
            Some(value) => self.check_variants(value),
        }

        match root.get("codeChanges") {
            None => self.issue("codeChanges", "is required"),
            Some(value) => self.check_code_changes(value),
        }

        if let Some(value) = root.get("targetingRules") {
            self.check_targeting_rules(value);
        }

        if let Some(value) = root.get("allocation") {
            self.percentage(value, "allocation");
        }

        match root.get("branchConfig") {
            None => self.issue("branchConfig", "is required"),
            Some(value) => self.check_branch_config(value),
        }

        if let Some(value) = root.get("deployment") {
            self.check_deployment(value);
        }

        if let Some(value) = root.get("statsig") {
            self.check_statsig(value);
        }

        if let Some(value) = root.get("pullRequest") {
            self.check_pull_request(value);
        }

        if let Some(value) = root.get("metadata") {
            if let Some(metadata) = self.object(value, "metadata") {
                if let Some(author) = metadata.get("author") {
                    self.string(author, "metadata.author");
                }
                if let Some(tags) = metadata.get("tags") {
                    self.string_list(tags, "metadata.tags");
                }
            }
        }
    }

    fn check_variants(&mut self, value: &Value) {
        let Some(variants) = self.object(value, "variants") else {
            return;
        };

        if variants.len() < 2 {
            self.issue(
                "variants",
                format!("at least 2 variants are required, found {}", variants.len()),
            );
        }

        let mut total = 0.0;
        let mut all_numeric = true;
        for (name, variant) in variants {
            let path = format!("variants.{}", name);
            let Some(variant) = self.object(variant, &path) else {
                all_numeric = false;
                continue;
            };

            for field in ["name", "description"] {
                if let Some(value) = variant.get(field) {
                    self.string(value, &format!("{}.{}", path, field));
                }
            }
            if let Some(parameters) = variant.get("parameters") {
                self.object(parameters, &format!("{}.parameters", path));
            }

            let pass_path = format!("{}.passPercentage", path);
            match variant.get("passPercentage") {
                None => {
                    self.issue(&pass_path, "is required");
                    all_numeric = false;
                }
                Some(value) => match self.percentage(value, &pass_path) {
                    Some(pct) => total += pct,
                    None => all_numeric = false,
                },
            }
        }

        if all_numeric && variants.len() >= 2 && (total - 100.0).abs() > 0.001 {
            self.issue(
                "variants",
                format!("passPercentage values must sum to 100, got {}", total),
            );
        }
    }

    fn check_code_changes(&mut self, value: &Value) {
        let Some(changes) = self.array(value, "codeChanges") else {
            return;
        };

        if changes.is_empty() {
            self.issue("codeChanges", "at least 1 code change is required");
        }

        for (idx, change) in changes.iter().enumerate() {
            let path = format!("codeChanges[{}]", idx);
            let Some(change) = self.object(change, &path) else {
                continue;
            };

            for field in ["file", "function", "parameterUsage"] {
                let field_path = format!("{}.{}", path, field);
                match change.get(field) {
                    None => self.issue(&field_path, "is required"),
                    Some(value) => {
                        if let Some(text) = self.string(value, &field_path) {
                            if text.trim().is_empty() {
                                self.issue(&field_path, "must not be empty");
                            }
                        }
                    }
                }
            }

            if let Some(value) = change.get("wrapWith") {
                self.one_of(value, &format!("{}.wrapWith", path), WrapStrategy::VALUES);
            }
            if let Some(value) = change.get("insertionPoint") {
                self.one_of(
                    value,
                    &format!("{}.insertionPoint", path),
                    InsertionPoint::VALUES,
                );
            }
            if let Some(value) = change.get("customCode") {
                if !value.is_null() {
                    self.string(value, &format!("{}.customCode", path));
                }
            }
        }
    }

    fn check_targeting_rules(&mut self, value: &Value) {
        let Some(rules) = self.array(value, "targetingRules") else {
            return;
        };

        for (idx, rule) in rules.iter().enumerate() {
            let path = format!("targetingRules[{}]", idx);
            let Some(rule) = self.object(rule, &path) else {
                continue;
            };

            match rule.get("name") {
                None => self.issue(&format!("{}.name", path), "is required"),
                Some(value) => {
                    self.string(value, &format!("{}.name", path));
                }
            }

            if let Some(value) = rule.get("passPercentage") {
                self.percentage(value, &format!("{}.passPercentage", path));
            }

            if let Some(value) = rule.get("environments") {
                let env_path = format!("{}.environments", path);
                if let Some(envs) = self.array(value, &env_path) {
                    for (env_idx, env) in envs.iter().enumerate() {
                        self.one_of(env, &format!("{}[{}]", env_path, env_idx), Tier::VALUES);
                    }
                }
            }

            if let Some(value) = rule.get("conditions") {
                let cond_path = format!("{}.conditions", path);
                let Some(conditions) = self.array(value, &cond_path) else {
                    continue;
                };
                for (cond_idx, condition) in conditions.iter().enumerate() {
                    let path = format!("{}[{}]", cond_path, cond_idx);
                    let Some(condition) = self.object(condition, &path) else {
                        continue;
                    };
                    match condition.get("type") {
                        None => self.issue(&format!("{}.type", path), "is required"),
                        Some(value) => {
                            self.one_of(value, &format!("{}.type", path), ConditionType::VALUES)
                        }
                    }
                    match condition.get("operator") {
                        None => self.issue(&format!("{}.operator", path), "is required"),
                        Some(value) => self.one_of(
                            value,
                            &format!("{}.operator", path),
                            ConditionOperator::VALUES,
                        ),
                    }
                    if let Some(value) = condition.get("field") {
                        self.string(value, &format!("{}.field", path));
                    }
                }
            }
        }
    }

    fn check_branch_config(&mut self, value: &Value) {
        let Some(config) = self.object(value, "branchConfig") else {
            return;
        };

        match config.get("branchName") {
            None => self.issue("branchConfig.branchName", "is required"),
            Some(value) => {
                if let Some(branch) = self.string(value, "branchConfig.branchName") {
                    if !is_valid_branch_name(branch) {
                        self.issue(
                            "branchConfig.branchName",
                            format!("'{}' must match exp/[a-z0-9_-]+", branch),
                        );
                    }
                }
            }
        }

        for field in ["baseBranch", "targetBranch"] {
            if let Some(value) = config.get(field) {
                let path = format!("branchConfig.{}", field);
                if let Some(text) = self.string(value, &path) {
                    if text.trim().is_empty() {
                        self.issue(&path, "must not be empty");
                    }
                }
            }
        }
    }

    fn check_deployment(&mut self, value: &Value) {
        let Some(deployment) = self.object(value, "deployment") else {
            return;
        };

        if let Some(value) = deployment.get("platform") {
            self.one_of(value, "deployment.platform", Platform::VALUES);
        }
        if let Some(value) = deployment.get("waitForDeployment") {
            self.boolean(value, "deployment.waitForDeployment");
        }
        if let Some(value) = deployment.get("timeout") {
            match value.as_u64() {
                Some(ms) if (MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&ms) => {}
                Some(ms) => self.issue(
                    "deployment.timeout",
                    format!(
                        "{} is outside {}..={} milliseconds",
                        ms, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS
                    ),
                ),
                None => self.issue("deployment.timeout", "expected a positive integer"),
            }
        }
    }

    fn check_statsig(&mut self, value: &Value) {
        let Some(statsig) = self.object(value, "statsig") else {
            return;
        };

        if let Some(value) = statsig.get("idType") {
            self.one_of(value, "statsig.idType", IdType::VALUES);
        }
        if let Some(value) = statsig.get("environment") {
            self.one_of(value, "statsig.environment", Tier::VALUES);
        }
        if let Some(value) = statsig.get("autoStart") {
            self.boolean(value, "statsig.autoStart");
        }
        if let Some(value) = statsig.get("targetingGateId") {
            if !value.is_null() {
                self.string(value, "statsig.targetingGateId");
            }
        }
    }

    fn check_pull_request(&mut self, value: &Value) {
        let Some(pr) = self.object(value, "pullRequest") else {
            return;
        };

        for field in ["enabled", "draft"] {
            if let Some(value) = pr.get(field) {
                self.boolean(value, &format!("pullRequest.{}", field));
            }
        }
        for field in ["reviewers", "labels"] {
            if let Some(value) = pr.get(field) {
                self.string_list(value, &format!("pullRequest.{}", field));
            }
        }
    }

    fn object<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
        let object = value.as_object();
        if object.is_none() {
            self.issue(path, "expected an object");
        }
        object
    }

    fn array<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
        let array = value.as_array();
        if array.is_none() {
            self.issue(path, "expected an array");
        }
        array
    }

    fn string<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a str> {
        let text = value.as_str();
        if text.is_none() {
            self.issue(path, "expected a string");
        }
        text
    }

    fn string_list(&mut self, value: &Value, path: &str) {
        if let Some(items) = self.array(value, path) {
            for (idx, item) in items.iter().enumerate() {
                self.string(item, &format!("{}[{}]", path, idx));
            }
        }
    }

    fn boolean(&mut self, value: &Value, path: &str) {
        if !value.is_boolean() {
            self.issue(path, "expected a boolean");
        }
    }

    fn percentage(&mut self, value: &Value, path: &str) -> Option<f64> {
        match value.as_f64() {
            Some(pct) if (0.0..=100.0).contains(&pct) => Some(pct),
            Some(pct) => {
                self.issue(path, format!("{} is outside 0..=100", pct));
                None
            }
            None => {
                self.issue(path, "expected a number between 0 and 100");
                None
            }
        }
    }

    fn one_of(&mut self, value: &Value, path: &str, allowed: &[&str]) {
        match value.as_str() {
            Some(text) if allowed.contains(&text) => {}
            Some(text) => self.issue(
                path,
                format!("'{}' is not one of [{}]", text, allowed.join(", ")),
            ),
            None => self.issue(
                path,
                format!("expected one of [{}]", allowed.join(", ")),
            ),
        }
    }
}
