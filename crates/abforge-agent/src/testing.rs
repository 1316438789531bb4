//! Test doubles shared by the unit tests of this crate

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use abforge_core::contract::{contract_path, create_default, CodeChange, ExperimentContract};
use abforge_core::error::Result;
use abforge_core::GitError;

use crate::git::{GitOps, SyncState};

pub const BUTTON_SOURCE: &str =
    "import React from 'react';\n\nexport const Button = (props) => {\n  return <button>{props.label}</button>;\n};\n";

pub fn button_change() -> CodeChange {
    CodeChange {
        file: "Button.tsx".to_string(),
        function: "Button".to_string(),
        wrap_with: Default::default(),
        parameter_usage: "color".to_string(),
        insertion_point: Default::default(),
        custom_code: None,
    }
}

pub fn button_contract() -> ExperimentContract {
    create_default("btn")
        .complete(vec![button_change()])
        .expect("button contract is valid")
}

pub fn write_contract(root: &Path, contract: &ExperimentContract) {
    let path = contract_path(root, &contract.experiment_key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, serde_json::to_string_pretty(contract).unwrap()).unwrap();
}

/// `Button.tsx` plus a valid `contract/btn.json`
pub fn write_button_project(root: &Path) {
    std::fs::write(root.join("Button.tsx"), BUTTON_SOURCE).unwrap();
    write_contract(root, &button_contract());
}

#[derive(Debug)]
struct FakeGitState {
    current: String,
    branches: BTreeSet<String>,
    dirty: bool,
    sync: SyncState,
    fail_on: Option<&'static str>,
    calls: Vec<String>,
}

/// Records git operations instead of running them
#[derive(Debug)]
pub struct FakeGit {
    state: Mutex<FakeGitState>,
}

impl FakeGit {
    pub fn on_branch(name: &str) -> Self {
        let branches = [name.to_string(), "main".to_string()].into_iter().collect();
        Self {
            state: Mutex::new(FakeGitState {
                current: name.to_string(),
                branches,
                dirty: false,
                sync: SyncState::Tracking { ahead: 0, behind: 0 },
                fail_on: None,
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_dirty_tree(self) -> Self {
        self.state.lock().dirty = true;
        self
    }

    pub fn with_branch(self, name: &str) -> Self {
        self.state.lock().branches.insert(name.to_string());
        self
    }

    /// Make the operation named `op` fail
    pub fn failing_on(self, op: &'static str) -> Self {
        self.state.lock().fail_on = Some(op);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn record(&self, op: &'static str, arg: &str) -> Result<()> {
        let mut state = self.state.lock();
        let call = if arg.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, arg)
        };
        state.calls.push(call.clone());
        if state.fail_on == Some(op) {
            return Err(GitError::CommandFailed {
                args: call,
                code: 128,
                stderr: "fatal: simulated failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl GitOps for FakeGit {
    async fn current_branch(&self) -> Result<String> {
        Ok(self.state.lock().current.clone())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().branches.contains(name))
    }

    async fn checkout(&self, name: &str) -> Result<()> {
        self.record("checkout", name)?;
        self.state.lock().current = name.to_string();
        Ok(())
    }

    async fn pull(&self, branch: &str) -> Result<()> {
        self.record("pull", branch)
    }

    async fn create_branch(&self, name: &str) -> Result<()> {
        self.record("create_branch", name)?;
        let mut state = self.state.lock();
        state.branches.insert(name.to_string());
        state.current = name.to_string();
        Ok(())
    }

    async fn stage_all(&self) -> Result<()> {
        self.record("stage_all", "")
    }

    async fn commit(&self, message: &str) -> Result<()> {
        let first_line = message.lines().next().unwrap_or_default().to_string();
        self.record("commit", &first_line)?;
        self.state.lock().dirty = false;
        Ok(())
    }

    async fn push_upstream(&self, branch: &str) -> Result<()> {
        self.record("push", branch)
    }

    async fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(self.state.lock().dirty)
    }

    async fn sync_state(&self) -> Result<SyncState> {
        Ok(self.state.lock().sync)
    }
}
