//! Environment-derived settings
//!
//! Credentials for the three SaaS APIs come from the process environment,
//! optionally seeded from `.env.local` and `.env` in the project root. Values
//! already present in the process environment are never overridden.

use std::path::Path;

use crate::contract::Tier;
use crate::error::{AbforgeError, Result};

pub const STATSIG_CONSOLE_API_KEY: &str = "STATSIG_CONSOLE_API_KEY";
pub const STATSIG_CLIENT_KEY: &str = "NEXT_PUBLIC_STATSIG_CLIENT_KEY";
pub const STATSIG_ENVIRONMENT: &str = "NEXT_PUBLIC_STATSIG_ENVIRONMENT";
pub const STATSIG_API_URL: &str = "STATSIG_API_URL";
pub const VERCEL_TOKEN: &str = "VERCEL_TOKEN";
pub const VERCEL_ORG_ID: &str = "VERCEL_ORG_ID";
pub const VERCEL_PROJECT_ID: &str = "VERCEL_PROJECT_ID";
pub const VERCEL_PROJECT_NAME: &str = "VERCEL_PROJECT_NAME";
pub const VERCEL_API_URL: &str = "VERCEL_API_URL";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const GITHUB_REPOSITORY: &str = "GITHUB_REPOSITORY";
pub const GITHUB_API_URL: &str = "GITHUB_API_URL";
pub const EXPERIMENT_BRANCH: &str = "EXPERIMENT_BRANCH";

pub const DEFAULT_STATSIG_API_URL: &str = "https://statsigapi.net/console/v1";
pub const DEFAULT_VERCEL_API_URL: &str = "https://api.vercel.com";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_VERCEL_PROJECT_NAME: &str = "storefront";

const CONSOLE_KEY_PREFIX: &str = "console-";
const CLIENT_KEY_PREFIX: &str = "client-";

/// Everything the pipeline reads from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub statsig_console_key: Option<String>,
    pub statsig_client_key: Option<String>,
    pub statsig_tier: Option<String>,
    pub statsig_api_url: String,

    pub vercel_token: Option<String>,
    pub vercel_org_id: Option<String>,
    pub vercel_project_id: Option<String>,
    pub vercel_project_name: String,
    pub vercel_api_url: String,

    pub github_token: Option<String>,
    pub github_repository: Option<String>,
    pub github_api_url: String,

    pub experiment_branch: Option<String>,
}

/// Result of checking the environment for preflight
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvAudit {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Settings {
    /// Seed the process environment from `.env.local` and `.env` under `root`
    pub fn load_dotenv(root: &Path) {
        for name in [".env.local", ".env"] {
            let path = root.join(name);
            if !path.exists() {
                continue;
            }
            match dotenvy::from_path(&path) {
                Ok(()) => tracing::debug!("loaded environment from {}", path.display()),
                Err(e) => tracing::warn!("ignoring {}: {}", path.display(), e),
            }
        }
    }

    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary lookup, blank values count as absent
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            statsig_console_key: get(STATSIG_CONSOLE_API_KEY),
            statsig_client_key: get(STATSIG_CLIENT_KEY),
            statsig_tier: get(STATSIG_ENVIRONMENT),
            statsig_api_url: get(STATSIG_API_URL)
                .unwrap_or_else(|| DEFAULT_STATSIG_API_URL.to_string()),
            vercel_token: get(VERCEL_TOKEN),
            vercel_org_id: get(VERCEL_ORG_ID),
            vercel_project_id: get(VERCEL_PROJECT_ID),
            vercel_project_name: get(VERCEL_PROJECT_NAME)
                .unwrap_or_else(|| DEFAULT_VERCEL_PROJECT_NAME.to_string()),
            vercel_api_url: get(VERCEL_API_URL)
                .unwrap_or_else(|| DEFAULT_VERCEL_API_URL.to_string()),
            github_token: get(GITHUB_TOKEN),
            github_repository: get(GITHUB_REPOSITORY),
            github_api_url: get(GITHUB_API_URL)
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            experiment_branch: get(EXPERIMENT_BRANCH),
        }
    }

    pub fn require_statsig_console_key(&self) -> Result<&str> {
        self.statsig_console_key
            .as_deref()
            .ok_or_else(|| AbforgeError::MissingEnv(vec![STATSIG_CONSOLE_API_KEY.to_string()]))
    }

    /// Token and project id, or the names of whichever are missing
    pub fn vercel_credentials(&self) -> std::result::Result<(&str, &str), Vec<String>> {
        match (&self.vercel_token, &self.vercel_project_id) {
            (Some(token), Some(project)) => Ok((token.as_str(), project.as_str())),
            (token, project) => {
                let mut missing = Vec::new();
                if token.is_none() {
                    missing.push(VERCEL_TOKEN.to_string());
                }
                if project.is_none() {
                    missing.push(VERCEL_PROJECT_ID.to_string());
                }
                Err(missing)
            }
        }
    }

    pub fn github_credentials(&self) -> std::result::Result<(&str, &str), Vec<String>> {
        match (&self.github_token, &self.github_repository) {
            (Some(token), Some(repo)) => Ok((token.as_str(), repo.as_str())),
            (token, repo) => {
                let mut missing = Vec::new();
                if token.is_none() {
                    missing.push(GITHUB_TOKEN.to_string());
                }
                if repo.is_none() {
                    missing.push(GITHUB_REPOSITORY.to_string());
                }
                Err(missing)
            }
        }
    }

    /// Configured tier, development when unset
    pub fn tier(&self) -> Result<Tier> {
        match self.statsig_tier.as_deref() {
            None => Ok(Tier::Development),
            Some(raw) => Tier::parse(raw).ok_or_else(|| AbforgeError::InvalidEnv {
                name: STATSIG_ENVIRONMENT.to_string(),
                reason: format!("must be one of [{}], got '{}'", Tier::VALUES.join(", "), raw),
            }),
        }
    }

    /// Presence and format checks used by preflight
    pub fn audit(&self) -> EnvAudit {
        let mut audit = EnvAudit::default();

        match &self.statsig_console_key {
            None => audit
                .errors
                .push(format!("{} is not set", STATSIG_CONSOLE_API_KEY)),
            Some(key) if !key.starts_with(CONSOLE_KEY_PREFIX) => audit.errors.push(format!(
                "{} must start with '{}'",
                STATSIG_CONSOLE_API_KEY, CONSOLE_KEY_PREFIX
            )),
            Some(_) => {}
        }

        match &self.statsig_client_key {
            None => audit.errors.push(format!("{} is not set", STATSIG_CLIENT_KEY)),
            Some(key) if !key.starts_with(CLIENT_KEY_PREFIX) => audit.errors.push(format!(
                "{} must start with '{}'",
                STATSIG_CLIENT_KEY, CLIENT_KEY_PREFIX
            )),
            Some(_) => {}
        }

        match (&self.statsig_tier, self.tier()) {
            (None, _) => audit.warnings.push(format!(
                "{} is not set, assuming development",
                STATSIG_ENVIRONMENT
            )),
            (Some(_), Err(e)) => audit.errors.push(e.to_string()),
            (Some(_), Ok(_)) => {}
        }

        if let Err(missing) = self.vercel_credentials() {
            audit.warnings.push(format!(
                "{} not set, deployments will use the offline fallback",
                missing.join(", ")
            ));
        }

        if let Err(missing) = self.github_credentials() {
            audit.warnings.push(format!(
                "{} not set, pull requests are disabled",
                missing.join(", ")
            ));
        }

        audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]);
        assert_eq!(s.statsig_api_url, DEFAULT_STATSIG_API_URL);
        assert_eq!(s.vercel_project_name, DEFAULT_VERCEL_PROJECT_NAME);
        assert!(s.statsig_console_key.is_none());
    }

    #[test]
    fn blank_values_count_as_missing() {
        let s = settings(&[(STATSIG_CONSOLE_API_KEY, "   ")]);
        let err = s.require_statsig_console_key().unwrap_err();
        match err {
            AbforgeError::MissingEnv(names) => {
                assert_eq!(names, vec![STATSIG_CONSOLE_API_KEY.to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn audit_checks_key_prefixes_and_tier() {
        let s = settings(&[
            (STATSIG_CONSOLE_API_KEY, "secret-abc"),
            (STATSIG_CLIENT_KEY, "client-abc"),
            (STATSIG_ENVIRONMENT, "qa"),
        ]);
        let audit = s.audit();
        assert_eq!(audit.errors.len(), 2);
        assert!(audit.errors[0].contains("console-"));
        assert!(audit.errors[1].contains("qa"));
        assert_eq!(audit.warnings.len(), 2);
    }

    #[test]
    fn audit_passes_with_well_formed_env() {
        let s = settings(&[
            (STATSIG_CONSOLE_API_KEY, "console-abc"),
            (STATSIG_CLIENT_KEY, "client-abc"),
            (STATSIG_ENVIRONMENT, "staging"),
            (VERCEL_TOKEN, "t"),
            (VERCEL_PROJECT_ID, "prj_1"),
            (GITHUB_TOKEN, "ghp"),
            (GITHUB_REPOSITORY, "techvault/storefront"),
        ]);
        let audit = s.audit();
        assert!(audit.errors.is_empty());
        assert!(audit.warnings.is_empty());
        assert_eq!(s.tier().unwrap(), Tier::Staging);
    }

    #[test]
    fn malformed_tier_is_an_invalid_env_error() {
        assert_eq!(settings(&[]).tier().unwrap(), Tier::Development);

        match settings(&[(STATSIG_ENVIRONMENT, "prod")]).tier().unwrap_err() {
            AbforgeError::InvalidEnv { name, reason } => {
                assert_eq!(name, STATSIG_ENVIRONMENT);
                assert!(reason.contains("got 'prod'"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dotenv_files_do_not_override_process_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "ABFORGE_DOTENV_PROBE=from-file\nABFORGE_DOTENV_ONLY=file-only\n",
        )
        .unwrap();
        std::env::set_var("ABFORGE_DOTENV_PROBE", "from-process");

        Settings::load_dotenv(dir.path());

        assert_eq!(
            std::env::var("ABFORGE_DOTENV_PROBE").unwrap(),
            "from-process"
        );
        assert_eq!(std::env::var("ABFORGE_DOTENV_ONLY").unwrap(), "file-only");
    }
}
