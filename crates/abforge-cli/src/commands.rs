//! Subcommand handlers
//!
//! Each handler returns `Ok(true)` on success and `Ok(false)` when it already
//! reported a failure to the user; `Err` is for anything unexpected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use abforge_agent::providers::{ClientMode, ClientSet};
use abforge_agent::{
    restore_code_changes, GitCli, GitOps, Orchestrator, PatchStrategy, PipelineOptions,
    Preflight, SourcePatcher,
};
use abforge_core::contract::{contract_path, create_default, is_valid_key, load_contract};
use abforge_core::Settings;
use abforge_sandbox::CommandRunner;

use crate::output;
use crate::{Cli, Commands};

struct Session {
    root: PathBuf,
    settings: Settings,
    mode: ClientMode,
}

impl Session {
    fn new(cli: &Cli) -> Self {
        Settings::load_dotenv(&cli.root);
        Self {
            root: cli.root.clone(),
            settings: Settings::from_env(),
            mode: if cli.offline {
                ClientMode::AllowOffline
            } else {
                ClientMode::Live
            },
        }
    }

    fn clients(&self) -> Result<ClientSet> {
        let clients = ClientSet::from_settings(&self.settings, self.mode)?;
        if clients.offline {
            output::warn("running with offline experiment client");
        }
        Ok(clients)
    }

    fn git(&self) -> Arc<dyn GitOps> {
        Arc::new(GitCli::new(CommandRunner::new(&self.root)))
    }

    fn contract_path(&self, key: &str) -> PathBuf {
        contract_path(&self.root, key)
    }
}

pub async fn dispatch(cli: Cli) -> Result<bool> {
    if let Some(key) = cli.command.key() {
        if !is_valid_key(key) {
            output::failed(&format!(
                "invalid experiment key `{}`: use letters, digits, `-` and `_` only",
                key
            ));
            return Ok(false);
        }
    }

    let session = Session::new(&cli);

    match cli.command {
        Commands::Create {
            key,
            contract_path,
            backup,
            strategy,
            module,
        } => {
            let path = contract_path.unwrap_or_else(|| session.contract_path(&key));
            if !path.exists() {
                return bootstrap(&key, &path);
            }
            let options = PipelineOptions {
                backup,
                strategy,
                module_path: module,
            };
            create(&session, &path, options).await
        }
        Commands::Verify { key, strategy } => verify(&session, &key, strategy),
        Commands::Status(args) => status(&session, &args.key).await,
        Commands::Start(args) => {
            let details = session.clients()?.experiments.start(&args.key).await?;
            output::ok(&format!("{} is {}", details.id, details.status));
            Ok(true)
        }
        Commands::Stop(args) => {
            let details = session.clients()?.experiments.stop(&args.key).await?;
            output::ok(&format!("{} is {}", details.id, details.status));
            Ok(true)
        }
        Commands::Preflight {
            key,
            skip_build,
            strategy,
        } => preflight(&session, &key, skip_build, strategy).await,
        Commands::List => list(&session).await,
        Commands::Restore(args) => restore(&session, &args.key),
    }
}

fn bootstrap(key: &str, path: &Path) -> Result<bool> {
    create_default(key)
        .write_to(path)
        .with_context(|| format!("writing template to {}", path.display()))?;
    output::ok(&format!("wrote template contract {}", path.display()));
    println!("  Add at least one entry to `codeChanges`, adjust the variants,");
    println!("  then run `experiment create {}` again.", key);
    Ok(true)
}

async fn create(session: &Session, path: &Path, options: PipelineOptions) -> Result<bool> {
    let orchestrator =
        Orchestrator::new(&session.root, session.clients()?, session.git()).with_options(options);
    match orchestrator.run(path).await {
        Ok(report) => {
            output::pipeline(&report);
            Ok(true)
        }
        Err(aborted) => {
            output::pipeline(&aborted.report);
            println!();
            output::failed(&format!("aborted at {}: {}", aborted.stage, aborted.source));
            Ok(false)
        }
    }
}

fn verify(session: &Session, key: &str, strategy: PatchStrategy) -> Result<bool> {
    let path = session.contract_path(key);
    let contract = match load_contract(&path) {
        Ok(contract) => contract,
        Err(e) => {
            output::failed(&e.to_string());
            return Ok(false);
        }
    };
    output::ok(&format!(
        "{} is valid: {} variant(s), {} code change(s), branch {}",
        path.display(),
        contract.variants.len(),
        contract.code_changes.len(),
        contract.branch_name()
    ));

    let patcher = SourcePatcher::new(&session.root).with_strategy(strategy);
    let mut all_found = true;
    for change in &contract.code_changes {
        match patcher.detect_target(Path::new(&change.file), &change.function) {
            Ok(()) => output::ok(&format!("{} declares {}", change.file, change.function)),
            Err(e) => {
                all_found = false;
                output::failed(&e.to_string());
            }
        }
    }
    Ok(all_found)
}

async fn status(session: &Session, key: &str) -> Result<bool> {
    let details = session.clients()?.experiments.get(key).await?;
    output::heading(&format!("Experiment {}", details.id));
    println!("  status:     {}", details.status);
    if let Some(allocation) = details.allocation {
        println!("  allocation: {}%", allocation);
    }
    if let Some(gate) = &details.targeting_gate_id {
        println!("  gate:       {}", gate);
    }
    for group in &details.groups {
        println!("  group:      {} ({}%)", group.name, group.size);
    }
    Ok(true)
}

async fn preflight(
    session: &Session,
    key: &str,
    skip_build: bool,
    strategy: PatchStrategy,
) -> Result<bool> {
    let experiments = match ClientSet::from_settings(&session.settings, session.mode) {
        Ok(clients) => Some(clients.experiments),
        Err(e) => {
            tracing::debug!("no experiment client for preflight: {}", e);
            None
        }
    };
    let mut preflight = Preflight::new(&session.root, session.settings.clone(), experiments, session.git())
        .with_strategy(strategy);
    if skip_build {
        preflight = preflight.with_commands(Vec::new());
    }
    let report = preflight.run(key).await;
    output::preflight(key, &report);
    Ok(report.success())
}

async fn list(session: &Session) -> Result<bool> {
    let experiments = session.clients()?.experiments.list().await?;
    if experiments.is_empty() {
        println!("no experiments");
    }
    for experiment in experiments {
        println!("{:<32} {}", experiment.id, experiment.status);
    }
    Ok(true)
}

fn restore(session: &Session, key: &str) -> Result<bool> {
    let contract = load_contract(&session.contract_path(key))?;
    let results = restore_code_changes(&session.root, &contract);
    let restored = results.iter().all(|r| r.success);
    output::modifications(&results);
    if restored {
        output::ok(&format!("restored {} file(s)", results.len()));
    }
    Ok(restored)
}
