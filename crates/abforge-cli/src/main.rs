use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use abforge_agent::PatchStrategy;

mod commands;
mod output;

/// Contract-driven A/B experiments: patch, push, deploy a preview and create the experiment
#[derive(Parser, Debug)]
#[command(name = "experiment", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root holding `contract/` and the sources to patch
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Use offline clients when credentials are missing
    #[arg(long, global = true)]
    offline: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct KeyArgs {
    /// Experiment key, `contract/<key>.json`
    key: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline, or write a template contract if none exists
    Create {
        key: String,

        /// Contract file (default: contract/<key>.json)
        contract_path: Option<PathBuf>,

        /// Write `<file>.rollback` copies before patching
        #[arg(long)]
        backup: bool,

        /// How target functions are located
        #[arg(long, default_value = "syntax", value_parser = parse_strategy)]
        strategy: PatchStrategy,

        /// Module the injected import reads from
        #[arg(long, value_name = "MODULE")]
        module: Option<String>,
    },

    /// Validate the contract and check every code target exists
    Verify {
        key: String,

        /// Locator used to find each target; match the one given to `create`
        #[arg(long, default_value = "syntax", value_parser = parse_strategy)]
        strategy: PatchStrategy,
    },

    /// Show the remote experiment
    Status(KeyArgs),

    /// Set the remote experiment to active
    Start(KeyArgs),

    /// Set the remote experiment to stopped
    Stop(KeyArgs),

    /// Read-only readiness checks before a deploy
    Preflight {
        key: String,

        /// Skip the local build and lint commands
        #[arg(long)]
        skip_build: bool,

        /// Locator used to find each target; match the one given to `create`
        #[arg(long, default_value = "syntax", value_parser = parse_strategy)]
        strategy: PatchStrategy,
    },

    /// List remote experiments
    List,

    /// Restore patched files from their rollback copies
    Restore(KeyArgs),
}

impl Commands {
    /// Experiment key named on the command line, if the subcommand takes one
    fn key(&self) -> Option<&str> {
        match self {
            Commands::Create { key, .. }
            | Commands::Verify { key, .. }
            | Commands::Preflight { key, .. } => Some(key.as_str()),
            Commands::Status(args)
            | Commands::Start(args)
            | Commands::Stop(args)
            | Commands::Restore(args) => Some(args.key.as_str()),
            Commands::List => None,
        }
    }
}

fn parse_strategy(value: &str) -> Result<PatchStrategy, String> {
    PatchStrategy::parse(value).ok_or_else(|| {
        format!(
            "unknown strategy `{}`, expected one of: {}",
            value,
            PatchStrategy::VALUES.join(", ")
        )
    })
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = e.print();
                return ExitCode::SUCCESS;
            }
            let _ = e.print();
            eprintln!();
            let _ = <Cli as clap::CommandFactory>::command().print_help();
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cli.verbose);

    match commands::dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            output::failed(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("experiment").chain(args.iter().copied()))
    }

    #[test]
    fn create_takes_optional_contract_path_and_flags() {
        let cli = parse(&["create", "btn", "custom/btn.json", "--backup", "--offline"]).unwrap();
        assert!(cli.offline);
        match cli.command {
            Commands::Create {
                key,
                contract_path,
                backup,
                strategy,
                module,
            } => {
                assert_eq!(key, "btn");
                assert_eq!(contract_path, Some(PathBuf::from("custom/btn.json")));
                assert!(backup);
                assert_eq!(strategy, PatchStrategy::Syntax);
                assert!(module.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn create_accepts_each_strategy() {
        for value in PatchStrategy::VALUES {
            let cli = parse(&["create", "btn", "--strategy", value]).unwrap();
            match cli.command {
                Commands::Create { strategy, .. } => assert_eq!(strategy.as_str(), *value),
                other => panic!("unexpected command: {other:?}"),
            }
        }
        assert!(parse(&["create", "btn", "--strategy", "ast"]).is_err());
    }

    #[test]
    fn key_commands_require_a_key() {
        for name in ["verify", "status", "start", "stop", "preflight", "restore"] {
            let err = parse(&[name]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument, "{name}");
        }
        assert!(matches!(
            parse(&["stop", "btn"]).unwrap().command,
            Commands::Stop(KeyArgs { key }) if key == "btn"
        ));
    }

    #[test]
    fn verify_and_preflight_take_a_strategy() {
        match parse(&["verify", "btn", "--strategy", "line-scan"]).unwrap().command {
            Commands::Verify { strategy, .. } => assert_eq!(strategy, PatchStrategy::LineScan),
            other => panic!("unexpected command: {other:?}"),
        }
        match parse(&["preflight", "btn"]).unwrap().command {
            Commands::Preflight { strategy, .. } => assert_eq!(strategy, PatchStrategy::Syntax),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn every_key_is_reported_for_validation() {
        for args in [
            &["create", "../outside"][..],
            &["verify", "../outside"],
            &["status", "../outside"],
            &["preflight", "../outside"],
            &["restore", "../outside"],
        ] {
            assert_eq!(parse(args).unwrap().command.key(), Some("../outside"));
        }
        assert_eq!(parse(&["list"]).unwrap().command.key(), None);
    }

    #[test]
    fn unknown_subcommand_is_an_error() {
        let err = parse(&["launch", "btn"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn help_is_a_subcommand() {
        let err = parse(&["help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn verbosity_counts() {
        let cli = parse(&["-vv", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::List));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn command_definition_is_consistent() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }
}
