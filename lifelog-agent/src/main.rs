//! Command-line driver for the lifelog ReAct engine.
//!
//! Runs queries against scripted collaborators from a scenario file and prints
//! the result record (`run`) or one JSON event per line (`stream`) to stdout.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use lifelog_agent::ReActEngine;
use lifelog_agent::exit_codes;
use lifelog_agent::io::config::{DEFAULT_CONFIG_FILE, EngineConfig, load_config, write_config};
use lifelog_agent::io::scenario::{Scenario, load_scenario};
use lifelog_agent::logging;
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "lifelog-agent",
    version,
    about = "Safety-gated ReAct engine for questions about personal log data"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
    /// Answer a query and print the result record as JSON.
    Run(QueryArgs),
    /// Answer a query and print each engine event as a JSON line.
    Stream(QueryArgs),
    /// Print the engine configuration and collaborator roles.
    Info {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// TOML file scripting every collaborator.
    #[arg(long)]
    scenario: PathBuf,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    query: String,
}

#[tokio::main]
async fn main() {
    logging::init();
    match run(Cli::parse()).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force, path } => cmd_init(&path, force),
        Command::Run(args) => cmd_run(&args).await,
        Command::Stream(args) => cmd_stream(&args).await,
        Command::Info { config } => cmd_info(&config),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        debug!(path = %path.display(), "config exists, leaving it");
        return Ok(exit_codes::OK);
    }
    write_config(path, &EngineConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(exit_codes::OK)
}

async fn cmd_run(args: &QueryArgs) -> Result<i32> {
    let engine = build_engine(args)?;
    let record = engine.run(&args.query).await;
    print_json(&record, true)?;
    Ok(exit_codes::for_terminal(record.terminal))
}

async fn cmd_stream(args: &QueryArgs) -> Result<i32> {
    let engine = build_engine(args)?;
    let mut events = engine.stream(args.query.clone());
    let mut code = exit_codes::FAILED;
    while let Some(event) = events.next().await {
        if let Some(record) = &event.result {
            code = exit_codes::for_terminal(record.terminal);
        }
        print_json(&event, false)?;
    }
    Ok(code)
}

fn cmd_info(config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let (collaborators, _) = Scenario::default().into_collaborators();
    let engine = ReActEngine::new(collaborators, cfg)?;
    print_json(&engine.info(), true)?;
    Ok(exit_codes::OK)
}

fn build_engine(args: &QueryArgs) -> Result<ReActEngine> {
    let cfg = load_config(&args.config)?;
    let scenario = load_scenario(&args.scenario)?;
    let (collaborators, _) = scenario.into_collaborators();
    Ok(ReActEngine::new(collaborators, cfg)?)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("serialize json")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{payload}").context("write stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["lifelog-agent", "init"]);
        match cli.command {
            Command::Init { force, path } => {
                assert!(!force);
                assert_eq!(path, PathBuf::from(DEFAULT_CONFIG_FILE));
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["lifelog-agent", "init", "--force", "--path", "cfg.toml"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from([
            "lifelog-agent",
            "run",
            "--scenario",
            "sleep.toml",
            "How did I sleep?",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.scenario, PathBuf::from("sleep.toml"));
                assert_eq!(args.query, "How did I sleep?");
                assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_scenario() {
        assert!(Cli::try_parse_from(["lifelog-agent", "run", "q"]).is_err());
    }

    #[test]
    fn init_writes_default_config_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lifelog-agent.toml");
        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        assert_eq!(load_config(&path).expect("load"), EngineConfig::default());

        std::fs::write(&path, "max_iterations = 2\n").expect("edit");
        cmd_init(&path, false).expect("init");
        assert_eq!(load_config(&path).expect("load").max_iterations, 2);

        cmd_init(&path, true).expect("init --force");
        assert_eq!(load_config(&path).expect("load").max_iterations, 3);
    }
}
