//! Command-line tools for inspecting playbooks and adapter config.
//!
//! Adaptation itself needs an LLM client and a task environment, which are
//! supplied by the embedding application through the library API.

use ace::core::playbook::Playbook;
use ace::dedup::Deduplicator;
use ace::io::config::{AdapterConfig, load_config, write_config};
use ace::io::playbook_store::{load_playbook, save_playbook};
use ace::logging;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "ace",
    version,
    about = "Playbook tooling for agentic context engineering"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or maintain a playbook file.
    Playbook {
        #[command(subcommand)]
        command: PlaybookCommand,
    },
    /// Create or check an adapter config file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum PlaybookCommand {
    /// Print the playbook the way prompts see it.
    Show { file: PathBuf },
    /// Print section, tip and scenario-tag counts as JSON.
    Stats { file: PathBuf },
    /// Check the file against the schema and playbook invariants.
    Check { file: PathBuf },
    /// Remove listed tips that duplicate the rest of the playbook (substring match).
    Dedup {
        file: PathBuf,
        /// Candidate tip ids; only these can be removed.
        #[arg(long, num_args = 1.., required = true)]
        ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a config file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(default_value = "ace.toml")]
        path: PathBuf,
    },
    /// Load and validate a config file.
    Check { file: PathBuf },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Playbook { command } => match command {
            PlaybookCommand::Show { file } => cmd_show(&file),
            PlaybookCommand::Stats { file } => cmd_stats(&file),
            PlaybookCommand::Check { file } => cmd_check(&file),
            PlaybookCommand::Dedup { file, ids } => cmd_dedup(&file, &ids),
        },
        Command::Config { command } => match command {
            ConfigCommand::Init { force, path } => cmd_config_init(&path, force),
            ConfigCommand::Check { file } => cmd_config_check(&file),
        },
    }
}

fn cmd_show(file: &Path) -> Result<()> {
    let playbook = load_playbook(file)?;
    if playbook.is_empty() {
        println!("(empty playbook)");
    } else {
        println!("{}", playbook.as_prompt());
    }
    Ok(())
}

fn cmd_stats(file: &Path) -> Result<()> {
    let playbook = load_playbook(file)?;
    let payload = serde_json::to_string_pretty(&playbook.stats()).context("serialize stats")?;
    println!("{payload}");
    Ok(())
}

fn cmd_check(file: &Path) -> Result<()> {
    let playbook = load_playbook(file)?;
    println!("ok: {} tips", playbook.len());
    Ok(())
}

fn cmd_dedup(file: &Path, ids: &[String]) -> Result<()> {
    let mut playbook = load_playbook(file)?;
    let removed = dedup_ids(&mut playbook, ids)?;
    if removed.is_empty() {
        println!("no duplicates");
        return Ok(());
    }
    save_playbook(file, &playbook)?;
    for id in removed {
        println!("{id}");
    }
    Ok(())
}

/// Reject unknown ids up front, then drop the duplicates among them.
fn dedup_ids(playbook: &mut Playbook, ids: &[String]) -> Result<Vec<String>> {
    let unknown: Vec<&str> = ids
        .iter()
        .filter(|id| playbook.get_tip(id).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        bail!("unknown tip ids: {}", unknown.join(", "));
    }
    Ok(playbook.deduplicate(&Deduplicator::substring_only(), ids))
}

fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AdapterConfig::default())
}

fn cmd_config_check(file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("config not found: {}", file.display());
    }
    let config = load_config(file)?;
    println!(
        "ok: {} epochs, {} interaction steps, dedup every {} samples",
        config.epochs, config.max_interaction_steps, config.dedup.frequency
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_init_defaults_path() {
        let cli = Cli::parse_from(["ace", "config", "init"]);
        match cli.command {
            Command::Config {
                command: ConfigCommand::Init { force, path },
            } => {
                assert!(!force);
                assert_eq!(path, PathBuf::from("ace.toml"));
            }
            _ => panic!("expected config init"),
        }
    }

    #[test]
    fn parse_playbook_dedup_ids() {
        let cli = Cli::parse_from([
            "ace", "playbook", "dedup", "pb.json", "--ids", "a-00001", "a-00002",
        ]);
        match cli.command {
            Command::Playbook {
                command: PlaybookCommand::Dedup { file, ids },
            } => {
                assert_eq!(file, PathBuf::from("pb.json"));
                assert_eq!(ids, vec!["a-00001", "a-00002"]);
            }
            _ => panic!("expected playbook dedup"),
        }
    }

    #[test]
    fn dedup_without_ids_is_rejected() {
        assert!(Cli::try_parse_from(["ace", "playbook", "dedup", "pb.json"]).is_err());
    }

    #[test]
    fn dedup_ids_removes_only_listed_duplicates() {
        let mut playbook = Playbook::new();
        let kept = playbook.add_tip("apis", "Always paginate list endpoints", None, &[]);
        let dup = playbook.add_tip("apis", "paginate", None, &[]);

        let removed = dedup_ids(&mut playbook, std::slice::from_ref(&dup)).expect("dedup");
        assert_eq!(removed, vec![dup]);
        assert!(playbook.get_tip(&kept).is_some());
    }

    #[test]
    fn dedup_ids_rejects_unknown() {
        let mut playbook = Playbook::new();
        let err = dedup_ids(&mut playbook, &["x-00009".to_string()]).unwrap_err();
        assert!(err.to_string().contains("x-00009"));
    }
}
