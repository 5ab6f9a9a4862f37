use crate::commands::{print_nodes, print_outline};
use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use vellum_editor::{Cmd, CmdRepo, Outbox, Sequencer};

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON file holding the server command log
    pub log: PathBuf,

    /// Show the document as of this version
    #[arg(long)]
    pub at: Option<u64>,

    /// Print the snapshot as JSON instead of an outline
    #[arg(long)]
    pub json: bool,

    /// Also list the op paths the replica registered, with their node kinds
    #[arg(long)]
    pub nodes: bool,
}

pub fn replay(args: ReplayArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let document = config.seed_document(cwd)?;

    let content = fs::read_to_string(&args.log)
        .with_context(|| format!("Cannot read log {}", args.log.display()))?;
    let cmds = sequence(serde_json::from_str(&content).context("Invalid command log")?)?;

    println!(
        "{} {} cmds from {}",
        "▶".bright_blue(),
        cmds.len(),
        args.log.display()
    );

    let mut repo = CmdRepo::with_config("replay", document, Outbox::new(), config.repo);
    repo.receive(cmds)?;

    if let Some(version) = args.at {
        repo.roll_to_version(version)?;
        println!("  Showing version {} of {}", version.to_string().bright_white(), repo.version());
    } else {
        println!("  Version {}", repo.version().to_string().bright_white());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&repo.document().snapshot())?);
    } else {
        println!();
        print_outline(repo.document());
    }

    if args.nodes {
        println!();
        print_nodes(repo.registry());
    }

    Ok(())
}

/// Versionless logs are sequenced in file order; versioned logs must start
/// at 1 and be contiguous.
fn sequence(cmds: Vec<Cmd>) -> Result<Vec<Cmd>> {
    if !cmds.iter().any(Cmd::is_committed) {
        let mut server = Sequencer::new();
        server.submit(&cmds);
        return Ok(server.since(0));
    }

    for (index, cmd) in cmds.iter().enumerate() {
        let expected = index as u64 + 1;
        if cmd.version != Some(expected) {
            return Err(anyhow!(
                "Command {} has version {:?}, expected {}",
                cmd.id,
                cmd.version,
                expected
            ));
        }
    }
    Ok(cmds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versionless_log_is_sequenced() {
        let cmds = vec![Cmd::new("a-1", "a", vec![]), Cmd::new("b-1", "b", vec![])];
        let sequenced = sequence(cmds).unwrap();
        assert_eq!(sequenced[0].version, Some(1));
        assert_eq!(sequenced[1].version, Some(2));
    }

    #[test]
    fn test_gapped_log_is_rejected() {
        let mut cmd = Cmd::new("a-1", "a", vec![]);
        cmd.version = Some(2);
        assert!(sequence(vec![cmd]).is_err());
    }
}
