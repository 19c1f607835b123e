//! Command-line interface built on clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Runs cloud-account lifecycle workflows against an in-process store.
#[derive(Debug, Parser)]
#[command(name = "cloudacct", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./cloudacct.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the operations listed in a JSON file, in order.
    Run {
        /// JSON array of `{"op": "create"|"update"|"delete"|"validate", ...}`.
        #[arg(long)]
        file: PathBuf,

        /// Org membership to seed, as ORG:IDENTITY. Repeatable.
        #[arg(long = "member", value_parser = parse_member)]
        members: Vec<Member>,
    },

    /// Runs the built-in example: a bucket conflict, then tag updates.
    Demo,
}

/// Org membership given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub org_ref: String,
    pub identity: String,
}

fn parse_member(raw: &str) -> Result<Member, String> {
    match raw.split_once(':') {
        Some((org, identity)) if !org.is_empty() && !identity.is_empty() => Ok(Member {
            org_ref: org.to_string(),
            identity: identity.to_string(),
        }),
        _ => Err(format!("expected ORG:IDENTITY, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from([
            "cloudacct",
            "run",
            "--file",
            "ops.json",
            "--member",
            "org:alice",
            "--member",
            "org:bob",
        ]);
        match cli.command {
            Command::Run { file, members } => {
                assert_eq!(file, PathBuf::from("ops.json"));
                assert_eq!(members.len(), 2);
                assert_eq!(members[1].identity, "bob");
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["cloudacct", "--config", "alt.toml", "--verbose", "demo"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn member_needs_both_parts() {
        assert!(parse_member("org:").is_err());
        assert!(parse_member("alice").is_err());
        assert_eq!(
            parse_member("org:a:b").unwrap(),
            Member {
                org_ref: "org".into(),
                identity: "a:b".into()
            }
        );
    }

    #[test]
    fn run_requires_file() {
        assert!(Cli::try_parse_from(["cloudacct", "run"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
