use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use elearning::activity::{DEFAULT_INACTIVITY_THRESHOLD_MS, is_stale};
use elearning::clock::{Clock, SystemClock};
use elearning::identity::Role;
use elearning::policy::{PolicyError, RolePolicyTable};
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("role policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("{0} unreachable policy entries")]
    Shadowed(usize),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "elearning-cli", about = "Inspect the portal's role policy and session staleness")]
struct Cli {
    /// YAML role policy; the built-in portal table when omitted.
    #[arg(long, env = "ROLE_POLICY_FILE", global = true)]
    policy_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Policy(PolicyCommand),
    /// Decide whether a stored activity timestamp has gone stale.
    Stale {
        #[arg(long)]
        last_ms: u64,
        /// Defaults to the current wall clock.
        #[arg(long)]
        now_ms: Option<u64>,
        #[arg(long, env = "SESSION_INACTIVITY_TIMEOUT_MS", default_value_t = DEFAULT_INACTIVITY_THRESHOLD_MS)]
        threshold_ms: u64,
    },
}

#[derive(Args, Debug)]
struct PolicyCommand {
    #[command(subcommand)]
    command: PolicySubcommand,
}

#[derive(Subcommand, Debug)]
enum PolicySubcommand {
    /// Show which entry governs a path and whether a role may open it.
    Check {
        path: String,
        #[arg(long)]
        role: Option<Role>,
    },
    /// Print the table in lookup order.
    List,
    /// Print the table as a YAML document loadable through `ROLE_POLICY_FILE`.
    Export,
    /// Report entries an earlier prefix makes unreachable.
    Lint {
        /// Exit with an error when any entry is unreachable.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Policy(policy) => {
            let table = load_table(cli.policy_file.as_deref())?;
            match policy.command {
                PolicySubcommand::Check { path, role } => print_json(&check(&table, &path, role)),
                PolicySubcommand::List => print_json(&list(&table)),
                PolicySubcommand::Export => {
                    print!("{}", table.to_yaml()?);
                    Ok(())
                }
                PolicySubcommand::Lint { strict } => {
                    print_json(&lint(&table))?;
                    let unreachable = table.shadowed().len();
                    if strict && unreachable > 0 {
                        return Err(CliError::Shadowed(unreachable));
                    }
                    Ok(())
                }
            }
        }
        Command::Stale { last_ms, now_ms, threshold_ms } => {
            let now_ms = now_ms.unwrap_or_else(|| SystemClock.now_ms());
            print_json(&stale(last_ms, now_ms, threshold_ms))
        }
    }
}

fn load_table(path: Option<&Path>) -> Result<RolePolicyTable, CliError> {
    match path {
        Some(path) => Ok(RolePolicyTable::from_yaml_file(path)?),
        None => Ok(RolePolicyTable::portal_default()),
    }
}

fn check(table: &RolePolicyTable, path: &str, role: Option<Role>) -> Value {
    let entry = table.lookup(path);
    json!({
        "path": path,
        "matched_prefix": entry.map(|entry| entry.prefix.as_str()),
        "allowed_roles": table.allowed_roles(path),
        "role": role,
        "authorized": role.map(|role| table.permits(path, Some(role))),
    })
}

fn list(table: &RolePolicyTable) -> Value {
    json!({ "routes": table.entries() })
}

fn lint(table: &RolePolicyTable) -> Value {
    json!({
        "entries": table.entries().len(),
        "shadowed": table.shadowed(),
    })
}

fn stale(last_ms: u64, now_ms: u64, threshold_ms: u64) -> Value {
    json!({
        "last_ms": last_ms,
        "now_ms": now_ms,
        "idle_ms": now_ms.saturating_sub(last_ms),
        "threshold_ms": threshold_ms,
        "stale": is_stale(last_ms, now_ms, threshold_ms),
    })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
