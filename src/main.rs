//! nftcodec - nftables rule/set codec
//!
//! Command-line front end for the codec library. Every command reads JSON
//! from a file (or stdin with `-`) and prints JSON to stdout.
//!
//! # Usage
//!
//! ```bash
//! nftcodec compile-rule rule.json               # Rule -> primitives
//! nftcodec decompile-rule exprs.json            # primitives -> Rule
//! nftcodec compile-set set.json                 # Set -> wire elements
//! nftcodec decompile-set --datatype port --interval elems.json
//! nftcodec dry-run batch.json                   # submit, commit, list back
//! nftcodec config --save                        # write effective config
//! ```

use clap::{Parser, Subcommand};
use nftcodec::config::{AppConfig, default_config_path, load_config, save_config};
use nftcodec::core::conn::Conn;
use nftcodec::core::expr::Primitive;
use nftcodec::core::rule::Rule;
use nftcodec::core::set::{Set, SetDatatype, SetElement, decode_elements};
use nftcodec::core::table::{Chain, Table};
use nftcodec::core::transport::MemoryTransport;
use nftcodec::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nftcodec", version)]
#[command(about = "Compile nftables rules and sets to primitives and back", long_about = None)]
struct Cli {
    /// Log at debug level regardless of configuration
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the XDG default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule (JSON) into its primitive sequence
    CompileRule {
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Decompile a primitive sequence (JSON array) into a rule
    DecompileRule {
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Compile a set (JSON) into its wire elements, sentinel included
    CompileSet {
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Decompile wire elements (JSON array) into element descriptors
    DecompileSet {
        #[arg(long)]
        datatype: SetDatatype,
        #[arg(long)]
        interval: bool,
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Submit a batch of rules and sets to an in-memory ruleset and list it back
    DryRun {
        #[arg(default_value = "-")]
        input: PathBuf,
        /// Table to use instead of the configured one
        #[arg(long)]
        table: Option<String>,
        /// Chain to use instead of the configured one
        #[arg(long)]
        chain: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Input of the `dry-run` command
#[derive(Debug, Default, Deserialize)]
struct Batch {
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    sets: Vec<Set>,
}

/// Output of the `dry-run` command
#[derive(Debug, Serialize)]
struct DryRunReport {
    table: Table,
    chain: String,
    sets: Vec<Set>,
    rules: Vec<Rule>,
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn dry_run(batch: &Batch, table: Table, chain: &str) -> Result<DryRunReport> {
    let mut conn = Conn::new(MemoryTransport::new());
    conn.add_table(&table)?;
    conn.add_chain(&Chain::regular(&table.name, chain))?;

    // Sets go first so rules can look them up.
    for set in &batch.sets {
        conn.add_set(&table.name, set)?;
    }
    for rule in &batch.rules {
        conn.add_rule(&table.name, chain, rule)?;
    }
    conn.commit()?;
    info!(
        "Dry run committed {} sets and {} rules",
        batch.sets.len(),
        batch.rules.len()
    );

    Ok(DryRunReport {
        sets: conn.list_sets(&table.name)?,
        rules: conn.list_rules(&table.name, chain)?,
        chain: chain.to_string(),
        table,
    })
}

fn handle_cli(command: Commands, config: &AppConfig, config_path: Option<&Path>) -> Result<()> {
    match command {
        Commands::CompileRule { input } => {
            let rule: Rule = serde_json::from_str(&read_input(&input)?)?;
            print_json(&rule.to_primitives()?)
        }
        Commands::DecompileRule { input } => {
            let exprs: Vec<Primitive> = serde_json::from_str(&read_input(&input)?)?;
            print_json(&Rule::from_primitives(&exprs)?)
        }
        Commands::CompileSet { input } => {
            let set: Set = serde_json::from_str(&read_input(&input)?)?;
            print_json(&set.to_wire()?)
        }
        Commands::DecompileSet {
            datatype,
            interval,
            input,
        } => {
            let wire: Vec<SetElement> = serde_json::from_str(&read_input(&input)?)?;
            print_json(&decode_elements(datatype, interval, &wire)?)
        }
        Commands::DryRun {
            input,
            table,
            chain,
        } => {
            let batch: Batch = serde_json::from_str(&read_input(&input)?)?;
            let table = Table::new(table.unwrap_or_else(|| config.table.clone()), config.family);
            let chain = chain.unwrap_or_else(|| config.chain.clone());
            print_json(&dry_run(&batch, table, &chain)?)
        }
        Commands::Config { save } => {
            if save {
                let path = config_path
                    .map(Path::to_path_buf)
                    .or_else(default_config_path)
                    .ok_or_else(|| Error::NotFound("config directory".to_string()))?;
                save_config(config, &path)?;
                eprintln!("Saved to {}", path.display());
            }
            print_json(config)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match handle_cli(cli.command, &config, cli.config.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nftcodec::core::table::TableFamily;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "nftcodec",
            "-v",
            "decompile-set",
            "--datatype",
            "ipv6",
            "--interval",
            "elems.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::DecompileSet {
                datatype: SetDatatype::Ipv6,
                interval: true,
                ..
            }
        ));
        assert!(Cli::try_parse_from(["nftcodec", "decompile-set", "--datatype", "mac"]).is_err());
    }

    #[test]
    fn test_dry_run_lists_back_batch() {
        let batch: Batch = serde_json::from_str(
            r#"{
                "sets": [{"name": "web", "datatype": "port", "interval": true,
                          "elements": ["80", "8000-8080"]}],
                "rules": [{"l3proto": "ipv4", "l4proto": "tcp", "dst_port": "web",
                           "action": "accept"}]
            }"#,
        )
        .unwrap();
        let report = dry_run(&batch, Table::new("t", TableFamily::Inet), "c").unwrap();
        assert_eq!(report.sets[0].elements, vec!["80", "8000-8080"]);
        assert_eq!(report.rules[0].dst_port.as_deref(), Some("web"));
        assert_eq!(report.rules[0].handle, Some(1));
    }
}
