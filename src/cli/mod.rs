//! CLI module for routecheck.
//!
//! Commands:
//! - check: verify client/server parity and single-response handlers
//! - routes: list extracted server routes and client calls

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::check::{check_program, inventory, render, Format};
use crate::config::{CheckConfig, CONFIG_FILE};
use crate::parser::Program;

#[derive(Parser)]
#[command(name = "routecheck")]
#[command(about = "Check that jape clients and servers agree on their routes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    // ─── Verification ───────────────────────────────────────────────
    /// Check client/server parity under a directory
    Check {
        /// Directory to analyze
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Prefix trimmed from client paths
        #[arg(long)]
        cprefix: Option<String>,

        /// Prefix trimmed from server paths
        #[arg(long)]
        sprefix: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Config file (default: <dir>/routecheck.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    // ─── Debugging ──────────────────────────────────────────────────
    /// List server routes and client calls as JSON
    Routes {
        /// Directory to analyze
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Config file (default: <dir>/routecheck.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Run a parsed command, writing results to stdout. Returns `true` when
/// nothing was reported.
pub fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Check {
            dir,
            cprefix,
            sprefix,
            format,
            config,
        } => {
            let config = load_config(&dir, config.as_deref())?.with_prefixes(cprefix, sprefix);
            check(&dir, &config, format)
        }
        Commands::Routes { dir, config } => {
            let config = load_config(&dir, config.as_deref())?;
            routes(&dir, &config)
        }
    }
}

fn load_config(dir: &Path, path: Option<&Path>) -> Result<CheckConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| dir.join(CONFIG_FILE));
    CheckConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn check(dir: &Path, config: &CheckConfig, format: Format) -> Result<bool> {
    let program = Program::load(dir, config.include_tests)?;
    let report = check_program(&program, config)?;
    let out = render(&report.diagnostics, format)?;
    match format {
        Format::Text => print!("{}", out),
        Format::Json => println!("{}", out),
    }
    Ok(report.is_clean())
}

fn routes(dir: &Path, config: &CheckConfig) -> Result<bool> {
    let program = Program::load(dir, config.include_tests)?;
    let (packages, diagnostics) = inventory(&program, config);
    println!("{}", serde_json::to_string_pretty(&packages)?);
    for diagnostic in &diagnostics {
        eprintln!("{}", diagnostic);
    }
    Ok(diagnostics.is_empty())
}
