//! CLI argument definitions for equisync.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sync` | Refresh daily prices for one market or all six |
//! | `status` | Show what each market store currently holds |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--data-dir` | `$EQUISYNC_DATA_DIR` or `~/.equisync` | Market database directory |
//! | `--log-level` | `info` | Log level when `RUST_LOG` is unset |
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! # Refresh every market
//! equisync sync
//!
//! # Refresh Taiwan only, forcing a full-history download
//! equisync sync tw --mode full
//!
//! # Inspect stored state
//! equisync status --format table
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use equisync_core::RunMode;

/// Daily OHLCV sync for the US, TW, CN, HK, JP and KR equity markets.
#[derive(Debug, Parser)]
#[command(
    name = "equisync",
    author,
    version,
    about = "Multi-market daily price sync",
    long_about = "equisync resolves each market's listed stocks, downloads daily OHLCV history \
with bounded concurrency, and keeps one DuckDB store per market.\n\
\n\
Use 'equisync <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Directory holding the per-market databases.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per market.
    Table,
    /// JSON array of market results.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refresh daily prices.
    ///
    /// Without a market argument all six markets run in turn; a failure in
    /// one market is reported and the rest still run.
    ///
    /// # Examples
    ///
    ///   equisync sync
    ///   equisync sync kr --no-cache
    Sync(SyncArgs),

    /// Show row counts, latest date and last audit per market.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Market code: us, tw, cn, hk, jp or kr. All markets when omitted.
    pub market: Option<String>,

    /// How the history window is chosen.
    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    pub mode: ModeArg,

    /// Fetch every symbol even when its cached artifact is fresh.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Override the market's worker pool size.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=16))]
    pub concurrency: Option<u16>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Market code. All markets when omitted.
    pub market: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Full history on an empty store, 7 days otherwise.
    Auto,
    /// Always download full history.
    Full,
    /// Always download the trailing 7 days.
    Incremental,
}

impl From<ModeArg> for RunMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Auto => Self::Auto,
            ModeArg::Full => Self::Full,
            ModeArg::Incremental => Self::Incremental,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_accepts_optional_market_and_flags() {
        let cli = Cli::try_parse_from(["equisync", "sync", "tw", "--mode", "full", "--no-cache"])
            .expect("arguments parse");

        let Command::Sync(args) = cli.command else {
            panic!("expected sync command");
        };
        assert_eq!(args.market.as_deref(), Some("tw"));
        assert_eq!(args.mode, ModeArg::Full);
        assert!(args.no_cache);
    }

    #[test]
    fn concurrency_outside_range_is_rejected() {
        let result = Cli::try_parse_from(["equisync", "sync", "--concurrency", "0"]);
        assert!(result.is_err());
    }
}
