use std::io::{self, Write};

use equisync_core::{MarketOutcome, MarketStatus, ReportStatus};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::commands::CommandOutput;
use crate::error::CliError;

pub fn render(output: &CommandOutput, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match (output, format) {
        (CommandOutput::Sync(outcomes), OutputFormat::Json) => {
            write_json(&mut out, outcomes, pretty)
        }
        (CommandOutput::Status(statuses), OutputFormat::Json) => {
            write_json(&mut out, statuses, pretty)
        }
        (CommandOutput::Sync(outcomes), OutputFormat::Table) => {
            for outcome in outcomes {
                writeln!(out, "{}", outcome_line(outcome))?;
            }
            Ok(())
        }
        (CommandOutput::Status(statuses), OutputFormat::Table) => {
            for status in statuses {
                writeln!(out, "{}", status_line(status))?;
            }
            Ok(())
        }
    }
}

fn write_json<T: Serialize>(out: &mut impl Write, value: &T, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    writeln!(out, "{payload}")?;
    Ok(())
}

fn outcome_line(outcome: &MarketOutcome) -> String {
    match outcome {
        MarketOutcome::Completed(report) => {
            let flag = match report.status {
                ReportStatus::Healthy => "ok",
                ReportStatus::BelowMinimum => "WARN",
            };
            format!(
                "{:<3} {:<4} {:>6}/{:<6} {:>6.1}%  latest={}  rows={}  failed={}",
                report.market.code(),
                flag,
                report.success_count,
                report.total,
                report.coverage_pct,
                report.latest_date.as_deref().unwrap_or("-"),
                report.total_rows,
                report.failed_symbols.len()
            )
        }
        MarketOutcome::Failed { market, error } => {
            format!("{:<3} FAIL {error}", market.code())
        }
    }
}

fn status_line(status: &MarketStatus) -> String {
    let Some(summary) = &status.summary else {
        return format!("{:<3} (no database at {})", status.market.code(), status.db_path.display());
    };
    let last_run = status
        .last_audit
        .as_ref()
        .map_or_else(|| String::from("never"), |audit| {
            format!("{} ({:.1}%)", audit.recorded_at, audit.success_rate)
        });
    format!(
        "{:<3} symbols={} rows={} latest={} names={} last_run={}",
        status.market.code(),
        summary.distinct_symbol_count,
        summary.row_count,
        summary.max_date.as_deref().unwrap_or("-"),
        status.names,
        last_run
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use equisync_core::Market;

    #[test]
    fn failed_market_line_names_the_error() {
        let line = outcome_line(&MarketOutcome::Failed {
            market: Market::Hk,
            error: String::from("cannot open store"),
        });

        assert_eq!(line, "hk  FAIL cannot open store");
    }

    #[test]
    fn missing_database_is_reported() {
        let status = MarketStatus {
            market: Market::Jp,
            db_path: "/data/jp_stock_warehouse.duckdb".into(),
            exists: false,
            summary: None,
            names: 0,
            last_audit: None,
        };

        assert!(status_line(&status).contains("no database"));
    }
}
