//! Per-market summary and its delivery channels.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::audit::REPORT_OFFSET;
use crate::http_client::{HttpClient, HttpRequest};
use crate::stats::FailedSymbol;
use crate::{FetchWindow, Market};

const TELEGRAM_API: &str = "https://api.telegram.org";
const RESEND_API: &str = "https://api.resend.com";
const MAX_LISTED_FAILURES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Healthy,
    /// Covered symbols fell short of the market's expected minimum.
    BelowMinimum,
}

/// Structured outcome of one market run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketReport {
    pub market: Market,
    pub expected_min: usize,
    /// Fetched or cache-fresh symbols.
    pub success_count: usize,
    pub total: usize,
    pub coverage_pct: f64,
    /// Newest trading date in the store.
    pub latest_date: Option<String>,
    pub total_rows: u64,
    /// Instruments with names in `stock_info`.
    pub names_synced: u64,
    pub status: ReportStatus,
    pub used_fallback: bool,
    pub window: FetchWindow,
    pub failed_symbols: Vec<FailedSymbol>,
}

impl MarketReport {
    pub fn status_for(success_count: usize, expected_min: usize) -> ReportStatus {
        if success_count < expected_min {
            ReportStatus::BelowMinimum
        } else {
            ReportStatus::Healthy
        }
    }
}

type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// Delivery channel for market reports. Failures are logged by the caller and
/// never abort a run.
pub trait Reporter: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver<'a>(&'a self, report: &'a MarketReport) -> DeliveryFuture<'a>;
}

/// Writes the report to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver<'a>(&'a self, report: &'a MarketReport) -> DeliveryFuture<'a> {
        Box::pin(async move {
            match report.status {
                ReportStatus::Healthy => tracing::info!(
                    market = %report.market,
                    success = report.success_count,
                    total = report.total,
                    coverage = format!("{:.1}%", report.coverage_pct),
                    latest_date = report.latest_date.as_deref().unwrap_or("-"),
                    rows = report.total_rows,
                    "market synced"
                ),
                ReportStatus::BelowMinimum => tracing::warn!(
                    market = %report.market,
                    success = report.success_count,
                    expected_min = report.expected_min,
                    total = report.total,
                    coverage = format!("{:.1}%", report.coverage_pct),
                    used_fallback = report.used_fallback,
                    "market below expected minimum"
                ),
            }
            Ok(())
        })
    }
}

/// Telegram bot message via the shared transport.
pub struct TelegramReporter {
    http: Arc<dyn HttpClient>,
    token: String,
    chat_id: String,
}

impl TelegramReporter {
    pub fn new(
        http: Arc<dyn HttpClient>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl Reporter for TelegramReporter {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn deliver<'a>(&'a self, report: &'a MarketReport) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let body = json!({
                "chat_id": self.chat_id,
                "text": render_html(report, OffsetDateTime::now_utc()),
                "parse_mode": "HTML",
            });
            let request = HttpRequest::post(format!(
                "{TELEGRAM_API}/bot{}/sendMessage",
                self.token
            ))
            .with_json_body(&body)
            .with_timeout_ms(10_000);

            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| e.to_string())?;
            if !response.is_success() {
                return Err(format!("telegram returned status {}", response.status));
            }
            Ok(())
        })
    }
}

/// HTML email through the Resend API via the shared transport.
pub struct EmailReporter {
    http: Arc<dyn HttpClient>,
    api_key: String,
    from: String,
    to: String,
    base_url: String,
}

impl EmailReporter {
    pub fn new(
        http: Arc<dyn HttpClient>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            from: from.into(),
            to: to.into(),
            base_url: String::from(RESEND_API),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Reporter for EmailReporter {
    fn name(&self) -> &'static str {
        "email"
    }

    fn deliver<'a>(&'a self, report: &'a MarketReport) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let sent_at = OffsetDateTime::now_utc();
            let body = json!({
                "from": self.from,
                "to": [self.to],
                "subject": email_subject(report, sent_at),
                "html": render_email(report, sent_at),
            });
            let request = HttpRequest::post(format!(
                "{}/emails",
                self.base_url.trim_end_matches('/')
            ))
            .with_header("authorization", format!("Bearer {}", self.api_key))
            .with_json_body(&body)
            .with_timeout_ms(10_000);

            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| e.to_string())?;
            if !response.is_success() {
                return Err(format!("resend returned status {}", response.status));
            }
            Ok(())
        })
    }
}

/// Email subject: market and report-time date.
pub fn email_subject(report: &MarketReport, sent_at: OffsetDateTime) -> String {
    let local = sent_at.to_offset(REPORT_OFFSET);
    format!(
        "📊 {} sync report - {:04}-{:02}-{:02}",
        report.market.display_name(),
        local.year(),
        u8::from(local.month()),
        local.day()
    )
}

/// Email HTML body: verdict banner, counts table, capped failure list.
pub fn render_email(report: &MarketReport, sent_at: OffsetDateTime) -> String {
    let (verdict, color, background) = match report.status {
        ReportStatus::Healthy => ("✅ OK", "#28a745", "#f6fff8"),
        ReportStatus::BelowMinimum => ("⚠️ below expected minimum", "#dc3545", "#fff4f4"),
    };
    let local = sent_at.to_offset(REPORT_OFFSET);
    let failed = report.total.saturating_sub(report.success_count);

    let mut html = format!(
        "<html><body style=\"font-family: sans-serif; color: #333;\">\
<div style=\"max-width: 600px; margin: auto; border-top: 10px solid {color}; padding: 20px;\">\
<h2>{} sync report</h2>\
<p style=\"color: #666;\">Generated {:04}-{:02}-{:02} {:02}:{:02}:{:02} (UTC+8)</p>\
<div style=\"padding: 12px; background-color: {background}; color: {color}; font-weight: bold;\">{verdict}</div>\
<table style=\"width: 100%;\">\
<tr><td><b>Symbols</b></td><td style=\"text-align: right;\">{} (min {})</td></tr>\
<tr><td><b>Updated</b></td><td style=\"text-align: right;\">{}</td></tr>\
<tr><td><b>Failed or missing</b></td><td style=\"text-align: right;\">{failed}</td></tr>\
<tr><td><b>Success rate</b></td><td style=\"text-align: right;\"><b>{:.1}%</b></td></tr>\
<tr><td><b>Latest date</b></td><td style=\"text-align: right;\">{}</td></tr>\
<tr><td><b>Rows</b></td><td style=\"text-align: right;\">{}</td></tr>\
</table>",
        escape(report.market.display_name()),
        local.year(),
        u8::from(local.month()),
        local.day(),
        local.hour(),
        local.minute(),
        local.second(),
        report.total,
        report.expected_min,
        report.success_count,
        report.coverage_pct,
        escape(report.latest_date.as_deref().unwrap_or("-")),
        report.total_rows,
    );

    if !report.failed_symbols.is_empty() {
        let listed: Vec<&str> = report
            .failed_symbols
            .iter()
            .take(MAX_LISTED_FAILURES)
            .map(|failed| failed.symbol.as_str())
            .collect();
        html.push_str(&format!(
            "<div style=\"margin-top: 20px; border-left: 5px solid #dc3545; padding: 15px;\">\
<strong>Failed ({}), first {MAX_LISTED_FAILURES}:</strong><br><code>{}</code>",
            report.failed_symbols.len(),
            escape(&listed.join(", "))
        ));
        if report.failed_symbols.len() > MAX_LISTED_FAILURES {
            html.push_str("<br><small>remaining symbols are in the run log</small>");
        }
        html.push_str("</div>");
    }

    html.push_str("</div></body></html>");
    html
}

/// Telegram HTML body for `report`, stamped with `sent_at` in report time.
pub fn render_html(report: &MarketReport, sent_at: OffsetDateTime) -> String {
    let verdict = match report.status {
        ReportStatus::Healthy => "✅ OK",
        ReportStatus::BelowMinimum => "⚠️ below expected minimum",
    };
    let mut text = format!(
        "📊 <b>{} sync report</b>\nResult: {verdict}\nSuccess rate: <b>{:.1}%</b>\nUpdated: {} / Total: {} (min {})\nLatest date: {}\nRows: {} · Names: {}",
        escape(report.market.display_name()),
        report.coverage_pct,
        report.success_count,
        report.total,
        report.expected_min,
        escape(report.latest_date.as_deref().unwrap_or("-")),
        report.total_rows,
        report.names_synced,
    );

    if report.used_fallback {
        text.push_str("\nListing unavailable, fallback symbols used");
    }

    if !report.failed_symbols.is_empty() {
        let listed: Vec<&str> = report
            .failed_symbols
            .iter()
            .take(MAX_LISTED_FAILURES)
            .map(|failed| failed.symbol.as_str())
            .collect();
        text.push_str(&format!(
            "\nFailed ({}): <code>{}</code>",
            report.failed_symbols.len(),
            escape(&listed.join(", "))
        ));
        if report.failed_symbols.len() > MAX_LISTED_FAILURES {
            text.push_str(" …");
        }
    }

    let local = sent_at.to_offset(REPORT_OFFSET);
    text.push_str(&format!(
        "\n\n🕒 <i>Sent at {:02}:{:02}:{:02} (UTC+8)</i>",
        local.hour(),
        local.minute(),
        local.second()
    ));
    text
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpResponse};
    use crate::worker::FailureKind;
    use crate::Symbol;
    use time::macros::datetime;

    fn report(status: ReportStatus, failures: usize) -> MarketReport {
        MarketReport {
            market: Market::Tw,
            expected_min: 900,
            success_count: 2,
            total: 2,
            coverage_pct: 100.0,
            latest_date: Some(String::from("2024-01-12")),
            total_rows: 42,
            names_synced: 0,
            status,
            used_fallback: true,
            window: FetchWindow::INCREMENTAL,
            failed_symbols: (0..failures)
                .map(|i| FailedSymbol {
                    symbol: Symbol::parse(&format!("F{i}")).expect("valid symbol"),
                    kind: FailureKind::Transient,
                    message: String::from("reset"),
                })
                .collect(),
        }
    }

    #[test]
    fn status_flags_shortfall() {
        assert_eq!(MarketReport::status_for(899, 900), ReportStatus::BelowMinimum);
        assert_eq!(MarketReport::status_for(900, 900), ReportStatus::Healthy);
    }

    #[test]
    fn html_marks_warning_and_caps_failure_list() {
        let html = render_html(
            &report(ReportStatus::BelowMinimum, 25),
            datetime!(2024-01-12 06:05:09 UTC),
        );

        assert!(html.contains("⚠️"));
        assert!(html.contains("Failed (25)"));
        assert!(html.contains("F19"));
        assert!(!html.contains("F20"));
        assert!(html.contains("Sent at 14:05:09 (UTC+8)"));
    }

    #[test]
    fn healthy_report_has_no_failure_section() {
        let html = render_html(&report(ReportStatus::Healthy, 0), OffsetDateTime::UNIX_EPOCH);

        assert!(html.contains("✅"));
        assert!(!html.contains("Failed"));
    }

    struct CapturingHttp {
        status: u16,
        requests: std::sync::Mutex<Vec<HttpRequest>>,
    }

    impl HttpClient for CapturingHttp {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = HttpResponse::new(self.status, "{}");
            Box::pin(async move { Ok(response) })
        }
    }

    fn capturing(status: u16) -> Arc<CapturingHttp> {
        Arc::new(CapturingHttp {
            status,
            requests: std::sync::Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn email_subject_uses_report_date() {
        let subject = email_subject(
            &report(ReportStatus::Healthy, 0),
            datetime!(2024-01-12 18:30 UTC),
        );

        assert_eq!(subject, "📊 Taiwan sync report - 2024-01-13");
    }

    #[test]
    fn email_body_flags_shortfall_and_caps_failures() {
        let html = render_email(
            &report(ReportStatus::BelowMinimum, 25),
            datetime!(2024-01-12 06:05:09 UTC),
        );

        assert!(html.contains("#dc3545"));
        assert!(html.contains("below expected minimum"));
        assert!(html.contains("Failed (25), first 20"));
        assert!(html.contains("F19"));
        assert!(!html.contains("F20"));
        assert!(html.contains("remaining symbols are in the run log"));
        assert!(html.contains("2024-01-12 14:05:09 (UTC+8)"));
    }

    #[tokio::test]
    async fn email_is_posted_to_resend_with_bearer_key() {
        let http = capturing(200);
        let reporter = EmailReporter::new(
            http.clone(),
            "re_test",
            "equisync <ops@example.com>",
            "me@example.com",
        )
        .with_base_url("http://resend.test/");

        reporter
            .deliver(&report(ReportStatus::Healthy, 0))
            .await
            .expect("delivered");

        let requests = http.requests.lock().expect("requests").clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://resend.test/emails");
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer re_test")
        );
        let body: serde_json::Value =
            serde_json::from_str(requests[0].body.as_deref().expect("json body")).expect("json");
        assert_eq!(body["to"][0], "me@example.com");
        assert_eq!(body["from"], "equisync <ops@example.com>");
        assert!(body["html"].as_str().is_some_and(|html| html.contains("Taiwan")));
    }

    #[tokio::test]
    async fn rejected_email_is_a_delivery_error() {
        let reporter = EmailReporter::new(
            capturing(422),
            "re_test",
            "from@example.com",
            "to@example.com",
        );

        let error = reporter
            .deliver(&report(ReportStatus::Healthy, 0))
            .await
            .expect_err("must fail");

        assert_eq!(error, "resend returned status 422");
    }
}
