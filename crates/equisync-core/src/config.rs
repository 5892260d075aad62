//! Explicit per-run configuration.
//!
//! Nothing here is global: every run receives a [`SyncConfig`], so tests and
//! concurrent runs can point at isolated directories. [`SyncConfig::from_env`]
//! loads `.env` through `dotenvy` and reads:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `EQUISYNC_DATA_DIR` | Market databases | `$EQUISYNC_HOME` or `~/.equisync` |
//! | `EQUISYNC_CACHE_DIR` | Per-symbol CSV artifacts | `<data_dir>/cache` |
//! | `EQUISYNC_CACHE_EXPIRY_SECS` | Cache freshness window | `3600` |
//! | `EQUISYNC_CONCURRENCY` | Override market pool size | market default |
//! | `EQUISYNC_BACKUP_DIR` | Mounted backup directory | none |
//! | `GITHUB_ACTIONS` | CI mode: slower pacing, no artifact cache | `false` |
//! | `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID` | Report delivery | none |
//! | `RESEND_API_KEY`, `EQUISYNC_REPORT_EMAIL_TO` | Email report delivery | none |
//! | `EQUISYNC_REPORT_EMAIL_FROM` | Email sender | `equisync <onboarding@resend.dev>` |

use std::path::PathBuf;
use std::time::Duration;

use equisync_warehouse::resolve_equisync_home;

use crate::cache_gate::{CacheGate, DEFAULT_CACHE_EXPIRY, DEFAULT_MIN_SIZE_BYTES};
use crate::dispatcher::DispatchPlan;
use crate::markets::MarketProfile;
use crate::retry::RetryPolicy;

/// How the fetch window is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Full history on first run, incremental afterwards.
    #[default]
    Auto,
    Full,
    Incremental,
}

impl RunMode {
    /// Whether this run should fetch full history given whether the store
    /// already holds prices.
    pub const fn wants_full_history(self, has_prices: bool) -> bool {
        match self {
            Self::Auto => !has_prices,
            Self::Full => true,
            Self::Incremental => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

const DEFAULT_EMAIL_FROM: &str = "equisync <onboarding@resend.dev>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub api_key: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    /// Per-symbol artifact directory; `None` disables the artifact layout and
    /// with it the cache gate.
    pub cache_dir: Option<PathBuf>,
    pub cache_expiry: Duration,
    pub cache_min_size_bytes: u64,
    pub ci_mode: bool,
    pub concurrency_override: Option<usize>,
    pub progress_every: usize,
    pub retry: RetryPolicy,
    pub mode: RunMode,
    pub backup_dir: Option<PathBuf>,
    pub backup_attempts: u32,
    pub backup_retry_delay: Duration,
    pub telegram: Option<TelegramConfig>,
    pub email: Option<EmailConfig>,
}

impl SyncConfig {
    /// Local defaults rooted at `data_dir`, artifact cache enabled.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            cache_dir: Some(data_dir.join("cache")),
            data_dir,
            cache_expiry: DEFAULT_CACHE_EXPIRY,
            cache_min_size_bytes: DEFAULT_MIN_SIZE_BYTES,
            ci_mode: false,
            concurrency_override: None,
            progress_every: 50,
            retry: RetryPolicy::default(),
            mode: RunMode::Auto,
            backup_dir: None,
            backup_attempts: 3,
            backup_retry_delay: Duration::from_secs(5),
            telegram: None,
            email: None,
        }
    }

    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let data_dir = env_var_path("EQUISYNC_DATA_DIR").unwrap_or_else(resolve_equisync_home);
        let mut config = Self::for_data_dir(data_dir);

        config.ci_mode = env_var_bool("GITHUB_ACTIONS", false);
        config.cache_dir = if config.ci_mode {
            None
        } else {
            env_var_path("EQUISYNC_CACHE_DIR").or(config.cache_dir)
        };
        config.cache_expiry = Duration::from_secs(env_var_parse(
            "EQUISYNC_CACHE_EXPIRY_SECS",
            DEFAULT_CACHE_EXPIRY.as_secs(),
        ));
        config.concurrency_override = std::env::var("EQUISYNC_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0);
        config.backup_dir = env_var_path("EQUISYNC_BACKUP_DIR");
        config.telegram = match (
            std::env::var("TELEGRAM_BOT_TOKEN"),
            std::env::var("TELEGRAM_CHAT_ID"),
        ) {
            (Ok(bot_token), Ok(chat_id)) if !bot_token.is_empty() && !chat_id.is_empty() => {
                Some(TelegramConfig { bot_token, chat_id })
            }
            _ => None,
        };
        config.email = email_from_parts(
            env_var_string("RESEND_API_KEY"),
            env_var_string("EQUISYNC_REPORT_EMAIL_TO"),
            env_var_string("EQUISYNC_REPORT_EMAIL_FROM"),
        );
        config
    }

    pub fn cache_gate(&self) -> CacheGate {
        CacheGate::new(self.cache_expiry, self.cache_min_size_bytes)
    }

    /// Pool shape for a market under this configuration.
    pub fn dispatch_plan(&self, profile: &MarketProfile) -> DispatchPlan {
        let concurrency = self.concurrency_override.unwrap_or(if self.ci_mode {
            profile.ci_concurrency
        } else {
            profile.concurrency
        });
        let plan = DispatchPlan::new(concurrency).with_progress_every(self.progress_every);
        match profile.batch_size {
            Some(size) => plan.with_batches(size, profile.batch_cooldown),
            None => plan,
        }
    }

    pub fn delay_ms(&self, profile: &MarketProfile) -> (u64, u64) {
        if self.ci_mode {
            profile.ci_delay_ms
        } else {
            profile.delay_ms
        }
    }
}

/// Email delivery needs both a key and a recipient; the sender has a default.
fn email_from_parts(
    api_key: Option<String>,
    to: Option<String>,
    from: Option<String>,
) -> Option<EmailConfig> {
    Some(EmailConfig {
        api_key: api_key?,
        to: to?,
        from: from.unwrap_or_else(|| String::from(DEFAULT_EMAIL_FROM)),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_var_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::strategy_for;
    use crate::Market;

    #[test]
    fn ci_mode_uses_slower_profile() {
        let profile = strategy_for(Market::Tw).profile();
        let mut config = SyncConfig::for_data_dir("/tmp/equisync");

        assert_eq!(config.dispatch_plan(&profile).concurrency, 4);
        assert_eq!(config.delay_ms(&profile), (200, 500));

        config.ci_mode = true;
        assert_eq!(config.dispatch_plan(&profile).concurrency, 3);
        assert_eq!(config.delay_ms(&profile), (1_500, 3_200));
    }

    #[test]
    fn override_and_batches_flow_into_plan() {
        let profile = strategy_for(Market::Us).profile();
        let mut config = SyncConfig::for_data_dir("/tmp/equisync");
        config.concurrency_override = Some(5);

        let plan = config.dispatch_plan(&profile);

        assert_eq!(plan.concurrency, 5);
        assert_eq!(plan.batch_size, Some(200));
    }

    #[test]
    fn auto_mode_fetches_full_history_only_on_empty_store() {
        assert!(RunMode::Auto.wants_full_history(false));
        assert!(!RunMode::Auto.wants_full_history(true));
        assert!(RunMode::Full.wants_full_history(true));
        assert!(!RunMode::Incremental.wants_full_history(false));
    }

    #[test]
    fn email_needs_key_and_recipient() {
        assert_eq!(email_from_parts(Some("re_key".into()), None, None), None);
        assert_eq!(email_from_parts(None, Some("ops@example.com".into()), None), None);

        let email = email_from_parts(Some("re_key".into()), Some("ops@example.com".into()), None)
            .expect("configured");
        assert_eq!(email.from, DEFAULT_EMAIL_FROM);
        assert_eq!(email.to, "ops@example.com");
    }
}
