//! Structured security audit log.
//!
//! Ported from `audit.py`'s `AuditLogger`: one JSON line per event on a
//! dedicated writer, independent of the application's regular `tracing`
//! output, so a security reviewer can tail just this file. The donor's
//! size-based rotating handler becomes a `tracing-appender` rolling file
//! (daily rotation rather than size-based — `tracing-appender` doesn't
//! support byte-count rotation, see DESIGN.md).

use std::io::Write;
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;

use crate::trade_guard::TradeAuditSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    TradeExecuted,
    TradeBlocked,
    TradeGuardViolation,
    TradeConfirmed,
    BotCreated,
    BotStarted,
    BotStopped,
    BotTradeExecuted,
    BotError,
    RateLimitExceeded,
    BlockedTokenAttempt,
    ConfigChanged,
    SystemStart,
    SystemStop,
    SystemError,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TradeExecuted => "trade.executed",
            Self::TradeBlocked => "trade.blocked",
            Self::TradeGuardViolation => "trade.guard.violation",
            Self::TradeConfirmed => "trade.confirmed",
            Self::BotCreated => "bot.created",
            Self::BotStarted => "bot.started",
            Self::BotStopped => "bot.stopped",
            Self::BotTradeExecuted => "bot.trade.executed",
            Self::BotError => "bot.error",
            Self::RateLimitExceeded => "security.rate_limit",
            Self::BlockedTokenAttempt => "security.blocked_token",
            Self::ConfigChanged => "config.changed",
            Self::SystemStart => "system.start",
            Self::SystemStop => "system.stop",
            Self::SystemError => "system.error",
        }
    }
}

#[derive(Debug, Serialize)]
struct AuditEvent<'a> {
    timestamp: String,
    event_type: &'static str,
    severity: &'a str,
    user: Option<&'a str>,
    details: serde_json::Value,
}

pub struct AuditLog {
    writer: Mutex<NonBlocking>,
    _guard: WorkerGuard,
    enabled: bool,
}

impl AuditLog {
    pub fn new(log_dir: impl AsRef<Path>, log_file: impl AsRef<str>, enabled: bool) -> Self {
        let appender = rolling::daily(log_dir, log_file.as_ref());
        let (writer, guard) = tracing_appender::non_blocking(appender);
        Self { writer: Mutex::new(writer), _guard: guard, enabled }
    }

    fn log(&self, event_type: AuditEventType, severity: &str, user: Option<&str>, details: serde_json::Value) {
        if !self.enabled {
            return;
        }
        let event = AuditEvent { timestamp: Utc::now().to_rfc3339(), event_type: event_type.as_str(), severity, user, details };
        let Ok(line) = serde_json::to_string(&event) else { return };
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{line}");
        if severity == "warning" || severity == "error" || severity == "critical" {
            match severity {
                "warning" => tracing::warn!(target: "audit", event = event_type.as_str(), "{line}"),
                _ => tracing::error!(target: "audit", event = event_type.as_str(), "{line}"),
            }
        }
    }

    pub fn log_trade_executed(&self, input_mint: &str, output_mint: &str, amount: f64, usd_value: f64, source: &str, signature: &str) {
        self.log(
            AuditEventType::TradeExecuted,
            "info",
            None,
            json!({"input_mint": input_mint, "output_mint": output_mint, "amount": amount, "usd_value": usd_value, "source": source, "signature": signature}),
        );
    }

    pub fn log_rate_limit_exceeded(&self, key: &str, count: u64) {
        self.log(AuditEventType::RateLimitExceeded, "warning", None, json!({"key": key, "request_count": count}));
    }

    pub fn log_blocked_token_attempt(&self, mint: &str, reason: &str) {
        self.log(AuditEventType::BlockedTokenAttempt, "warning", None, json!({"mint": mint, "reason": reason}));
    }

    pub fn log_bot_event(&self, event_type: AuditEventType, bot_id: &str, detail: &str) {
        self.log(event_type, "info", None, json!({"bot_id": bot_id, "detail": detail}));
    }

    pub fn log_system_start(&self, version: &str) {
        self.log(AuditEventType::SystemStart, "info", None, json!({"version": version}));
    }

    pub fn log_system_stop(&self) {
        self.log(AuditEventType::SystemStop, "info", None, json!({}));
    }

    pub fn log_system_error(&self, error: &str) {
        self.log(AuditEventType::SystemError, "error", None, json!({"error": error}));
    }
}

impl TradeAuditSink for AuditLog {
    fn log_trade_blocked(&self, mint: &str, reason: &str) {
        self.log(AuditEventType::TradeBlocked, "warning", None, json!({"mint": mint, "reason": reason}));
    }

    fn log_guard_violation(&self, code: &str, details: &str) {
        self.log(AuditEventType::TradeGuardViolation, "warning", None, json!({"code": code, "details": details}));
    }
}

/// Lets the audit log double as a generic notification sink for callers
/// that only know about `bot_scheduler::NotificationSink` (e.g. wiring one
/// `Arc<AuditLog>` into both roles instead of two separate sinks).
impl crate::bot_scheduler::NotificationSink for AuditLog {
    fn notify(&self, title: &str, message: &str, level: &str) {
        self.log(AuditEventType::BotTradeExecuted, level, None, json!({"title": title, "message": message}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings_match_the_dotted_convention() {
        assert_eq!(AuditEventType::TradeExecuted.as_str(), "trade.executed");
        assert_eq!(AuditEventType::RateLimitExceeded.as_str(), "security.rate_limit");
    }

    #[test]
    fn disabled_log_does_not_panic_on_any_call() {
        let dir = std::env::temp_dir().join(format!("audit-test-{}", uuid::Uuid::new_v4()));
        let log = AuditLog::new(&dir, "audit.log", false);
        log.log_trade_executed("in", "out", 1.0, 2.0, "test", "sig");
        log.log_system_error("boom");
    }
}
