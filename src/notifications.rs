use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::NotificationConfig;
use crate::core::{AlertRecord, Severity};

/// Desktop notification sender with cooldown to prevent spam.
pub struct Notifier {
    enabled: bool,
    min_severity: Severity,
    cooldown: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl Notifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_severity: config.min_severity,
            cooldown: Duration::from_secs(config.cooldown_seconds),
            last_sent: Mutex::new(None),
        }
    }

    /// Try to send a desktop notification for an alert.
    /// Returns true if a notification was sent, false if skipped.
    pub fn notify(&self, alert: &AlertRecord) -> bool {
        if !self.should_notify(alert) {
            return false;
        }
        if !self.check_cooldown() {
            return false;
        }

        self.send_notification(alert);
        true
    }

    fn should_notify(&self, alert: &AlertRecord) -> bool {
        self.enabled && alert.severity >= self.min_severity
    }

    /// Check and update cooldown. Returns true if enough time has passed.
    fn check_cooldown(&self) -> bool {
        let mut last = self
            .last_sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.cooldown {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Fire-and-forget so a missing notification daemon never stalls polling.
    fn send_notification(&self, alert: &AlertRecord) {
        let title = format!("Wallet Sentinel: {} {} alert", alert.severity, alert.chain);
        let body = format!("{}\n{} | {}", alert.message, alert.label, alert.tx_id);

        std::thread::spawn(move || {
            if let Err(e) = notify_rust::Notification::new()
                .summary(&title)
                .body(&body)
                .show()
            {
                tracing::debug!("Desktop notification failed: {e}");
            }
        });
    }
}
