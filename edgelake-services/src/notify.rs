//! Error reporting side channel.
//!
//! Failures are pushed here as a side effect. Nothing returned by a notifier ever
//! reaches the caller's response.
pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, message: &str);
}

/// Emits every notification as an error event tagged with the configured channel.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier {
    channel: Option<String>,
}

impl TracingNotifier {
    pub fn new(channel: Option<String>) -> Self {
        Self { channel }
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, subject: &str, message: &str) {
        tracing::error!(
            channel = self.channel.as_deref().unwrap_or("-"),
            subject,
            "{message}"
        );
    }
}
