use super::UserPrompt;
use tracing::warn;

/// Prompts the operator through the log
#[derive(Debug, Default)]
pub struct LogPrompt;

impl UserPrompt for LogPrompt {
    fn prompt_enable_control_radio(&self, reason: &str) {
        warn!("[RADIO] Please turn Bluetooth on manually ({})", reason);
    }
}
