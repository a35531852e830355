//! Verification-email delivery contract.
//!
//! Actual email transport is an external collaborator. The relay only needs
//! a way to hand off a code; deployments plug in their provider behind this
//! trait.

/// Delivers verification codes to agent owners.
pub trait Mailer: Send + Sync {
    /// Send a 6-digit verification code for a newly registered agent.
    fn send_verification_code(&self, email: &str, agent_name: &str, code: &str);
}

/// Development mailer: logs instead of sending. The code itself is kept out
/// of the log line.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_verification_code(&self, email: &str, agent_name: &str, _code: &str) {
        tracing::info!(email, agent_name, "verification code issued");
    }
}

/// Test mailer capturing the last code issued.
#[derive(Debug, Default)]
pub struct CapturingMailer {
    last_code: std::sync::Mutex<Option<String>>,
}

impl CapturingMailer {
    /// The most recently issued code, if any.
    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Mailer for CapturingMailer {
    fn send_verification_code(&self, _email: &str, _agent_name: &str, code: &str) {
        if let Ok(mut guard) = self.last_code.lock() {
            *guard = Some(code.to_string());
        }
    }
}
