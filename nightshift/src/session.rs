//! Resilient request layer: one conversational exchange with retries.

use std::fmt;
use std::thread;

use tracing::{debug, instrument, warn};

use crate::core::conversation::{Conversation, Turn};
use crate::core::retry::RetryPolicy;
use crate::io::model::{ModelClient, ModelError};

/// Non-recoverable failure of a session exchange.
///
/// `Fatal` means the service rejected us outright (credential or request);
/// `Exhausted` means the retry budget ran out under rate-limiting or repeated
/// transient failure. Operators need to tell "misconfigured" from "service
/// unavailable", so the two stay distinct all the way to the notification.
#[derive(Debug)]
pub enum SessionError {
    Fatal { reason: String },
    Exhausted { attempts: u32, last: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Fatal { reason } => {
                write!(f, "model service rejected the request: {reason}")
            }
            SessionError::Exhausted { attempts, last } => {
                write!(f, "model service unavailable after {attempts} attempts: {last}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Owns the conversation and drives retries for each exchange.
pub struct Session<'a, M: ModelClient> {
    client: &'a M,
    policy: RetryPolicy,
    conversation: Conversation,
}

impl<'a, M: ModelClient> Session<'a, M> {
    pub fn new(client: &'a M, policy: RetryPolicy, conversation: Conversation) -> Self {
        Self {
            client,
            policy,
            conversation,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Send `prompt` as the next initiator turn and return the reply.
    ///
    /// On success the exchange is appended to the conversation, so later
    /// calls carry full history. On failure the conversation is left
    /// unmodified. An empty reply is returned as-is without recording a
    /// turn, since there is nothing worth carrying forward.
    #[instrument(skip_all, fields(history_turns = self.conversation.len()))]
    pub fn send(&mut self, prompt: &str) -> Result<String, SessionError> {
        let mut turns: Vec<Turn> = self.conversation.turns().to_vec();
        turns.push(Turn::initiator(prompt));

        let max_attempts = self.policy.max_attempts;
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            match self.client.generate(&turns) {
                Ok(text) => {
                    if text.trim().is_empty() {
                        debug!(attempt, "empty reply");
                        return Ok(text);
                    }
                    debug!(attempt, chars = text.len(), "reply received");
                    self.conversation.push_exchange(prompt, &text);
                    return Ok(text);
                }
                Err(ModelError::Fatal { reason }) => {
                    warn!(attempt, reason = %reason, "fatal service error, not retrying");
                    return Err(SessionError::Fatal { reason });
                }
                Err(ModelError::RateLimited { reason }) => {
                    last_reason = reason;
                    if attempt < max_attempts {
                        let wait = self.policy.wait_after_rate_limit(attempt);
                        warn!(
                            attempt,
                            wait_secs = wait.as_secs(),
                            reason = %last_reason,
                            "rate limited, backing off"
                        );
                        thread::sleep(wait);
                    }
                }
                Err(ModelError::Transient { reason }) => {
                    last_reason = reason;
                    if attempt < max_attempts {
                        let wait = self.policy.wait_after_transient();
                        warn!(
                            attempt,
                            wait_secs = wait.as_secs(),
                            reason = %last_reason,
                            "transient service error, retrying"
                        );
                        thread::sleep(wait);
                    }
                }
            }
        }

        Err(SessionError::Exhausted {
            attempts: max_attempts,
            last: last_reason,
        })
    }
}
