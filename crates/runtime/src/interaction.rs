//! User-facing callbacks.
//!
//! The orchestrator never renders anything. When it needs the user to read
//! an explanation or agree to visit settings, it asks an [`Interaction`]
//! and waits for the [`Decision`].

use crate::{Error, Result};
use policy::Capability;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};

/// The user's answer to an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Proceed,
    Decline,
}

impl Decision {
    pub fn is_proceed(self) -> bool {
        matches!(self, Decision::Proceed)
    }
}

/// Why these capabilities matter, shown before (re)requesting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainRequest {
    pub capabilities: Vec<Capability>,
    /// `true` before the first prompt, `false` after a denial.
    pub before_request: bool,
}

/// Host callbacks.
///
/// `has_explanation` and `has_remediation` advertise which callbacks exist.
/// When one is absent the orchestrator behaves as if it was never asked.
/// An `Err` from a callback means the host went away.
pub trait Interaction: Send + Sync {
    fn has_explanation(&self) -> bool;

    fn has_remediation(&self) -> bool;

    /// Explain `request.capabilities` and ask whether to continue.
    fn on_needs_explanation(
        &self,
        request: &ExplainRequest,
    ) -> impl Future<Output = Result<Decision>> + Send;

    /// Offer to send the user to settings for permanently refused
    /// capabilities.
    fn on_needs_remediation(
        &self,
        capabilities: &[Capability],
    ) -> impl Future<Output = Result<Decision>> + Send;
}

/// No callbacks registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInteraction;

impl Interaction for NoInteraction {
    fn has_explanation(&self) -> bool {
        false
    }

    fn has_remediation(&self) -> bool {
        false
    }

    async fn on_needs_explanation(&self, _request: &ExplainRequest) -> Result<Decision> {
        Ok(Decision::Proceed)
    }

    async fn on_needs_remediation(&self, _capabilities: &[Capability]) -> Result<Decision> {
        Ok(Decision::Proceed)
    }
}

/// A pending question for the host, answered through `reply`.
#[derive(Debug)]
pub enum Prompt {
    Explain {
        request: ExplainRequest,
        reply: oneshot::Sender<Decision>,
    },
    Remediate {
        capabilities: Vec<Capability>,
        reply: oneshot::Sender<Decision>,
    },
}

impl Prompt {
    pub fn capabilities(&self) -> &[Capability] {
        match self {
            Prompt::Explain { request, .. } => &request.capabilities,
            Prompt::Remediate { capabilities, .. } => capabilities,
        }
    }

    /// Answer the prompt. Returns `false` if the session is gone.
    pub fn answer(self, decision: Decision) -> bool {
        let reply = match self {
            Prompt::Explain { reply, .. } | Prompt::Remediate { reply, .. } => reply,
        };
        reply.send(decision).is_ok()
    }
}

/// Forwards interactions over a channel.
///
/// Each prompt carries a oneshot reply. Dropping a prompt without answering
/// (or dropping the receiver) abandons the session.
#[derive(Debug, Clone)]
pub struct ChannelInteraction {
    tx: mpsc::Sender<Prompt>,
    explanation: bool,
    remediation: bool,
}

impl ChannelInteraction {
    /// Create a bridge with both callbacks registered.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Prompt>) {
        let (tx, rx) = mpsc::channel(buffer);
        let bridge = Self {
            tx,
            explanation: true,
            remediation: true,
        };
        (bridge, rx)
    }

    pub fn with_explanation(mut self, enabled: bool) -> Self {
        self.explanation = enabled;
        self
    }

    pub fn with_remediation(mut self, enabled: bool) -> Self {
        self.remediation = enabled;
        self
    }

    async fn ask(&self, build: impl FnOnce(oneshot::Sender<Decision>) -> Prompt) -> Result<Decision> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::Abandoned)?;
        answer.await.map_err(|_| Error::Abandoned)
    }
}

impl Interaction for ChannelInteraction {
    fn has_explanation(&self) -> bool {
        self.explanation
    }

    fn has_remediation(&self) -> bool {
        self.remediation
    }

    async fn on_needs_explanation(&self, request: &ExplainRequest) -> Result<Decision> {
        let request = request.clone();
        self.ask(|reply| Prompt::Explain { request, reply }).await
    }

    async fn on_needs_remediation(&self, capabilities: &[Capability]) -> Result<Decision> {
        let capabilities = capabilities.to_vec();
        self.ask(|reply| Prompt::Remediate {
            capabilities,
            reply,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_round_trip() {
        let (bridge, mut prompts) = ChannelInteraction::new(1);
        let host = tokio::spawn(async move {
            let prompt = prompts.recv().await.unwrap();
            assert_eq!(prompt.capabilities(), &[Capability::Camera]);
            assert!(prompt.answer(Decision::Decline));
        });
        let decision = bridge
            .on_needs_explanation(&ExplainRequest {
                capabilities: vec![Capability::Camera],
                before_request: true,
            })
            .await
            .unwrap();
        assert_eq!(decision, Decision::Decline);
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_reply_abandons() {
        let (bridge, mut prompts) = ChannelInteraction::new(1);
        tokio::spawn(async move {
            let _ = prompts.recv().await;
        });
        let err = bridge
            .on_needs_remediation(&[Capability::ReadContacts])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Abandoned));
    }

    #[tokio::test]
    async fn test_closed_channel_abandons() {
        let (bridge, prompts) = ChannelInteraction::new(1);
        drop(prompts);
        assert!(bridge.on_needs_remediation(&[]).await.is_err());
    }

    #[test]
    fn test_flags() {
        let (bridge, _rx) = ChannelInteraction::new(1);
        let bridge = bridge.with_remediation(false);
        assert!(bridge.has_explanation());
        assert!(!bridge.has_remediation());
        assert!(!NoInteraction.has_explanation());
    }
}
