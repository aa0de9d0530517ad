//! Per-request session state.

use policy::{Capability, CapabilityOutcome, ResolutionContext};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique identifier for a request session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a capability ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Granted,
    Denied,
    PermanentlyDenied,
    /// The runtime has no such capability and nothing stands in for it.
    NotApplicable,
}

impl Bucket {
    const ALL: [Bucket; 4] = [
        Bucket::Granted,
        Bucket::Denied,
        Bucket::PermanentlyDenied,
        Bucket::NotApplicable,
    ];

    fn index(self) -> usize {
        match self {
            Bucket::Granted => 0,
            Bucket::Denied => 1,
            Bucket::PermanentlyDenied => 2,
            Bucket::NotApplicable => 3,
        }
    }
}

impl From<CapabilityOutcome> for Bucket {
    fn from(outcome: CapabilityOutcome) -> Self {
        match outcome {
            CapabilityOutcome::Granted => Bucket::Granted,
            CapabilityOutcome::DeniedRetryable => Bucket::Denied,
            CapabilityOutcome::DeniedPermanently => Bucket::PermanentlyDenied,
        }
    }
}

/// State owned by one orchestration run.
///
/// Every capability sits in at most one bucket; recording it somewhere
/// removes it from wherever it was. Once frozen, buckets no longer change.
#[derive(Debug)]
pub struct RequestSession {
    pub id: SessionId,
    pub ctx: ResolutionContext,
    pub requested: Vec<Capability>,
    pub normalized: Vec<Capability>,
    pub ordinary: Vec<Capability>,
    pub dedicated: Vec<Capability>,
    buckets: [Vec<Capability>; 4],
    frozen: bool,
}

impl RequestSession {
    pub fn new(
        ctx: ResolutionContext,
        requested: Vec<Capability>,
        normalized: Vec<Capability>,
        ordinary: Vec<Capability>,
        dedicated: Vec<Capability>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            ctx,
            requested,
            normalized,
            ordinary,
            dedicated,
            buckets: Default::default(),
            frozen: false,
        }
    }

    /// Move `capability` into `bucket`. Returns `false` once frozen.
    pub fn record(&mut self, capability: Capability, bucket: Bucket) -> bool {
        if self.frozen {
            warn!(session = %self.id, %capability, ?bucket, "session frozen; ignoring update");
            return false;
        }
        for other in Bucket::ALL {
            if other != bucket {
                self.buckets[other.index()].retain(|c| *c != capability);
            }
        }
        let target = &mut self.buckets[bucket.index()];
        if !target.contains(&capability) {
            target.push(capability);
        }
        debug!(session = %self.id, %capability, ?bucket, "recorded");
        true
    }

    pub fn bucket(&self, bucket: Bucket) -> &[Capability] {
        &self.buckets[bucket.index()]
    }

    /// The bucket `capability` currently sits in.
    pub fn bucket_of(&self, capability: Capability) -> Option<Bucket> {
        Bucket::ALL
            .into_iter()
            .find(|b| self.buckets[b.index()].contains(&capability))
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestReport {
    pub session: SessionId,
    pub all_granted: bool,
    pub granted: Vec<Capability>,
    /// Everything not granted, including permanent refusals.
    pub denied: Vec<Capability>,
    /// The subset of `denied` that only settings can fix.
    pub permanently_denied: Vec<Capability>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::ApiLevel;

    fn session() -> RequestSession {
        let caps = vec![Capability::Camera, Capability::RecordAudio];
        RequestSession::new(
            ResolutionContext::new(ApiLevel::ANDROID_13, ApiLevel::ANDROID_13),
            caps.clone(),
            caps.clone(),
            caps,
            Vec::new(),
        )
    }

    #[test]
    fn test_record_moves_between_buckets() {
        let mut s = session();
        s.record(Capability::Camera, Bucket::Denied);
        s.record(Capability::Camera, Bucket::Granted);
        assert_eq!(s.bucket(Bucket::Granted), &[Capability::Camera]);
        assert!(s.bucket(Bucket::Denied).is_empty());
        assert_eq!(s.bucket_of(Capability::Camera), Some(Bucket::Granted));
        assert_eq!(s.bucket_of(Capability::RecordAudio), None);
    }

    #[test]
    fn test_record_keeps_order_without_duplicates() {
        let mut s = session();
        s.record(Capability::RecordAudio, Bucket::Granted);
        s.record(Capability::Camera, Bucket::Granted);
        s.record(Capability::RecordAudio, Bucket::Granted);
        assert_eq!(
            s.bucket(Bucket::Granted),
            &[Capability::RecordAudio, Capability::Camera]
        );
    }

    #[test]
    fn test_frozen_session_rejects_updates() {
        let mut s = session();
        s.record(Capability::Camera, Bucket::PermanentlyDenied);
        s.freeze();
        assert!(s.is_frozen());
        assert!(!s.record(Capability::Camera, Bucket::Granted));
        assert_eq!(s.bucket_of(Capability::Camera), Some(Bucket::PermanentlyDenied));
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
