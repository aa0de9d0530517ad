//! Stages and the per-session stage queue.

use policy::{ApiLevel, Capability, ResolutionContext};
use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

/// What a stage governs and how it asks for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// One batched platform prompt for every ordinary capability.
    Ordinary(Vec<Capability>),
    /// A capability that needs a foreground companion first.
    Companion(Capability),
    /// A capability only a settings screen can grant.
    Settings(Capability),
}

impl StageKind {
    fn for_dedicated(capability: Capability) -> Self {
        if capability.companions().is_empty() {
            StageKind::Settings(capability)
        } else {
            StageKind::Companion(capability)
        }
    }

    pub fn capabilities(&self) -> &[Capability] {
        match self {
            StageKind::Ordinary(caps) => caps,
            StageKind::Companion(c) | StageKind::Settings(c) => std::slice::from_ref(c),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Ordinary(caps) => write!(f, "ordinary({})", caps.len()),
            StageKind::Companion(c) => write!(f, "companion({c})"),
            StageKind::Settings(c) => write!(f, "settings({c})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Evaluating,
    Skipped,
    AwaitingInteraction,
    AwaitingPlatformResult,
    Finished,
}

/// One node of the orchestration chain.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    state: StageState,
    explained: bool,
}

impl Stage {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            state: StageState::Idle,
            explained: false,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: StageState) {
        trace!(stage = %self.kind, from = ?self.state, to = ?next, "stage transition");
        self.state = next;
    }

    /// Claim this stage's single explanation round.
    pub(crate) fn take_explanation(&mut self) -> bool {
        !std::mem::replace(&mut self.explained, true)
    }
}

/// Whether `capability` gets its own stage on `ctx`.
///
/// Background location rides along with the ordinary prompt on Android 10,
/// and on Android 11 for apps still targeting 10 or lower. Notifications
/// are an ordinary prompt once both levels reach 13.
pub fn is_dedicated(capability: Capability, ctx: &ResolutionContext) -> bool {
    match capability {
        Capability::AccessBackgroundLocation => {
            let rides_along = ctx.runtime == ApiLevel::ANDROID_10
                || (ctx.runtime == ApiLevel::ANDROID_11 && ctx.target < ApiLevel::ANDROID_11);
            !rides_along
        }
        Capability::PostNotifications => !ctx.both_at_least(ApiLevel::ANDROID_13),
        c => c.has_dedicated_stage(),
    }
}

/// Split a normalized set into `(ordinary, dedicated)`, order preserved.
pub fn partition(
    normalized: &[Capability],
    ctx: &ResolutionContext,
) -> (Vec<Capability>, Vec<Capability>) {
    normalized
        .iter()
        .copied()
        .partition(|c| !is_dedicated(*c, ctx))
}

/// Build the stage chain: the ordinary batch first, then dedicated stages
/// in catalog order.
pub fn build_queue(ordinary: &[Capability], dedicated: &[Capability]) -> VecDeque<Stage> {
    let mut queue = VecDeque::with_capacity(dedicated.len() + 1);
    if !ordinary.is_empty() {
        queue.push_back(Stage::new(StageKind::Ordinary(ordinary.to_vec())));
    }
    let mut dedicated = dedicated.to_vec();
    dedicated.sort_by_key(|c| c.stage_rank().unwrap_or(usize::MAX));
    queue.extend(
        dedicated
            .into_iter()
            .map(|c| Stage::new(StageKind::for_dedicated(c))),
    );
    queue
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::Capability as C;

    fn ctx(runtime: ApiLevel, target: ApiLevel) -> ResolutionContext {
        ResolutionContext::new(runtime, target)
    }

    #[test]
    fn test_background_location_partition() {
        let bg = C::AccessBackgroundLocation;
        assert!(!is_dedicated(bg, &ctx(ApiLevel::ANDROID_10, ApiLevel::ANDROID_13)));
        assert!(!is_dedicated(bg, &ctx(ApiLevel::ANDROID_11, ApiLevel::ANDROID_10)));
        assert!(is_dedicated(bg, &ctx(ApiLevel::ANDROID_11, ApiLevel::ANDROID_11)));
        assert!(is_dedicated(bg, &ctx(ApiLevel::ANDROID_9, ApiLevel::ANDROID_11)));
        assert!(is_dedicated(bg, &ctx(ApiLevel::ANDROID_13, ApiLevel::ANDROID_13)));
    }

    #[test]
    fn test_notifications_partition() {
        let n = C::PostNotifications;
        assert!(!is_dedicated(n, &ctx(ApiLevel::ANDROID_13, ApiLevel::ANDROID_13)));
        assert!(is_dedicated(n, &ctx(ApiLevel::ANDROID_13, ApiLevel::ANDROID_12)));
        assert!(is_dedicated(n, &ctx(ApiLevel::ANDROID_12, ApiLevel::ANDROID_13)));
    }

    #[test]
    fn test_queue_order() {
        let c = ctx(ApiLevel::ANDROID_13, ApiLevel::ANDROID_13);
        let normalized = [
            C::ScheduleExactAlarm,
            C::Camera,
            C::SystemAlertWindow,
            C::RecordAudio,
        ];
        let (ordinary, dedicated) = partition(&normalized, &c);
        assert_eq!(ordinary, vec![C::Camera, C::RecordAudio]);
        let queue = build_queue(&ordinary, &dedicated);
        let kinds: Vec<_> = queue.iter().map(|s| s.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                StageKind::Ordinary(vec![C::Camera, C::RecordAudio]),
                StageKind::Settings(C::SystemAlertWindow),
                StageKind::Settings(C::ScheduleExactAlarm),
            ]
        );
        assert!(queue.iter().all(|s| s.state() == StageState::Idle));
    }

    #[test]
    fn test_no_ordinary_stage_when_empty() {
        let queue = build_queue(&[], &[C::BodySensorsBackground]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].kind, StageKind::Companion(C::BodySensorsBackground));
    }

    #[test]
    fn test_single_explanation_round() {
        let mut stage = Stage::new(StageKind::Settings(C::WriteSettings));
        assert!(stage.take_explanation());
        assert!(!stage.take_explanation());
    }
}
