//! Request orchestration.
//!
//! A submitted request is validated, split into stages, and the stage queue
//! is drained one stage at a time. Every wait on the user or the platform is
//! an awaited future raced against the host lifecycle signal.

use crate::aggregator::aggregate;
use crate::interaction::{Decision, ExplainRequest, Interaction, NoInteraction};
use crate::lifecycle::LifecycleSignal;
use crate::Platform;
use crate::session::{Bucket, RequestReport, RequestSession};
use crate::stage::{Stage, StageKind, StageState, build_queue, partition};
use crate::validator::{self, ValidationMode};
use crate::{Error, Result};
use policy::{ApiLevel, Capability, PlatformQuery, ResolutionContext, Resolver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Per-orchestrator request behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub mode: ValidationMode,
    /// Explain ordinary capabilities before the first prompt.
    #[serde(default)]
    pub explain_before_request: bool,
}

/// Drives request sessions against a platform.
///
/// One session at a time: a second request while one is running fails with
/// [`Error::SessionInFlight`].
pub struct Orchestrator<P, I = NoInteraction> {
    resolver: Arc<Resolver>,
    platform: Arc<P>,
    interaction: Arc<I>,
    signal: LifecycleSignal,
    options: RequestOptions,
    in_flight: Arc<AtomicBool>,
}

impl<P, I> Clone for Orchestrator<P, I> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            platform: Arc::clone(&self.platform),
            interaction: Arc::clone(&self.interaction),
            signal: self.signal.clone(),
            options: self.options,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<P> Orchestrator<P, NoInteraction>
where
    P: Platform + 'static,
{
    pub fn new(platform: Arc<P>) -> Self {
        Self {
            resolver: Arc::new(Resolver::new()),
            platform,
            interaction: Arc::new(NoInteraction),
            signal: LifecycleSignal::never(),
            options: RequestOptions::default(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<P, I> Orchestrator<P, I>
where
    P: Platform + 'static,
    I: Interaction + 'static,
{
    pub fn with_interaction<J: Interaction + 'static>(self, interaction: Arc<J>) -> Orchestrator<P, J> {
        Orchestrator {
            resolver: self.resolver,
            platform: self.platform,
            interaction,
            signal: self.signal,
            options: self.options,
            in_flight: self.in_flight,
        }
    }

    pub fn with_lifecycle(mut self, signal: LifecycleSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn options(&self) -> RequestOptions {
        self.options
    }

    /// Validate and partition a request without running it.
    pub fn prepare(&self, requested: &[Capability], ctx: ResolutionContext) -> Result<RequestSession> {
        let normalized = validator::normalize(requested, &ctx, self.options.mode)?;
        let (ordinary, dedicated) = partition(&normalized, &ctx);
        Ok(RequestSession::new(
            ctx,
            requested.to_vec(),
            normalized,
            ordinary,
            dedicated,
        ))
    }

    /// Start a session in the background; `callback` receives the outcome.
    ///
    /// Validation failures and overlapping requests are reported through
    /// `callback` before this returns. An abandoned session never calls
    /// it. Must be called from within a tokio runtime.
    pub fn submit<F>(&self, requested: Vec<Capability>, ctx: ResolutionContext, callback: F)
    where
        F: FnOnce(Result<RequestReport>) + Send + 'static,
    {
        let guard = match InFlight::acquire(&self.in_flight) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(%ctx, "request rejected: session in flight");
                return callback(Err(e));
            }
        };
        let session = match self.prepare(&requested, ctx) {
            Ok(session) => session,
            Err(e) => {
                drop(guard);
                warn!(%ctx, error = %e, "request rejected");
                return callback(Err(e));
            }
        };

        let this = self.clone();
        tokio::spawn(async move {
            let result = this.drive(session).await;
            drop(guard);
            match result {
                Err(Error::Abandoned) => {}
                result => callback(result),
            }
        });
    }

    /// Run a session to completion.
    pub async fn run(&self, requested: &[Capability], ctx: ResolutionContext) -> Result<RequestReport> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let session = self.prepare(requested, ctx)?;
        self.drive(session).await
    }

    /// Ask the platform to revoke `capabilities` when the process dies.
    ///
    /// Only runtime capabilities on Android 13 or later can be revoked.
    pub fn revoke_on_kill(&self, capabilities: &[Capability], ctx: &ResolutionContext) -> bool {
        if !ctx.runtime_at_least(ApiLevel::ANDROID_13) {
            debug!(%ctx, "revoke on kill unsupported");
            return false;
        }
        let revocable: Vec<_> = capabilities
            .iter()
            .copied()
            .filter(|c| !c.is_special())
            .collect();
        if revocable.is_empty() {
            return false;
        }
        self.platform.revoke_on_kill(&revocable)
    }

    async fn drive(&self, mut session: RequestSession) -> Result<RequestReport> {
        info!(
            session = %session.id,
            ctx = %session.ctx,
            requested = ?session.requested,
            ordinary = session.ordinary.len(),
            dedicated = session.dedicated.len(),
            "session started"
        );
        let mut queue = build_queue(&session.ordinary, &session.dedicated);
        let mut signal = self.signal.clone();

        {
            let mut runner = StageRunner {
                orch: self,
                session: &mut session,
                signal: &mut signal,
            };
            while let Some(mut stage) = queue.pop_front() {
                debug!(session = %runner.session.id, stage = %stage.kind, "stage started");
                let result = runner.run_stage(&mut stage).await;
                if let Err(e) = result {
                    if matches!(e, Error::Abandoned) {
                        warn!(
                            session = %runner.session.id,
                            stage = %stage.kind,
                            remaining = queue.len(),
                            "host invalidated; session abandoned"
                        );
                    }
                    return Err(e);
                }
                stage.advance(StageState::Finished);
            }
        }

        aggregate(&self.resolver, &mut session, &*self.platform)
    }
}

struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SessionInFlight)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct StageRunner<'a, P, I> {
    orch: &'a Orchestrator<P, I>,
    session: &'a mut RequestSession,
    signal: &'a mut LifecycleSignal,
}

impl<'a, P, I> StageRunner<'a, P, I>
where
    P: Platform + 'static,
    I: Interaction + 'static,
{
    async fn run_stage(&mut self, stage: &mut Stage) -> Result<()> {
        stage.advance(StageState::Evaluating);
        match stage.kind.clone() {
            StageKind::Ordinary(caps) => self.ordinary(stage, &caps).await,
            StageKind::Companion(capability) => self.companion(stage, capability).await,
            StageKind::Settings(capability) => self.settings(stage, capability).await,
        }
    }

    fn query(&self) -> &'a dyn PlatformQuery {
        &*self.orch.platform
    }

    fn is_granted(&self, capability: Capability) -> Result<bool> {
        Ok(self
            .orch
            .resolver
            .is_granted(capability, &self.session.ctx, self.query())?)
    }

    /// Record the current outcome of `capability`.
    fn settle(&mut self, capability: Capability) -> Result<Bucket> {
        let outcome = self
            .orch
            .resolver
            .outcome(capability, &self.session.ctx, self.query())?;
        let bucket = Bucket::from(outcome);
        self.session.record(capability, bucket);
        Ok(bucket)
    }

    async fn explain(
        &mut self,
        stage: &mut Stage,
        capabilities: &[Capability],
        before_request: bool,
    ) -> Result<Decision> {
        stage.advance(StageState::AwaitingInteraction);
        let request = ExplainRequest {
            capabilities: capabilities.to_vec(),
            before_request,
        };
        let interaction = &self.orch.interaction;
        let decision = self
            .signal
            .guard(interaction.on_needs_explanation(&request))
            .await??;
        debug!(session = %self.session.id, stage = %stage.kind, ?decision, "explanation answered");
        stage.advance(StageState::Evaluating);
        Ok(decision)
    }

    /// Prompt for whatever in `pending` exists on this runtime, then settle
    /// all of `pending`. Returns the retryable denials.
    async fn request_and_settle(
        &mut self,
        stage: &mut Stage,
        pending: &[Capability],
    ) -> Result<Vec<Capability>> {
        let runtime = self.session.ctx.runtime;
        let prompt: Vec<_> = pending
            .iter()
            .copied()
            .filter(|c| c.exists_on(runtime))
            .collect();
        let mut results = HashMap::new();
        if !prompt.is_empty() {
            stage.advance(StageState::AwaitingPlatformResult);
            let platform = &self.orch.platform;
            results = self.signal.guard(platform.request_runtime(&prompt)).await?;
            debug!(session = %self.session.id, stage = %stage.kind, ?results, "platform answered");
            stage.advance(StageState::Evaluating);
        }

        // Buckets come from current platform state. A prompt answer that
        // state does not back up is logged and ignored.
        let mut retryable = Vec::new();
        for capability in pending {
            let bucket = self.settle(*capability)?;
            if results.get(capability) == Some(&true) && bucket != Bucket::Granted {
                warn!(
                    session = %self.session.id,
                    %capability,
                    ?bucket,
                    "prompt reported a grant the platform does not hold"
                );
            }
            if bucket == Bucket::Denied {
                retryable.push(*capability);
            }
        }
        Ok(retryable)
    }

    /// Offer settings for anything in `capabilities` that was refused for good.
    async fn forward_permanent(&mut self, stage: &mut Stage, capabilities: &[Capability]) -> Result<()> {
        let permanent: Vec<_> = capabilities
            .iter()
            .copied()
            .filter(|c| self.session.bucket_of(*c) == Some(Bucket::PermanentlyDenied))
            .collect();
        let interaction = &self.orch.interaction;
        if permanent.is_empty() || !interaction.has_remediation() {
            return Ok(());
        }

        stage.advance(StageState::AwaitingInteraction);
        let decision = self
            .signal
            .guard(interaction.on_needs_remediation(&permanent))
            .await??;
        if !decision.is_proceed() {
            debug!(session = %self.session.id, ?permanent, "remediation declined");
            return Ok(());
        }

        let target = self
            .orch
            .resolver
            .smart_remediation_target(&permanent, &self.session.ctx, self.query())?;
        info!(session = %self.session.id, %target, ?permanent, "opening settings");
        self.open(stage, target).await?;
        for capability in permanent {
            self.settle(capability)?;
        }
        Ok(())
    }

    async fn open(&mut self, stage: &mut Stage, target: policy::RemediationTarget) -> Result<()> {
        stage.advance(StageState::AwaitingPlatformResult);
        let platform = &self.orch.platform;
        self.signal.guard(platform.open_remediation(target)).await?;
        stage.advance(StageState::Evaluating);
        Ok(())
    }

    async fn ordinary(&mut self, stage: &mut Stage, capabilities: &[Capability]) -> Result<()> {
        let mut pending = Vec::new();
        for capability in capabilities {
            if self.is_granted(*capability)? {
                self.session.record(*capability, Bucket::Granted);
            } else {
                pending.push(*capability);
            }
        }
        if pending.is_empty() {
            stage.advance(StageState::Skipped);
            return Ok(());
        }

        let explains = self.orch.interaction.has_explanation();
        if self.orch.options.explain_before_request && explains && stage.take_explanation() {
            let decision = self.explain(stage, &pending, true).await?;
            if !decision.is_proceed() {
                for capability in &pending {
                    self.settle(*capability)?;
                }
                return self.forward_permanent(stage, capabilities).await;
            }
        }

        let retryable = self.request_and_settle(stage, &pending).await?;
        if !retryable.is_empty() && explains && stage.take_explanation() {
            let decision = self.explain(stage, &retryable, false).await?;
            if decision.is_proceed() {
                self.request_and_settle(stage, &retryable).await?;
            }
        }

        self.forward_permanent(stage, capabilities).await
    }

    async fn companion(&mut self, stage: &mut Stage, capability: Capability) -> Result<()> {
        let granted = self.is_granted(capability)?;
        if !capability.exists_on(self.session.ctx.runtime) {
            // Below introduction the resolver answers from the companions.
            let bucket = if granted {
                Bucket::Granted
            } else {
                Bucket::NotApplicable
            };
            self.session.record(capability, bucket);
            stage.advance(StageState::Skipped);
            return Ok(());
        }
        if granted {
            self.session.record(capability, Bucket::Granted);
            stage.advance(StageState::Skipped);
            return Ok(());
        }

        let mut companion_held = false;
        for companion in capability.companions() {
            if self.is_granted(*companion)? {
                companion_held = true;
                break;
            }
        }
        if !companion_held {
            debug!(session = %self.session.id, %capability, "no companion held");
            self.settle(capability)?;
            return Ok(());
        }

        if self.orch.interaction.has_explanation() && stage.take_explanation() {
            let decision = self.explain(stage, &[capability], true).await?;
            if !decision.is_proceed() {
                self.settle(capability)?;
                return Ok(());
            }
        }
        self.request_and_settle(stage, &[capability]).await?;
        self.forward_permanent(stage, &[capability]).await
    }

    async fn settings(&mut self, stage: &mut Stage, capability: Capability) -> Result<()> {
        if capability.is_special() && !capability.exists_on(self.session.ctx.runtime) {
            let bucket = if self.is_granted(capability)? {
                Bucket::Granted
            } else {
                Bucket::NotApplicable
            };
            self.session.record(capability, bucket);
            stage.advance(StageState::Skipped);
            return Ok(());
        }
        if self.is_granted(capability)? {
            self.session.record(capability, Bucket::Granted);
            stage.advance(StageState::Skipped);
            return Ok(());
        }
        if !self.orch.interaction.has_explanation() || !stage.take_explanation() {
            debug!(session = %self.session.id, %capability, "no explanation round; denied");
            self.session.record(capability, Bucket::Denied);
            return Ok(());
        }

        let decision = self.explain(stage, &[capability], true).await?;
        if !decision.is_proceed() {
            self.session.record(capability, Bucket::Denied);
            return Ok(());
        }

        let target =
            self.orch
                .resolver
                .remediation_target(capability, &self.session.ctx, self.query())?;
        info!(session = %self.session.id, %capability, %target, "opening settings");
        self.open(stage, target).await?;
        self.settle(capability)?;
        self.forward_permanent(stage, &[capability]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::{ChannelInteraction, Prompt};
    use crate::lifecycle::HostLifecycle;
    use crate::platform::PlatformRequestSurface;
    use policy::{RemediationTarget, SpecialProbe};
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    use Capability as C;

    #[derive(Debug, Clone, Copy)]
    enum Answer {
        Grant,
        Deny,
        DenyForever,
    }

    #[derive(Default)]
    struct Script {
        granted: HashSet<Capability>,
        rationale: HashSet<Capability>,
        probes: HashSet<SpecialProbe>,
        answers: HashMap<Capability, VecDeque<Answer>>,
        settings_probes: Vec<SpecialProbe>,
        settings_grants: Vec<Capability>,
        /// Reported as granted without the grant sticking.
        phantom: HashSet<Capability>,
        revocable: bool,
        events: Vec<String>,
    }

    #[derive(Default)]
    struct FakePlatform(Mutex<Script>);

    impl FakePlatform {
        fn script(self, f: impl FnOnce(&mut Script)) -> Self {
            f(&mut *self.0.lock().unwrap());
            self
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().events.clone()
        }

        fn prompts(&self) -> usize {
            self.events().iter().filter(|e| e.starts_with("prompt")).count()
        }
    }

    impl Script {
        fn grant(&mut self, caps: &[Capability]) {
            self.granted.extend(caps.iter().copied());
        }

        fn answer(&mut self, capability: Capability, answers: &[Answer]) {
            self.answers
                .insert(capability, answers.iter().copied().collect());
        }
    }

    impl PlatformQuery for FakePlatform {
        fn is_granted(&self, capability: Capability) -> bool {
            self.0.lock().unwrap().granted.contains(&capability)
        }

        fn should_show_rationale(&self, capability: Capability) -> bool {
            self.0.lock().unwrap().rationale.contains(&capability)
        }

        fn probe(&self, probe: SpecialProbe) -> bool {
            self.0.lock().unwrap().probes.contains(&probe)
        }
    }

    impl PlatformRequestSurface for FakePlatform {
        async fn request_runtime(&self, capabilities: &[Capability]) -> HashMap<Capability, bool> {
            let mut script = self.0.lock().unwrap();
            script.events.push(format!("prompt {capabilities:?}"));
            let mut results = HashMap::new();
            for capability in capabilities {
                let answer = script
                    .answers
                    .get_mut(capability)
                    .and_then(|a| a.pop_front())
                    .unwrap_or(Answer::Deny);
                match answer {
                    Answer::Grant if script.phantom.contains(capability) => {}
                    Answer::Grant => {
                        script.granted.insert(*capability);
                    }
                    Answer::Deny => {
                        script.rationale.insert(*capability);
                    }
                    Answer::DenyForever => {
                        script.rationale.remove(capability);
                    }
                }
                results.insert(*capability, matches!(answer, Answer::Grant));
            }
            results
        }

        async fn open_remediation(&self, target: RemediationTarget) {
            let mut script = self.0.lock().unwrap();
            script.events.push(format!("open {target}"));
            let probes = script.settings_probes.clone();
            script.probes.extend(probes);
            let grants = script.settings_grants.clone();
            script.granted.extend(grants);
        }

        fn revoke_on_kill(&self, capabilities: &[Capability]) -> bool {
            let mut script = self.0.lock().unwrap();
            script.events.push(format!("revoke {capabilities:?}"));
            script.revocable
        }
    }

    struct Scripted {
        explain: Option<Decision>,
        remediate: Option<Decision>,
        platform: Arc<FakePlatform>,
    }

    impl Interaction for Scripted {
        fn has_explanation(&self) -> bool {
            self.explain.is_some()
        }

        fn has_remediation(&self) -> bool {
            self.remediate.is_some()
        }

        async fn on_needs_explanation(&self, request: &ExplainRequest) -> Result<Decision> {
            self.platform
                .0
                .lock()
                .unwrap()
                .events
                .push(format!("explain {:?}", request.capabilities));
            Ok(self.explain.unwrap_or(Decision::Proceed))
        }

        async fn on_needs_remediation(&self, capabilities: &[Capability]) -> Result<Decision> {
            self.platform
                .0
                .lock()
                .unwrap()
                .events
                .push(format!("remediate {capabilities:?}"));
            Ok(self.remediate.unwrap_or(Decision::Proceed))
        }
    }

    fn ctx(runtime: ApiLevel, target: ApiLevel) -> ResolutionContext {
        ResolutionContext::new(runtime, target)
    }

    fn modern() -> ResolutionContext {
        ctx(ApiLevel::ANDROID_13, ApiLevel::ANDROID_13)
    }

    fn orchestrator(
        platform: &Arc<FakePlatform>,
        explain: Option<Decision>,
        remediate: Option<Decision>,
    ) -> Orchestrator<FakePlatform, Scripted> {
        Orchestrator::new(Arc::clone(platform)).with_interaction(Arc::new(Scripted {
            explain,
            remediate,
            platform: Arc::clone(platform),
        }))
    }

    fn as_set(caps: &[Capability]) -> HashSet<Capability> {
        caps.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_ordinary_batch_then_settings_stage() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.answer(C::Camera, &[Answer::Grant]);
            s.answer(C::RecordAudio, &[Answer::Grant]);
            s.settings_probes.push(SpecialProbe::Overlay);
        }));
        let orch = orchestrator(&platform, Some(Decision::Proceed), None);
        let report = orch
            .run(&[C::SystemAlertWindow, C::Camera, C::RecordAudio], modern())
            .await
            .unwrap();

        assert!(report.all_granted);
        assert_eq!(
            platform.events(),
            vec![
                format!("prompt {:?}", [C::Camera, C::RecordAudio]),
                format!("explain {:?}", [C::SystemAlertWindow]),
                format!("open {}", policy::rules::action::MANAGE_OVERLAY_PERMISSION),
            ]
        );
    }

    #[tokio::test]
    async fn test_special_without_explanation_is_denied_silently() {
        let platform = Arc::new(FakePlatform::default());
        let orch = Orchestrator::new(Arc::clone(&platform));
        let report = orch.run(&[C::WriteSettings], modern()).await.unwrap();
        assert!(!report.all_granted);
        assert_eq!(report.denied, vec![C::WriteSettings]);
        assert!(report.permanently_denied.is_empty());
        assert!(platform.events().is_empty());
    }

    #[tokio::test]
    async fn test_background_location_on_old_runtime_follows_companions() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.grant(&[C::AccessFineLocation, C::AccessCoarseLocation]);
        }));
        let orch = orchestrator(&platform, Some(Decision::Proceed), Some(Decision::Proceed));
        let report = orch
            .run(
                &[C::AccessBackgroundLocation],
                ctx(ApiLevel::ANDROID_9, ApiLevel::ANDROID_11),
            )
            .await
            .unwrap();
        assert!(report.all_granted);
        assert_eq!(report.granted, vec![C::AccessBackgroundLocation]);
        assert!(platform.events().is_empty());
    }

    #[tokio::test]
    async fn test_background_location_on_old_runtime_with_coarse_only() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.grant(&[C::AccessCoarseLocation]);
        }));
        let orch = orchestrator(&platform, Some(Decision::Proceed), Some(Decision::Proceed));
        let old = ctx(ApiLevel::ANDROID_9, ApiLevel::ANDROID_11);
        let report = orch.run(&[C::AccessBackgroundLocation], old).await.unwrap();
        let resolved = Resolver::new()
            .is_granted(C::AccessBackgroundLocation, &old, &*platform)
            .unwrap();
        assert!(resolved);
        assert_eq!(report.all_granted, resolved);
        assert_eq!(report.granted, vec![C::AccessBackgroundLocation]);
        assert!(platform.events().is_empty());
    }

    #[tokio::test]
    async fn test_background_location_on_old_runtime_without_foreground() {
        let platform = Arc::new(FakePlatform::default());
        let orch = orchestrator(&platform, Some(Decision::Proceed), Some(Decision::Proceed));
        let report = orch
            .run(
                &[C::AccessBackgroundLocation],
                ctx(ApiLevel::ANDROID_9, ApiLevel::ANDROID_11),
            )
            .await
            .unwrap();
        assert!(!report.all_granted);
        assert_eq!(report.denied, vec![C::AccessBackgroundLocation]);
        assert!(platform.events().is_empty());
    }

    #[tokio::test]
    async fn test_platform_state_wins_over_prompt_answer() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.answer(C::Camera, &[Answer::Grant]);
            s.phantom.insert(C::Camera);
        }));
        let orch = orchestrator(&platform, None, None);
        let report = orch.run(&[C::Camera], modern()).await.unwrap();
        assert!(!report.all_granted);
        assert!(report.granted.is_empty());
        assert_eq!(report.denied, vec![C::Camera]);
        assert_eq!(platform.prompts(), 1);
    }

    #[tokio::test]
    async fn test_settings_stage_explains_once() {
        let platform = Arc::new(FakePlatform::default());
        let orch = orchestrator(&platform, Some(Decision::Proceed), Some(Decision::Proceed));
        let report = orch.run(&[C::WriteSettings], modern()).await.unwrap();
        assert_eq!(report.denied, vec![C::WriteSettings]);
        let events = platform.events();
        assert_eq!(events.iter().filter(|e| e.starts_with("explain")).count(), 1);
        assert_eq!(events.iter().filter(|e| e.starts_with("open")).count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_runs_no_stage() {
        let platform = Arc::new(FakePlatform::default());
        let orch = Orchestrator::new(Arc::clone(&platform));
        let err = orch
            .run(
                &[C::AccessFineLocation],
                ctx(ApiLevel::ANDROID_12, ApiLevel::ANDROID_12),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCapabilitySet(_)));
        assert!(platform.events().is_empty());
        // The guard is released after a failed run.
        assert!(orch.run(&[C::Camera], modern()).await.is_ok());
    }

    #[tokio::test]
    async fn test_one_explanation_round_then_retry() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.answer(C::Camera, &[Answer::Deny, Answer::Grant]);
            s.answer(C::RecordAudio, &[Answer::Deny, Answer::Deny, Answer::Grant]);
        }));
        let orch = orchestrator(&platform, Some(Decision::Proceed), None);
        let report = orch
            .run(&[C::Camera, C::RecordAudio], modern())
            .await
            .unwrap();

        assert_eq!(report.granted, vec![C::Camera]);
        assert_eq!(report.denied, vec![C::RecordAudio]);
        assert_eq!(platform.prompts(), 2);
        let explains = platform
            .events()
            .iter()
            .filter(|e| e.starts_with("explain"))
            .count();
        assert_eq!(explains, 1);
    }

    #[tokio::test]
    async fn test_permanent_denial_forwards_to_settings() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.answer(C::ReadContacts, &[Answer::DenyForever]);
            s.settings_grants.push(C::ReadContacts);
        }));
        let orch = orchestrator(&platform, None, Some(Decision::Proceed));
        let report = orch.run(&[C::ReadContacts], modern()).await.unwrap();

        assert!(report.all_granted);
        let events = platform.events();
        assert_eq!(events[1], format!("remediate {:?}", [C::ReadContacts]));
        assert_eq!(
            events[2],
            format!("open {}", RemediationTarget::AppDetails)
        );
    }

    #[tokio::test]
    async fn test_declined_remediation_reports_permanent() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.answer(C::ReadContacts, &[Answer::DenyForever]);
        }));
        let orch = orchestrator(&platform, None, Some(Decision::Decline));
        let report = orch.run(&[C::ReadContacts], modern()).await.unwrap();
        assert_eq!(report.permanently_denied, vec![C::ReadContacts]);
        assert_eq!(report.denied, vec![C::ReadContacts]);
    }

    #[tokio::test]
    async fn test_explain_before_request_decline_skips_prompt() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.rationale.insert(C::Camera);
        }));
        let orch = orchestrator(&platform, Some(Decision::Decline), None).with_options(RequestOptions {
            explain_before_request: true,
            ..RequestOptions::default()
        });
        let report = orch.run(&[C::Camera], modern()).await.unwrap();
        assert_eq!(report.denied, vec![C::Camera]);
        assert_eq!(platform.prompts(), 0);
    }

    #[tokio::test]
    async fn test_buckets_cover_normalized_set() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.grant(&[C::ReadExternalStorage]);
            s.answer(C::AccessFineLocation, &[Answer::Grant]);
            s.answer(C::ReadContacts, &[Answer::DenyForever]);
        }));
        let orch = orchestrator(&platform, None, None);
        let requested = [
            C::ReadMediaImages,
            C::NearbyWifiDevices,
            C::ReadContacts,
            C::SystemAlertWindow,
        ];
        let c = ctx(ApiLevel::ANDROID_10, ApiLevel::ANDROID_13);
        let session = orch.prepare(&requested, c).unwrap();
        let report = orch.run(&requested, c).await.unwrap();

        let granted = as_set(&report.granted);
        let denied = as_set(&report.denied);
        assert!(granted.is_disjoint(&denied));
        let union: HashSet<_> = granted.union(&denied).copied().collect();
        assert_eq!(union, as_set(&session.normalized));

        assert!(granted.contains(&C::ReadMediaImages));
        assert!(granted.contains(&C::NearbyWifiDevices));
        assert_eq!(report.permanently_denied, vec![C::ReadContacts]);
        assert!(denied.contains(&C::SystemAlertWindow));
        // Only capabilities that exist on 10 were prompted.
        assert_eq!(
            platform.events()[0],
            format!("prompt {:?}", [C::AccessFineLocation, C::ReadContacts])
        );
    }

    #[tokio::test]
    async fn test_companion_stage_requests_single_capability() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.grant(&[C::BodySensors]);
            s.answer(C::BodySensorsBackground, &[Answer::Grant]);
        }));
        let orch = orchestrator(&platform, None, None);
        let report = orch
            .run(&[C::BodySensors, C::BodySensorsBackground], modern())
            .await
            .unwrap();
        assert!(report.all_granted);
        assert_eq!(
            platform.events(),
            vec![format!("prompt {:?}", [C::BodySensorsBackground])]
        );
    }

    #[tokio::test]
    async fn test_companion_stage_without_companion() {
        let platform = Arc::new(FakePlatform::default());
        let orch = orchestrator(&platform, Some(Decision::Proceed), None);
        let report = orch
            .run(
                &[C::AccessBackgroundLocation],
                ctx(ApiLevel::ANDROID_13, ApiLevel::ANDROID_13),
            )
            .await
            .unwrap();
        assert_eq!(report.denied, vec![C::AccessBackgroundLocation]);
        assert_eq!(platform.prompts(), 0);
    }

    #[tokio::test]
    async fn test_notifications_before_13_use_settings() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.settings_probes.push(SpecialProbe::NotificationsEnabled);
        }));
        let orch = orchestrator(&platform, Some(Decision::Proceed), None);
        let report = orch
            .run(
                &[C::PostNotifications],
                ctx(ApiLevel::ANDROID_12, ApiLevel::ANDROID_13),
            )
            .await
            .unwrap();
        assert!(report.all_granted);
        assert_eq!(
            platform.events().last().unwrap(),
            &format!("open {}", policy::rules::action::APP_NOTIFICATION_SETTINGS)
        );
    }

    #[tokio::test]
    async fn test_special_not_applicable_on_old_runtime() {
        let platform = Arc::new(FakePlatform::default());
        let orch = orchestrator(&platform, Some(Decision::Proceed), None)
            .with_options(RequestOptions {
                mode: ValidationMode::Lenient,
                ..RequestOptions::default()
            });
        let report = orch
            .run(
                &[C::ScheduleExactAlarm],
                ctx(ApiLevel::ANDROID_11, ApiLevel::ANDROID_12),
            )
            .await
            .unwrap();
        // Exact alarms need no grant before 12.
        assert!(report.all_granted);
        assert!(platform.events().is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_abandons_session() {
        let platform = Arc::new(FakePlatform::default());
        let host = HostLifecycle::new();
        let (bridge, mut prompts) = ChannelInteraction::new(1);
        let orch = Orchestrator::new(Arc::clone(&platform))
            .with_interaction(Arc::new(bridge))
            .with_lifecycle(host.signal());

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(&[C::SystemAlertWindow], modern()).await })
        };
        let prompt = prompts.recv().await.unwrap();
        assert!(matches!(prompt, Prompt::Explain { .. }));
        host.invalidate();

        assert!(matches!(task.await.unwrap(), Err(Error::Abandoned)));
        assert!(platform.events().is_empty());
        drop(prompt);
    }

    #[tokio::test]
    async fn test_submit_reports_through_callback() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.answer(C::Camera, &[Answer::Grant]);
        }));
        let orch = Orchestrator::new(Arc::clone(&platform));
        let (tx, rx) = oneshot::channel();
        orch.submit(vec![C::Camera], modern(), move |result| {
            let _ = tx.send(result);
        });
        let report = rx.await.unwrap().unwrap();
        assert!(report.all_granted);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_set_via_callback() {
        let orch = Orchestrator::new(Arc::new(FakePlatform::default()));
        let (tx, rx) = oneshot::channel();
        orch.submit(Vec::new(), modern(), move |result| {
            let _ = tx.send(result);
        });
        assert!(matches!(
            rx.await.unwrap(),
            Err(Error::InvalidCapabilitySet(_))
        ));
    }

    #[tokio::test]
    async fn test_overlapping_submit_is_rejected() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.settings_probes.push(SpecialProbe::WriteSettings);
        }));
        let (bridge, mut prompts) = ChannelInteraction::new(1);
        let orch = Orchestrator::new(Arc::clone(&platform)).with_interaction(Arc::new(bridge));

        let (first_tx, first_rx) = oneshot::channel();
        orch.submit(vec![C::WriteSettings], modern(), move |result| {
            let _ = first_tx.send(result);
        });
        let prompt = prompts.recv().await.unwrap();

        let (second_tx, second_rx) = oneshot::channel();
        orch.submit(vec![C::Camera], modern(), move |result| {
            let _ = second_tx.send(result);
        });
        assert!(matches!(
            second_rx.await.unwrap(),
            Err(Error::SessionInFlight)
        ));

        assert!(prompt.answer(Decision::Proceed));
        let report = first_rx.await.unwrap().unwrap();
        assert_eq!(report.granted, vec![C::WriteSettings]);
    }

    #[tokio::test]
    async fn test_abandoned_submit_never_calls_back() {
        let platform = Arc::new(FakePlatform::default().script(|s| {
            s.answer(C::Camera, &[Answer::Grant]);
        }));
        let (bridge, mut prompts) = ChannelInteraction::new(1);
        let orch = Orchestrator::new(Arc::clone(&platform)).with_interaction(Arc::new(bridge));
        let (tx, rx) = oneshot::channel::<Result<RequestReport>>();
        orch.submit(vec![C::WriteSettings], modern(), move |result| {
            let _ = tx.send(result);
        });
        // Dropping the prompt unanswered abandons the session.
        drop(prompts.recv().await.unwrap());
        assert!(rx.await.is_err());
        // The orchestrator is free again.
        assert!(orch.run(&[C::Camera], modern()).await.is_ok());
    }

    #[test]
    fn test_revoke_on_kill() {
        let platform = Arc::new(FakePlatform::default().script(|s| s.revocable = true));
        let orch = Orchestrator::new(Arc::clone(&platform));
        let old = ctx(ApiLevel::ANDROID_12, ApiLevel::ANDROID_13);
        assert!(!orch.revoke_on_kill(&[C::Camera], &old));
        assert!(!orch.revoke_on_kill(&[C::SystemAlertWindow], &modern()));
        assert!(orch.revoke_on_kill(&[C::Camera, C::SystemAlertWindow], &modern()));
        assert_eq!(platform.events(), vec![format!("revoke {:?}", [C::Camera])]);
    }
}
