//! Request orchestration for guarded platform capabilities.
//!
//! This crate turns a batch of requested capabilities into a sequence of
//! platform prompts and settings visits, consulting the [`policy`] resolver
//! before and after each one.
//!
//! # Overview
//!
//! - **Validator**: rejects malformed requests and expands them with the
//!   legacy capabilities older runtimes need.
//! - **Stages**: one batched prompt for ordinary capabilities, then one stage
//!   per capability that needs its own flow.
//! - **Orchestrator**: drains the stage queue, one session at a time.
//! - **Aggregator**: reconciles the buckets into a [`RequestReport`].
//!
//! # Example
//!
//! ```ignore
//! use policy::{ApiLevel, Capability, ResolutionContext};
//! use runtime::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn example(platform: Arc<impl runtime::Platform + 'static>) -> runtime::Result<()> {
//! let orchestrator = Orchestrator::new(platform);
//! let ctx = ResolutionContext::new(ApiLevel::ANDROID_13, ApiLevel::ANDROID_13);
//! let report = orchestrator
//!     .run(&[Capability::Camera, Capability::RecordAudio], ctx)
//!     .await?;
//! println!("all granted: {}", report.all_granted);
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod error;
mod interaction;
mod lifecycle;
mod orchestrator;
mod platform;
mod session;
mod stage;
pub mod validator;

pub use aggregator::aggregate;
pub use error::{Error, Result};
pub use interaction::{ChannelInteraction, Decision, ExplainRequest, Interaction, NoInteraction, Prompt};
pub use lifecycle::{HostLifecycle, LifecycleSignal};
pub use orchestrator::{Orchestrator, RequestOptions};
pub use platform::PlatformRequestSurface;
pub use session::{Bucket, RequestReport, RequestSession, SessionId};
pub use stage::{Stage, StageKind, StageState, build_queue, is_dedicated, partition};
pub use validator::ValidationMode;

/// Everything the orchestrator needs from a platform.
pub trait Platform: policy::PlatformQuery + PlatformRequestSurface {}

impl<T: policy::PlatformQuery + PlatformRequestSurface> Platform for T {}
