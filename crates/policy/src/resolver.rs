//! The version-policy resolver.
//!
//! An explicit, ordered chain of [`RuleSet`]s, newest first. Each node
//! carries a fallback pointer to the next older node. Resolution starts at
//! the newest node whose threshold the runtime reaches and walks fallbacks
//! until a node handles the operation; the baseline answers anything left.
//! The first node that handles an operation owns the whole answer.

use crate::rules::{Baseline, Operation, Rule, RuleSet, V6, V8, V9, V10, V11, V12, V13};
use crate::{
    ApiLevel, Capability, Error, PlatformQuery, RemediationTarget, ResolutionContext, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Tri-state answer for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityOutcome {
    Granted,
    DeniedRetryable,
    DeniedPermanently,
}

impl CapabilityOutcome {
    pub fn is_granted(self) -> bool {
        matches!(self, CapabilityOutcome::Granted)
    }
}

impl fmt::Display for CapabilityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CapabilityOutcome::Granted => "granted",
            CapabilityOutcome::DeniedRetryable => "denied",
            CapabilityOutcome::DeniedPermanently => "permanently denied",
        })
    }
}

#[derive(Debug)]
struct Node {
    rules: Box<dyn RuleSet>,
    fallback: Option<usize>,
}

/// Which rule set answered an operation, and with what rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub rule_set: &'static str,
    pub rule: Rule,
}

enum Verdict {
    Flag(bool),
    Target(RemediationTarget),
}

/// Answers grant, refusal and remediation questions for one capability.
///
/// Pure: every answer is a function of the capability, the operation, the
/// [`ResolutionContext`] and what the [`PlatformQuery`] reports at call time.
#[derive(Debug)]
pub struct Resolver {
    chain: Vec<Node>,
    baseline: Box<dyn RuleSet>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// The standard chain: 13, 12, 11, 10, 9, 8, 6, then baseline.
    pub fn new() -> Self {
        Self::with_rule_sets(
            vec![
                Box::new(V13),
                Box::new(V12),
                Box::new(V11),
                Box::new(V10),
                Box::new(V9),
                Box::new(V8),
                Box::new(V6),
            ],
            Box::new(Baseline),
        )
    }

    /// Build a chain from rule sets ordered newest first.
    ///
    /// Each node falls back to the one after it; the last falls back to
    /// `baseline`.
    pub fn with_rule_sets(rule_sets: Vec<Box<dyn RuleSet>>, baseline: Box<dyn RuleSet>) -> Self {
        let len = rule_sets.len();
        let chain = rule_sets
            .into_iter()
            .enumerate()
            .map(|(index, rules)| Node {
                rules,
                fallback: (index + 1 < len).then_some(index + 1),
            })
            .collect();
        Self { chain, baseline }
    }

    /// Rule set names and thresholds, newest first.
    pub fn thresholds(&self) -> Vec<(&'static str, ApiLevel)> {
        self.chain
            .iter()
            .map(|node| (node.rules.name(), node.rules.threshold()))
            .chain(std::iter::once((
                self.baseline.name(),
                self.baseline.threshold(),
            )))
            .collect()
    }

    fn entry(&self, runtime: ApiLevel) -> Option<usize> {
        self.chain
            .iter()
            .position(|node| node.rules.threshold() <= runtime)
    }

    /// Find the rule that answers `op` for `capability`.
    pub fn resolve(
        &self,
        capability: Capability,
        op: Operation,
        ctx: &ResolutionContext,
    ) -> Result<Resolution> {
        let mut cursor = self.entry(ctx.runtime);
        while let Some(index) = cursor {
            let node = &self.chain[index];
            if let Some(rule) = node.rules.rule(capability, op, ctx) {
                return Self::checked(node.rules.name(), rule, capability, op);
            }
            cursor = node.fallback;
        }
        let rule = self
            .baseline
            .rule(capability, op, ctx)
            .ok_or(Error::Inconsistent {
                capability,
                operation: op,
                rule_set: self.baseline.name(),
            })?;
        Self::checked(self.baseline.name(), rule, capability, op)
    }

    fn checked(
        rule_set: &'static str,
        rule: Rule,
        capability: Capability,
        op: Operation,
    ) -> Result<Resolution> {
        if rule.answers() != op {
            return Err(Error::Inconsistent {
                capability,
                operation: op,
                rule_set,
            });
        }
        Ok(Resolution { rule_set, rule })
    }

    fn evaluate(
        &self,
        capability: Capability,
        op: Operation,
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<Verdict> {
        let Resolution { rule_set, rule } = self.resolve(capability, op, ctx)?;
        trace!(%capability, %op, rule_set, ?rule, "resolved rule");

        let prompted =
            |c: Capability| !platform.is_granted(c) && !platform.should_show_rationale(c);

        let verdict = match rule {
            Rule::Direct => Verdict::Flag(platform.is_granted(capability)),
            Rule::AutoGranted => Verdict::Flag(true),
            Rule::Proxy(other) => Verdict::Flag(self.is_granted(other, ctx, platform)?),
            Rule::AllOf(others) => Verdict::Flag(self.all_granted(others, ctx, platform)?),
            Rule::AnyOf(others) => Verdict::Flag(self.any_granted(others, ctx, platform)?),
            Rule::Probe(probe) => Verdict::Flag(platform.probe(probe)),
            Rule::Gated(probe, others) => {
                Verdict::Flag(platform.probe(probe) && self.all_granted(others, ctx, platform)?)
            }
            Rule::CompanionAnd(companions) => Verdict::Flag(
                self.any_granted(companions, ctx, platform)? && platform.is_granted(capability),
            ),

            Rule::NeverRefused => Verdict::Flag(false),
            Rule::Prompted => Verdict::Flag(prompted(capability)),
            Rule::ProxyRefused(other) => Verdict::Flag(prompted(other)),
            Rule::CompanionRefused(companions) => {
                if self.any_granted(companions, ctx, platform)? {
                    Verdict::Flag(prompted(capability))
                } else {
                    Verdict::Flag(
                        companions
                            .iter()
                            .all(|c| !platform.should_show_rationale(*c)),
                    )
                }
            }
            Rule::GatedPrompt(companions) => Verdict::Flag(
                self.any_granted(companions, ctx, platform)? && prompted(capability),
            ),

            Rule::Settings(actions) => Verdict::Target(
                actions
                    .iter()
                    .map(|action| RemediationTarget::settings(*action))
                    .find(|target| platform.can_request_special(target))
                    .unwrap_or(RemediationTarget::AppDetails),
            ),
            Rule::AppDetails => Verdict::Target(RemediationTarget::AppDetails),
        };
        Ok(verdict)
    }

    fn flag(
        &self,
        capability: Capability,
        op: Operation,
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<bool> {
        match self.evaluate(capability, op, ctx, platform)? {
            Verdict::Flag(flag) => Ok(flag),
            Verdict::Target(_) => Err(Error::Inconsistent {
                capability,
                operation: op,
                rule_set: "evaluate",
            }),
        }
    }

    /// Whether `capability` is currently granted.
    pub fn is_granted(
        &self,
        capability: Capability,
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<bool> {
        self.flag(capability, Operation::IsGranted, ctx, platform)
    }

    /// Whether the platform will never prompt for `capability` again.
    ///
    /// A granted capability is never reported refused.
    pub fn is_permanently_refused(
        &self,
        capability: Capability,
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<bool> {
        if self.is_granted(capability, ctx, platform)? {
            return Ok(false);
        }
        self.flag(capability, Operation::IsPermanentlyRefused, ctx, platform)
    }

    /// Where the user must go to fix `capability`.
    pub fn remediation_target(
        &self,
        capability: Capability,
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<RemediationTarget> {
        match self.evaluate(capability, Operation::RemediationTarget, ctx, platform)? {
            Verdict::Target(target) => Ok(target),
            Verdict::Flag(_) => Err(Error::Inconsistent {
                capability,
                operation: Operation::RemediationTarget,
                rule_set: "evaluate",
            }),
        }
    }

    /// Tri-state outcome for `capability`.
    pub fn outcome(
        &self,
        capability: Capability,
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<CapabilityOutcome> {
        if self.is_granted(capability, ctx, platform)? {
            Ok(CapabilityOutcome::Granted)
        } else if self.flag(capability, Operation::IsPermanentlyRefused, ctx, platform)? {
            Ok(CapabilityOutcome::DeniedPermanently)
        } else {
            Ok(CapabilityOutcome::DeniedRetryable)
        }
    }

    /// Whether every capability in `capabilities` is granted.
    pub fn all_granted(
        &self,
        capabilities: &[Capability],
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<bool> {
        for capability in capabilities {
            if !self.is_granted(*capability, ctx, platform)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any_granted(
        &self,
        capabilities: &[Capability],
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<bool> {
        for capability in capabilities {
            if self.is_granted(*capability, ctx, platform)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The granted subset of `capabilities`, order preserved.
    pub fn granted_of(
        &self,
        capabilities: &[Capability],
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<Vec<Capability>> {
        self.partition(capabilities, ctx, platform, true)
    }

    /// The denied subset of `capabilities`, order preserved.
    pub fn denied_of(
        &self,
        capabilities: &[Capability],
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<Vec<Capability>> {
        self.partition(capabilities, ctx, platform, false)
    }

    fn partition(
        &self,
        capabilities: &[Capability],
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
        granted: bool,
    ) -> Result<Vec<Capability>> {
        let mut out = Vec::new();
        for capability in capabilities {
            if self.is_granted(*capability, ctx, platform)? == granted {
                out.push(*capability);
            }
        }
        Ok(out)
    }

    /// The permanently refused subset of `capabilities`.
    pub fn permanently_refused_of(
        &self,
        capabilities: &[Capability],
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<Vec<Capability>> {
        let mut out = Vec::new();
        for capability in capabilities {
            if self.is_permanently_refused(*capability, ctx, platform)? {
                out.push(*capability);
            }
        }
        Ok(out)
    }

    /// Whether any of `capabilities` is a settings-surface capability.
    pub fn contains_special(capabilities: &[Capability]) -> bool {
        capabilities.iter().any(|c| c.is_special())
    }

    /// One remediation target covering a group of capabilities.
    ///
    /// A lone capability gets its own target. The all-files trio (manager
    /// plus legacy read and write) on 11+ goes to the manager screen.
    /// Anything else, including groups with no settings-surface capability,
    /// goes to app details.
    pub fn smart_remediation_target(
        &self,
        capabilities: &[Capability],
        ctx: &ResolutionContext,
        platform: &dyn PlatformQuery,
    ) -> Result<RemediationTarget> {
        if !Self::contains_special(capabilities) {
            return Ok(RemediationTarget::AppDetails);
        }
        match capabilities {
            [only] => self.remediation_target(*only, ctx, platform),
            [_, _, _]
                if ctx.runtime_at_least(ApiLevel::ANDROID_11)
                    && [
                        Capability::ManageExternalStorage,
                        Capability::ReadExternalStorage,
                        Capability::WriteExternalStorage,
                    ]
                    .iter()
                    .all(|c| capabilities.contains(c)) =>
            {
                self.remediation_target(Capability::ManageExternalStorage, ctx, platform)
            }
            _ => Ok(RemediationTarget::AppDetails),
        }
    }
}
