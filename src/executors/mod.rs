// Module: Executors
// Maps scenario steps (click, fill, navigate, wait...) onto resilient operations.

pub mod interaction;
pub mod navigation;
pub mod wait;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::context::Variables;
use crate::driver::Driver;
use crate::limits::ExecutionLimits;
use crate::protocol::{Step, StepResult};
use crate::retry::policy::OperationPolicy;
use crate::retry::ResilientExecutor;

/// Everything a step needs while it runs: the live driver, the resilient
/// core, scenario variables and the inherited policy.
pub struct Session<'a> {
    pub driver: &'a mut dyn Driver,
    pub core: &'a ResilientExecutor,
    pub variables: &'a Variables,
    pub base_policy: &'a OperationPolicy,
    pub base_url: Option<&'a Url>,
    pub limits: &'a ExecutionLimits,
}

impl Session<'_> {
    /// Step policy over the scenario default, clamped to the limits.
    pub fn policy_for(&self, step: &Step) -> OperationPolicy {
        let policy = match &step.policy {
            Some(spec) => spec.apply(self.base_policy),
            None => self.base_policy.clone(),
        };
        self.limits.clamp_policy(policy)
    }
}

/// Contract for any step executor.
///
/// Returning `Err` means the step itself is malformed (missing params, bad URL).
/// Operational failures come back as a failed `StepResult`.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Checks if this executor is responsible for the given action.
    fn can_handle(&self, action: &str) -> bool;

    async fn execute(&self, step: &Step, session: &mut Session<'_>) -> Result<StepResult>;
}

/// Executors for every known action.
pub fn default_executors() -> Vec<Box<dyn StepExecutor>> {
    vec![
        Box::new(navigation::NavigationExecutor::new()),
        Box::new(interaction::InteractionExecutor::new()),
        Box::new(wait::WaitExecutor::new()),
    ]
}
