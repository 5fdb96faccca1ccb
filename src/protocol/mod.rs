//! # Formato de Cenário
//!
//! Um cenário é uma sequência de steps de UI. Cada step nomeia uma action
//! (`click`, `fill`, `navigate`...), um alvo descrito por candidatos e,
//! opcionalmente, uma política própria.
//!
//! ```json
//! {
//!   "spec_version": "0.1",
//!   "meta": { "id": "checkout", "name": "Checkout com cupom" },
//!   "config": {
//!     "base_url": "https://shop.test",
//!     "scenario_timeout_ms": 60000,
//!     "default_policy": { "max_retries": 2 }
//!   },
//!   "steps": [
//!     { "id": "open", "action": "navigate", "params": { "url": "/cart" } },
//!     {
//!       "id": "apply",
//!       "action": "click",
//!       "target": {
//!         "name": "botão aplicar cupom",
//!         "candidates": [
//!           { "query": { "by": "test_id", "value": "apply-coupon" } },
//!           { "query": { "by": "role", "value": { "role": "button", "name": "Aplicar" } } }
//!         ]
//!       },
//!       "expect": { "visible": { "candidates": [{ "query": { "by": "css", "value": ".coupon-ok" } }] } }
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candidate::{Candidate, CandidateError, CandidateList};
use crate::driver::{Requirement, Strategy};
use crate::errors::FailureKind;
use crate::retry::outcome::{AttemptRecord, OperationOutcome, PostCondition};
use crate::retry::policy::PolicySpec;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    pub spec_version: String,
    pub meta: Meta,
    #[serde(default)]
    pub config: Config,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Meta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Base para URLs relativas de `navigate`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Política herdada por todos os steps.
    #[serde(default)]
    pub default_policy: Option<PolicySpec>,
    /// Prazo do cenário; limitado por `RUNNER_MAX_EXECUTION_SECS`.
    #[serde(default)]
    pub scenario_timeout_ms: Option<u64>,
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

/// Alvo de um step: nome lógico + candidatos em ordem de prioridade.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub candidates: Vec<Candidate>,
}

impl TargetSpec {
    pub fn to_list(&self, fallback_name: &str) -> Result<CandidateList, CandidateError> {
        let name = self.name.as_deref().unwrap_or(fallback_name);
        CandidateList::new(name, self.candidates.clone())
    }
}

/// Estado esperado depois da action.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ExpectSpec {
    #[serde(default)]
    pub url_contains: Option<String>,
    #[serde(default)]
    pub visible: Option<TargetSpec>,
    #[serde(default)]
    pub hidden: Option<TargetSpec>,
}

impl ExpectSpec {
    pub fn to_post_conditions(&self, step_id: &str) -> Result<Vec<PostCondition>, CandidateError> {
        let mut conditions = Vec::new();
        if let Some(fragment) = &self.url_contains {
            conditions.push(PostCondition::UrlContains(fragment.clone()));
        }
        if let Some(target) = &self.visible {
            conditions.push(PostCondition::Visible(
                target.to_list(&format!("{} (visível)", step_id))?,
            ));
        }
        if let Some(target) = &self.hidden {
            conditions.push(PostCondition::Hidden(
                target.to_list(&format!("{} (oculto)", step_id))?,
            ));
        }
        Ok(conditions)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub action: String,
    #[serde(default)]
    pub target: Option<TargetSpec>,
    /// Sobrescreve o requisito padrão da action.
    #[serde(default)]
    pub requirement: Option<Requirement>,
    #[serde(default)]
    pub params: Value,
    /// Campos ausentes herdam de `config.default_policy`.
    #[serde(default)]
    pub policy: Option<PolicySpec>,
    #[serde(default)]
    pub expect: Option<ExpectSpec>,
}

impl Step {
    /// Nome usado nas mensagens quando o alvo não tem nome.
    pub fn display_name(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptRecord>,
}

impl StepResult {
    pub fn passed(step_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Passed,
            duration_ms,
            attempts: 1,
            strategy: None,
            matched_rank: None,
            failure: None,
            error: None,
            snapshot: None,
            history: Vec::new(),
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        duration_ms: u64,
        failure: Option<FailureKind>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: StepStatus::Failed,
            failure,
            error: Some(error.into()),
            attempts: 0,
            ..Self::passed(step_id, duration_ms)
        }
    }

    pub fn skipped(step_id: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            attempts: 0,
            ..Self::passed(step_id, 0)
        }
    }

    /// Resultado de um step a partir do desfecho da operação resiliente.
    pub fn from_outcome(
        step_id: impl Into<String>,
        duration_ms: u64,
        outcome: OperationOutcome,
    ) -> Self {
        let attempts = outcome.attempts();
        match outcome {
            OperationOutcome::Succeeded(s) => Self {
                attempts,
                strategy: s.strategy,
                matched_rank: s.rank,
                history: s.history,
                ..Self::passed(step_id, duration_ms)
            },
            OperationOutcome::Failed(f) => {
                let step_id = step_id.into();
                let message = f.to_structured().with_step_id(step_id.as_str()).user_message();
                Self {
                    attempts,
                    strategy: f.strategies_tried.last().copied(),
                    snapshot: f.snapshot,
                    history: f.history,
                    ..Self::failed(step_id, duration_ms, Some(f.kind), message)
                }
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario_id: String,
    pub name: String,
    /// "passed" | "failed"
    pub status: String,
    pub start_time: String,
    pub end_time: String,
    pub retries_used: u32,
    pub steps: Vec<StepResult>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.status == "passed"
    }
}
