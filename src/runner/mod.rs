//! # Módulo Runner - Execução de Cenários
//!
//! Executa os steps de um cenário em ordem, sobre um único driver.
//!
//! ## Para todos entenderem:
//!
//! O runner monta o "ambiente" compartilhado pelos steps:
//!
//! 1. Variáveis de `config.variables` (para `${var}` nos params)
//! 2. Política padrão (`config.default_policy`), presa aos limites
//! 3. Prazo do cenário: `scenario_timeout_ms`, nunca acima de `max_execution_time`
//! 4. Orçamento global de retries (`max_retries_total`)
//! 5. Destino dos snapshots de diagnóstico
//!
//! Depois disso, cada step é entregue ao executor que sabe tratá-lo.
//! O primeiro step que falha interrompe o cenário; os seguintes ficam
//! como `skipped` no relatório.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;

use crate::context::{AutomationContext, Variables};
use crate::diagnostics::{DiagnosticSink, NullSink};
use crate::driver::Driver;
use crate::errors::{ErrorCode, FailureKind};
use crate::executors::{default_executors, Session, StepExecutor};
use crate::limits::{ExecutionLimits, RetryCounter};
use crate::protocol::{Scenario, ScenarioReport, Step, StepResult, StepStatus};
use crate::retry::policy::OperationPolicy;
use crate::retry::ResilientExecutor;
use crate::telemetry::instrumentation::ActionSpanContext;

pub struct ScenarioRunner {
    executors: Vec<Box<dyn StepExecutor>>,
    limits: ExecutionLimits,
    sink: Arc<dyn DiagnosticSink>,
}

impl ScenarioRunner {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            executors: default_executors(),
            limits,
            sink: Arc::new(NullSink),
        }
    }

    /// Onde gravar os snapshots de falhas terminais.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Prazo efetivo do cenário.
    pub fn scenario_budget(&self, scenario: &Scenario) -> Duration {
        scenario
            .config
            .scenario_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.limits.max_execution_time)
            .min(self.limits.max_execution_time)
    }

    /// Executa o cenário inteiro e monta o relatório.
    ///
    /// Só retorna `Err` se o cenário não puder nem começar (ex: `base_url` inválida).
    pub async fn run(
        &self,
        scenario: &Scenario,
        driver: &mut dyn Driver,
    ) -> Result<ScenarioReport> {
        let start_time = Utc::now();
        let started = Instant::now();

        let mut variables = Variables::new();
        variables.extend(&scenario.config.variables);

        let base_policy = self.limits.clamp_policy(
            scenario
                .config
                .default_policy
                .as_ref()
                .map(|spec| spec.apply(&OperationPolicy::default()))
                .unwrap_or_default(),
        );

        let base_url = scenario
            .config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .with_context(|| format!("[{}] config.base_url inválida", ErrorCode::INVALID_URL))?;

        let budget = self.scenario_budget(scenario);
        let retries = Arc::new(RetryCounter::new(self.limits.max_retries_total));
        let ctx = AutomationContext::new(scenario.meta.id.clone())
            .with_diagnostics(self.sink.clone())
            .with_retry_budget(retries.clone())
            .with_deadline(tokio::time::Instant::now() + budget);
        let core = ResilientExecutor::new(ctx);

        info!(
            scenario_id = %scenario.meta.id,
            steps = scenario.steps.len(),
            budget_ms = budget.as_millis() as u64,
            "▶️  Iniciando cenário"
        );

        let mut results = Vec::with_capacity(scenario.steps.len());
        let mut halted = false;

        for step in &scenario.steps {
            if halted {
                results.push(StepResult::skipped(&step.id));
                continue;
            }

            let mut session = Session {
                driver: &mut *driver,
                core: &core,
                variables: &variables,
                base_policy: &base_policy,
                base_url: base_url.as_ref(),
                limits: &self.limits,
            };

            let span = info_span!("step", step_id = %step.id, action = %step.action);
            let result = self.run_step(step, &mut session).instrument(span).await;

            if result.status == StepStatus::Failed {
                error!(
                    step_id = %step.id,
                    error = result.error.as_deref().unwrap_or_default(),
                    "❌ Step falhou; steps restantes serão ignorados"
                );
                halted = true;
            } else {
                info!(step_id = %step.id, duration_ms = result.duration_ms, "✅ Step concluído");
            }
            results.push(result);
        }

        let passed = !halted;
        info!(
            scenario_id = %scenario.meta.id,
            passed,
            retries_used = retries.current(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "🏁 Cenário finalizado"
        );

        Ok(ScenarioReport {
            scenario_id: scenario.meta.id.clone(),
            name: scenario.meta.name.clone(),
            status: if passed { "passed" } else { "failed" }.to_string(),
            start_time: start_time.to_rfc3339(),
            end_time: Utc::now().to_rfc3339(),
            retries_used: retries.current(),
            steps: results,
        })
    }

    async fn run_step(&self, step: &Step, session: &mut Session<'_>) -> StepResult {
        let mut span_ctx = ActionSpanContext::new(&step.id, &step.action)
            .with_target(step.target.as_ref().map(|_| step.display_name()));

        let result = if session.core.context().is_expired() {
            warn!(step_id = %step.id, "Prazo do cenário já expirou");
            StepResult::failed(
                &step.id,
                0,
                Some(FailureKind::Timeout),
                format!("[{}] prazo do cenário expirou antes do step", ErrorCode::ACTION_TIMEOUT),
            )
        } else {
            match self.executors.iter().find(|e| e.can_handle(&step.action)) {
                None => StepResult::failed(
                    &step.id,
                    0,
                    None,
                    format!(
                        "[{}] nenhum executor para a action '{}'",
                        ErrorCode::NO_EXECUTOR_FOR_ACTION,
                        step.action
                    ),
                ),
                Some(executor) => {
                    let start = Instant::now();
                    match executor.execute(step, session).await {
                        Ok(result) => result,
                        Err(e) => StepResult::failed(
                            &step.id,
                            start.elapsed().as_millis() as u64,
                            None,
                            format!("{:#}", e),
                        ),
                    }
                }
            }
        };

        span_ctx.finish(&result);
        debug!(attributes = ?span_ctx.attributes(), "Atributos do step");
        result
    }
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new(ExecutionLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::driver::scripted::{ClickEffect, NavigationFailure, ScriptedDriver, ScriptedElement};
    use crate::driver::{DriverError, Strategy};
    use serde_json::json;

    fn scenario(value: serde_json::Value) -> Scenario {
        serde_json::from_value(value).unwrap()
    }

    fn fast_policy() -> serde_json::Value {
        json!({
            "max_retries": 1,
            "timeout_ms": 60,
            "min_timeout_ms": 20,
            "backoff": { "kind": "none" }
        })
    }

    #[tokio::test]
    async fn test_checkout_flow_passes() {
        let scenario = scenario(json!({
            "spec_version": "0.1",
            "meta": { "id": "checkout", "name": "Checkout" },
            "config": {
                "base_url": "https://shop.test",
                "default_policy": fast_policy(),
                "variables": { "coupon": "PROMO10" }
            },
            "steps": [
                { "id": "open", "action": "navigate", "params": { "url": "/cart" } },
                {
                    "id": "coupon", "action": "fill",
                    "target": { "candidates": [
                        { "query": { "by": "test_id", "value": "coupon" } },
                        { "query": { "by": "css", "value": "#coupon" } }
                    ]},
                    "params": { "text": "${coupon}" }
                },
                {
                    "id": "pay", "action": "click",
                    "target": { "name": "botão pagar", "candidates": [
                        { "query": { "by": "css", "value": "#pay" } }
                    ]},
                    "expect": { "url_contains": "/done" }
                }
            ]
        }));

        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("coupon").tag("input").css("#coupon"))
            .with_element(
                ScriptedElement::new("pay")
                    .tag("button")
                    .css("#pay")
                    .on_click(ClickEffect {
                        navigate_to: Some("https://shop.test/done".into()),
                        ..Default::default()
                    }),
            )
            .with_navigation_failure(NavigationFailure {
                url_contains: Some("/cart".into()),
                error: DriverError::Network("ERR_CONNECTION_RESET".into()),
                times: 1,
                unless_wait_until: None,
            });

        let report = ScenarioRunner::default().run(&scenario, &mut driver).await.unwrap();

        assert!(report.passed(), "{:?}", report.steps);
        assert_eq!(report.steps[0].attempts, 2);
        assert_eq!(report.steps[1].matched_rank, Some(1));
        assert_eq!(driver.element_value("coupon"), Some("PROMO10"));
        assert_eq!(report.retries_used, 1);
        assert!(driver.was_called("navigate:https://shop.test/cart:load"));
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_steps_and_snapshots() {
        let scenario = scenario(json!({
            "spec_version": "0.1",
            "meta": { "id": "s", "name": "Falha" },
            "config": { "default_policy": fast_policy() },
            "steps": [
                { "id": "missing", "action": "click",
                  "target": { "candidates": [{ "query": { "by": "css", "value": "#ghost" } }] } },
                { "id": "later", "action": "wait", "params": { "ms": 1 } }
            ]
        }));
        let sink = Arc::new(MemorySink::new());
        let runner = ScenarioRunner::default().with_sink(sink.clone());

        let report = runner.run(&scenario, &mut ScriptedDriver::new()).await.unwrap();

        assert!(!report.passed());
        assert_eq!(report.steps[0].failure, Some(FailureKind::NotFound));
        assert_eq!(report.steps[1].status, StepStatus::Skipped);
        assert_eq!(sink.snapshots().len(), 1);
        assert_eq!(report.retries_used, 1);
    }

    #[tokio::test]
    async fn test_escalation_reported_per_step() {
        let scenario = scenario(json!({
            "spec_version": "0.1",
            "meta": { "id": "s", "name": "Overlay" },
            "config": { "default_policy": fast_policy() },
            "steps": [
                { "id": "save", "action": "click",
                  "target": { "candidates": [{ "query": { "by": "css", "value": "#save" } }] } }
            ]
        }));
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save").css("#save").fail(
                Some(Strategy::Standard),
                DriverError::Intercepted("cookie banner".into()),
                None,
            ),
        );

        let report = ScenarioRunner::default().run(&scenario, &mut driver).await.unwrap();

        assert!(report.passed());
        assert_eq!(report.steps[0].strategy, Some(Strategy::Forced));
        assert!(driver.was_called("click:save:forced"));
    }

    #[tokio::test]
    async fn test_unknown_action_fails_step() {
        let scenario = scenario(json!({
            "spec_version": "0.1",
            "meta": { "id": "s", "name": "Desconhecida" },
            "steps": [{ "id": "x", "action": "hover" }]
        }));

        let report = ScenarioRunner::default()
            .run(&scenario, &mut ScriptedDriver::new())
            .await
            .unwrap();

        assert!(!report.passed());
        assert!(report.steps[0].error.as_deref().unwrap().contains("E5002"));
    }

    #[tokio::test]
    async fn test_scenario_deadline_times_out() {
        let scenario = scenario(json!({
            "spec_version": "0.1",
            "meta": { "id": "s", "name": "Prazo" },
            "config": { "scenario_timeout_ms": 50 },
            "steps": [
                { "id": "long", "action": "wait", "params": { "ms": 2000 } },
                { "id": "after", "action": "wait", "params": { "ms": 1 } }
            ]
        }));

        let report = ScenarioRunner::default()
            .run(&scenario, &mut ScriptedDriver::new())
            .await
            .unwrap();

        assert_eq!(report.steps[0].failure, Some(FailureKind::Timeout));
        assert_eq!(report.steps[1].status, StepStatus::Skipped);
    }

    #[test]
    fn test_budget_never_exceeds_limit() {
        let runner = ScenarioRunner::new(ExecutionLimits::strict());
        let s = scenario(json!({
            "spec_version": "0.1",
            "meta": { "id": "s", "name": "x" },
            "config": { "scenario_timeout_ms": 999_999_999u64 },
            "steps": []
        }));
        assert_eq!(runner.scenario_budget(&s), runner.limits().max_execution_time);
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_an_error() {
        let s = scenario(json!({
            "spec_version": "0.1",
            "meta": { "id": "s", "name": "x" },
            "config": { "base_url": "not a url" },
            "steps": []
        }));
        let err = ScenarioRunner::default().run(&s, &mut ScriptedDriver::new()).await.unwrap_err();
        assert!(err.to_string().contains("E4002"));
    }
}
