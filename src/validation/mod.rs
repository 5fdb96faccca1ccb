//! # Módulo de Validação de Cenários
//!
//! Valida um cenário antes de abrir o browser, para que erros de digitação
//! no arquivo não virem minutos de retries inúteis.
//!
//! ## Para todos entenderem:
//!
//! Antes de despachar uma encomenda, alguém confere o endereço.
//! Este módulo confere o cenário: todos os problemas são coletados e
//! reportados de uma vez, em vez de parar no primeiro.
//!
//! ## Validações realizadas:
//!
//! 1. **spec_version**: versão do formato suportada
//! 2. **Cenário não vazio**: pelo menos um step
//! 3. **IDs**: não vazios e únicos
//! 4. **Actions conhecidas**: click, fill, navigate...
//! 5. **Alvos**: actions de interação precisam de candidatos
//! 6. **Parâmetros**: `fill.text`, `navigate.url`, `press.key`...
//! 7. **Políticas**: backoff não decrescente, estratégias não vazias
//! 8. **Limites**: número de steps e pior caso de retries

use std::collections::HashSet;

use thiserror::Error;

use crate::errors::ErrorCode;
use crate::limits::{validate_limits, ExecutionLimits};
use crate::protocol::{Scenario, Step};
use crate::retry::policy::{OperationPolicy, PolicyError};

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Cenário com spec_version '{version}' não suportada. Versão esperada: {expected}")]
    UnsupportedSpecVersion { version: String, expected: String },

    #[error("Step '{step_id}': action '{action}' não é conhecida. Ações válidas: {}", KNOWN_ACTIONS.join(", "))]
    UnknownAction { step_id: String, action: String },

    #[error("Step '{step_id}': parâmetro obrigatório '{param}' está ausente")]
    MissingParam { step_id: String, param: String },

    #[error("Step '{step_id}': action '{action}' precisa de um alvo com candidatos")]
    MissingTarget { step_id: String, action: String },

    #[error("Step '{step_id}': lista de candidatos vazia em '{field}'")]
    EmptyCandidates { step_id: String, field: String },

    #[error("Step '{step_id}': ID duplicado")]
    DuplicateStepId { step_id: String },

    #[error("Cenário vazio: nenhum step definido")]
    EmptyScenario,

    #[error("Step '{step_id}': ID vazio não é permitido")]
    EmptyStepId { step_id: String },

    #[error("Política inválida em '{location}': {source}")]
    InvalidPolicy {
        location: String,
        #[source]
        source: PolicyError,
    },

    #[error("Limite excedido: {message}")]
    LimitExceeded { message: String },
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedSpecVersion { .. } => ErrorCode::UNSUPPORTED_SPEC_VERSION,
            Self::UnknownAction { .. } => ErrorCode::UNKNOWN_ACTION,
            Self::MissingParam { .. } | Self::MissingTarget { .. } => ErrorCode::MISSING_PARAM,
            Self::EmptyCandidates { .. } => ErrorCode::EMPTY_CANDIDATES,
            Self::DuplicateStepId { .. } | Self::EmptyStepId { .. } => ErrorCode::DUPLICATE_STEP_ID,
            Self::EmptyScenario => ErrorCode::EMPTY_SCENARIO,
            Self::InvalidPolicy { .. } => ErrorCode::INVALID_POLICY,
            Self::LimitExceeded { .. } => ErrorCode::INVALID_SCENARIO_FORMAT,
        }
    }
}

// ============================================================================
// CONSTANTES
// ============================================================================

/// Versão do formato de cenário suportada.
pub const SUPPORTED_SPEC_VERSION: &str = "0.1";

/// Actions que o runner sabe executar (com aliases).
pub const KNOWN_ACTIONS: &[&str] = &[
    "click", "fill", "set_files", "upload", "press", "wait_for", "navigate", "goto", "wait",
    "sleep",
];

/// Actions que operam sobre um alvo.
const TARGETED_ACTIONS: &[&str] = &["click", "fill", "set_files", "upload", "press", "wait_for"];

pub type ValidationResult = Result<(), Vec<ValidationError>>;

// ============================================================================
// FUNÇÃO PRINCIPAL DE VALIDAÇÃO
// ============================================================================

/// Valida um cenário completo, coletando todos os erros.
pub fn validate_scenario(scenario: &Scenario, limits: &ExecutionLimits) -> ValidationResult {
    let mut errors = Vec::new();

    if scenario.spec_version != SUPPORTED_SPEC_VERSION {
        errors.push(ValidationError::UnsupportedSpecVersion {
            version: scenario.spec_version.clone(),
            expected: SUPPORTED_SPEC_VERSION.to_string(),
        });
    }

    if scenario.steps.is_empty() {
        errors.push(ValidationError::EmptyScenario);
        return Err(errors);
    }

    let base_policy = match &scenario.config.default_policy {
        Some(spec) => {
            let policy = spec.apply(&OperationPolicy::default());
            if let Err(source) = policy.validate() {
                errors.push(ValidationError::InvalidPolicy {
                    location: "config.default_policy".to_string(),
                    source,
                });
            }
            policy
        }
        None => OperationPolicy::default(),
    };

    let mut seen = HashSet::new();
    let mut worst_case_retries: u32 = 0;

    for step in &scenario.steps {
        if !step.id.trim().is_empty() && !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId {
                step_id: step.id.clone(),
            });
        }

        let policy = step
            .policy
            .as_ref()
            .map_or_else(|| base_policy.clone(), |spec| spec.apply(&base_policy));
        if step.policy.is_some() {
            if let Err(source) = policy.validate() {
                errors.push(ValidationError::InvalidPolicy {
                    location: format!("steps.{}.policy", step.id),
                    source,
                });
            }
        }
        worst_case_retries = worst_case_retries.saturating_add(worst_case(step, &policy));

        validate_step(step, &mut errors);
    }

    let limit_result = validate_limits(scenario.steps.len(), worst_case_retries, limits);
    for violation in limit_result.violations {
        // Retries são limitados em runtime pelo orçamento global; só steps bloqueiam.
        if violation.limit_name == "max_steps" {
            errors.push(ValidationError::LimitExceeded {
                message: violation.message,
            });
        } else {
            tracing::warn!(
                limit = %violation.limit_name,
                "{}", violation.message
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Retries no pior caso: escalar não ganha tentativas extras.
fn worst_case(step: &Step, policy: &OperationPolicy) -> u32 {
    match step.action.as_str() {
        "navigate" | "goto" => policy.max_retries,
        a if TARGETED_ACTIONS.contains(&a) => policy.max_retries,
        _ => 0,
    }
}

// ============================================================================
// VALIDAÇÃO DE STEP INDIVIDUAL
// ============================================================================

fn validate_step(step: &Step, errors: &mut Vec<ValidationError>) {
    if step.id.trim().is_empty() {
        errors.push(ValidationError::EmptyStepId {
            step_id: "<vazio>".to_string(),
        });
        return;
    }

    let action = step.action.as_str();
    if !KNOWN_ACTIONS.contains(&action) {
        errors.push(ValidationError::UnknownAction {
            step_id: step.id.clone(),
            action: step.action.clone(),
        });
        return;
    }

    if TARGETED_ACTIONS.contains(&action) {
        match &step.target {
            None => errors.push(ValidationError::MissingTarget {
                step_id: step.id.clone(),
                action: step.action.clone(),
            }),
            Some(t) if t.candidates.is_empty() => errors.push(ValidationError::EmptyCandidates {
                step_id: step.id.clone(),
                field: "target".to_string(),
            }),
            Some(_) => {}
        }
    }

    if let Some(expect) = &step.expect {
        let targets = [("expect.visible", &expect.visible), ("expect.hidden", &expect.hidden)];
        for (field, target) in targets {
            if target.as_ref().is_some_and(|t| t.candidates.is_empty()) {
                errors.push(ValidationError::EmptyCandidates {
                    step_id: step.id.clone(),
                    field: field.to_string(),
                });
            }
        }
    }

    match action {
        "fill" => require_str(step, "text", errors),
        "press" => require_str(step, "key", errors),
        "navigate" | "goto" => require_str(step, "url", errors),
        "set_files" | "upload" => validate_files_params(step, errors),
        "wait" | "sleep" => validate_wait_params(step, errors),
        _ => {}
    }
}

// ============================================================================
// VALIDAÇÃO DE PARÂMETROS ESPECÍFICOS
// ============================================================================

fn require_str(step: &Step, param: &str, errors: &mut Vec<ValidationError>) {
    if step.params.get(param).and_then(|v| v.as_str()).is_none() {
        errors.push(ValidationError::MissingParam {
            step_id: step.id.clone(),
            param: param.to_string(),
        });
    }
}

/// `paths` (lista) ou `path` (um arquivo).
fn validate_files_params(step: &Step, errors: &mut Vec<ValidationError>) {
    let has_list = step
        .params
        .get("paths")
        .and_then(|v| v.as_array())
        .is_some_and(|a| !a.is_empty() && a.iter().all(|p| p.is_string()));
    let has_single = step.params.get("path").and_then(|v| v.as_str()).is_some();

    if !has_list && !has_single {
        errors.push(ValidationError::MissingParam {
            step_id: step.id.clone(),
            param: "paths".to_string(),
        });
    }
}

fn validate_wait_params(step: &Step, errors: &mut Vec<ValidationError>) {
    let duration = step
        .params
        .get("duration_ms")
        .or_else(|| step.params.get("ms"))
        .and_then(|v| v.as_u64());
    if duration.is_none() {
        errors.push(ValidationError::MissingParam {
            step_id: step.id.clone(),
            param: "duration_ms".to_string(),
        });
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Candidate, Query};
    use crate::protocol::{Config, ExpectSpec, Meta, TargetSpec};
    use serde_json::json;

    fn scenario(steps: Vec<Step>) -> Scenario {
        Scenario {
            spec_version: SUPPORTED_SPEC_VERSION.to_string(),
            meta: Meta {
                id: "test".to_string(),
                name: "Test Scenario".to_string(),
                description: None,
                tags: vec![],
            },
            config: Config::default(),
            steps,
        }
    }

    fn target(selector: &str) -> Option<TargetSpec> {
        Some(TargetSpec {
            name: None,
            candidates: vec![Candidate::new(Query::css(selector))],
        })
    }

    fn step(id: &str, action: &str, params: serde_json::Value) -> Step {
        Step {
            id: id.to_string(),
            description: None,
            action: action.to_string(),
            target: None,
            requirement: None,
            params,
            policy: None,
            expect: None,
        }
    }

    fn targeted(id: &str, action: &str, params: serde_json::Value) -> Step {
        Step {
            target: target("#x"),
            ..step(id, action, params)
        }
    }

    fn validate(s: &Scenario) -> ValidationResult {
        validate_scenario(s, &ExecutionLimits::default())
    }

    #[test]
    fn test_valid_scenario() {
        let s = scenario(vec![
            step("open", "navigate", json!({ "url": "/login" })),
            targeted("email", "fill", json!({ "text": "a@b.c" })),
            targeted("submit", "click", json!(null)),
            step("pause", "sleep", json!({ "ms": 10 })),
        ]);
        assert!(validate(&s).is_ok());
    }

    #[test]
    fn test_empty_scenario() {
        let errors = validate(&scenario(vec![])).unwrap_err();
        assert!(matches!(errors[0], ValidationError::EmptyScenario));
        assert_eq!(errors[0].code(), ErrorCode::EMPTY_SCENARIO);
    }

    #[test]
    fn test_unknown_action() {
        let errors = validate(&scenario(vec![step("x", "hover", json!(null))])).unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::UnknownAction { action, .. } if action == "hover"
        ));
    }

    #[test]
    fn test_click_without_target() {
        let errors = validate(&scenario(vec![step("c", "click", json!(null))])).unwrap_err();
        assert!(matches!(errors[0], ValidationError::MissingTarget { .. }));
    }

    #[test]
    fn test_empty_candidates() {
        let mut s = targeted("c", "click", json!(null));
        s.target = Some(TargetSpec {
            name: Some("nada".into()),
            candidates: vec![],
        });
        s.expect = Some(ExpectSpec {
            visible: Some(TargetSpec {
                name: None,
                candidates: vec![],
            }),
            ..Default::default()
        });

        let errors = validate(&scenario(vec![s])).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.code() == ErrorCode::EMPTY_CANDIDATES));
    }

    #[test]
    fn test_missing_params() {
        let errors = validate(&scenario(vec![
            targeted("f", "fill", json!({})),
            targeted("p", "press", json!({})),
            step("n", "goto", json!({})),
            targeted("u", "upload", json!({ "paths": [] })),
            step("w", "wait", json!({})),
        ]))
        .unwrap_err();

        let params: Vec<String> = errors
            .iter()
            .filter_map(|e| match e {
                ValidationError::MissingParam { param, .. } => Some(param.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(params, vec!["text", "key", "url", "paths", "duration_ms"]);
    }

    #[test]
    fn test_single_path_upload_is_valid() {
        let s = scenario(vec![targeted("u", "set_files", json!({ "path": "/tmp/a.pdf" }))]);
        assert!(validate(&s).is_ok());
    }

    #[test]
    fn test_duplicate_ids() {
        let errors = validate(&scenario(vec![
            step("a", "wait", json!({ "ms": 1 })),
            step("a", "wait", json!({ "ms": 1 })),
        ]))
        .unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::DuplicateStepId { step_id } if step_id == "a"
        ));
    }

    #[test]
    fn test_empty_step_id() {
        let errors = validate(&scenario(vec![step("  ", "wait", json!({ "ms": 1 }))])).unwrap_err();
        assert!(matches!(errors[0], ValidationError::EmptyStepId { .. }));
    }

    #[test]
    fn test_invalid_step_policy() {
        let mut s = targeted("c", "click", json!(null));
        s.policy = serde_json::from_value(json!({ "strategies": [] })).unwrap();

        let errors = validate(&scenario(vec![s])).unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::InvalidPolicy { source: PolicyError::NoStrategies, .. }
        ));
    }

    #[test]
    fn test_decreasing_default_backoff() {
        let mut s = scenario(vec![step("w", "wait", json!({ "ms": 1 }))]);
        s.config.default_policy = serde_json::from_value(json!({
            "backoff": { "kind": "fixed", "delays_ms": [100, 50] }
        }))
        .unwrap();

        let errors = validate(&s).unwrap_err();
        assert_eq!(errors[0].code(), ErrorCode::INVALID_POLICY);
    }

    #[test]
    fn test_unsupported_spec_version() {
        let mut s = scenario(vec![step("w", "wait", json!({ "ms": 1 }))]);
        s.spec_version = "2.0".to_string();

        let errors = validate(&s).unwrap_err();
        assert!(errors[0].to_string().contains("'2.0'"));
    }

    #[test]
    fn test_retry_worst_case_ignores_strategy_count() {
        let policy = OperationPolicy::default().with_max_retries(2);
        assert_eq!(policy.strategies.len(), 3);

        assert_eq!(worst_case(&targeted("c", "click", json!(null)), &policy), 2);
        assert_eq!(worst_case(&step("o", "navigate", json!({ "url": "/" })), &policy), 2);
        assert_eq!(worst_case(&step("w", "wait", json!({ "ms": 1 })), &policy), 0);
    }

    #[test]
    fn test_step_limit() {
        let steps = (0..11).map(|i| step(&format!("w{}", i), "wait", json!({ "ms": 1 }))).collect();
        let errors = validate_scenario(&scenario(steps), &ExecutionLimits::strict()).unwrap_err();
        assert!(matches!(errors[0], ValidationError::LimitExceeded { .. }));
    }
}
