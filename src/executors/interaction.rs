//! # Executor de Interação - click, fill, set_files, press, wait_for
//!
//! Converte um step com alvo em um `ActionDescriptor` e entrega ao
//! executor resiliente.
//!
//! ## Exemplo no cenário:
//!
//! ```json
//! {
//!   "id": "email",
//!   "action": "fill",
//!   "target": { "name": "campo e-mail", "candidates": [
//!     { "query": { "by": "test_id", "value": "email" } },
//!     { "query": { "by": "placeholder", "value": "seu@email.com" } }
//!   ]},
//!   "params": { "text": "${user_email}" }
//! }
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::protocol::{Step, StepResult};
use crate::retry::outcome::{Action, ActionDescriptor};

use super::{Session, StepExecutor};

#[derive(Debug, Default, Deserialize)]
struct InteractionParams {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    paths: Vec<PathBuf>,
    #[serde(default)]
    path: Option<PathBuf>,
}

pub struct InteractionExecutor;

impl InteractionExecutor {
    pub fn new() -> Self {
        Self
    }

    fn action(step: &Step, params: InteractionParams) -> Result<Action> {
        let missing = |p: &str| {
            anyhow!("Step '{}': parâmetro '{}' ausente para {}", step.id, p, step.action)
        };

        Ok(match step.action.as_str() {
            "click" => Action::Click,
            "fill" => Action::Fill {
                text: params.text.ok_or_else(|| missing("text"))?,
            },
            "press" => Action::Press {
                key: params.key.ok_or_else(|| missing("key"))?,
            },
            "set_files" | "upload" => {
                let mut paths = params.paths;
                paths.extend(params.path);
                if paths.is_empty() {
                    return Err(missing("paths"));
                }
                Action::SetFiles { paths }
            }
            "wait_for" => Action::WaitFor,
            other => return Err(anyhow!("Action '{}' não é de interação", other)),
        })
    }

    fn descriptor(step: &Step, session: &Session<'_>) -> Result<ActionDescriptor> {
        let params = if step.params.is_null() {
            InteractionParams::default()
        } else {
            let value = session.variables.interpolate_value(&step.params)?;
            serde_json::from_value(value)
                .with_context(|| format!("Parâmetros inválidos para {}", step.action))?
        };

        let target = step
            .target
            .as_ref()
            .ok_or_else(|| {
                anyhow!("Step '{}': action '{}' precisa de um alvo", step.id, step.action)
            })?
            .to_list(step.display_name())?;

        let mut descriptor = ActionDescriptor::new(Self::action(step, params)?, target);
        if let Some(requirement) = step.requirement {
            descriptor = descriptor.requiring(requirement);
        }
        if let Some(expect) = &step.expect {
            for condition in expect.to_post_conditions(&step.id)? {
                descriptor = descriptor.expect(condition);
            }
        }
        Ok(descriptor)
    }
}

impl Default for InteractionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for InteractionExecutor {
    fn can_handle(&self, action: &str) -> bool {
        matches!(
            action,
            "click" | "fill" | "set_files" | "upload" | "press" | "wait_for"
        )
    }

    #[instrument(skip(self, session), fields(step_id = %step.id, action = %step.action))]
    async fn execute(&self, step: &Step, session: &mut Session<'_>) -> Result<StepResult> {
        let start = Instant::now();
        let descriptor = Self::descriptor(step, session)?;
        let policy = session.policy_for(step);

        let outcome = session
            .core
            .execute(&mut *session.driver, &descriptor, &policy)
            .await;

        info!(
            step_id = %step.id,
            operation = %descriptor.label(),
            success = outcome.is_success(),
            attempts = outcome.attempts(),
            "Interação concluída"
        );

        Ok(StepResult::from_outcome(
            &step.id,
            start.elapsed().as_millis() as u64,
            outcome,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::{ScriptedDriver, ScriptedElement};
    use crate::driver::Strategy;
    use crate::errors::FailureKind;
    use crate::executors::test_support::{step, Harness};
    use crate::protocol::StepStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_click_step_passes() {
        let harness = Harness::new();
        let mut driver = ScriptedDriver::new().with_element(ScriptedElement::new("ok").css("#ok"));

        let result = InteractionExecutor::new()
            .execute(
                &step("c", "click", Some("#ok"), json!(null)),
                &mut harness.session(&mut driver),
            )
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Passed);
        assert_eq!(result.matched_rank, Some(0));
        assert_eq!(result.strategy, Some(Strategy::Standard));
        assert!(driver.was_called("click:ok:standard"));
    }

    #[tokio::test]
    async fn test_fill_interpolates_variables() {
        let mut harness = Harness::new();
        harness.variables.set("email", json!("ana@example.com"));
        let mut driver =
            ScriptedDriver::new().with_element(ScriptedElement::new("e").tag("input").css("#e"));

        let result = InteractionExecutor::new()
            .execute(
                &step("f", "fill", Some("#e"), json!({ "text": "${email}" })),
                &mut harness.session(&mut driver),
            )
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Passed);
        assert_eq!(driver.element_value("e"), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn test_upload_accepts_single_path() {
        let harness = Harness::new();
        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("file").tag("input").css("#file").hidden());

        let result = InteractionExecutor::new()
            .execute(
                &step("u", "upload", Some("#file"), json!({ "path": "/tmp/nota.pdf" })),
                &mut harness.session(&mut driver),
            )
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Passed);
        assert_eq!(driver.element_files("file").unwrap(), &[PathBuf::from("/tmp/nota.pdf")]);
    }

    #[tokio::test]
    async fn test_missing_target_fails_step() {
        let harness = Harness::new();
        let mut driver = ScriptedDriver::new();

        let result = InteractionExecutor::new()
            .execute(
                &step("c", "click", Some("#nope"), json!(null)),
                &mut harness.session(&mut driver),
            )
            .await
            .unwrap();

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::NotFound));
        assert_eq!(result.attempts, 2);
        assert!(result.error.unwrap().contains("E2001"));
    }

    #[tokio::test]
    async fn test_missing_text_is_an_error() {
        let harness = Harness::new();
        let mut driver = ScriptedDriver::new();

        let result = InteractionExecutor::new()
            .execute(&step("f", "fill", Some("#e"), json!({})), &mut harness.session(&mut driver))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_can_handle() {
        let executor = InteractionExecutor::new();
        assert!(executor.can_handle("upload"));
        assert!(executor.can_handle("wait_for"));
        assert!(!executor.can_handle("navigate"));
    }
}
