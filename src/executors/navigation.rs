//! # Executor de Navegação - navigate / goto
//!
//! URLs relativas são resolvidas contra `config.base_url`.
//! Cada retry usa uma condição wait-until mais forte.
//!
//! ```json
//! { "id": "open", "action": "navigate", "params": { "url": "/checkout" } }
//! ```

use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, instrument};
use url::Url;

use crate::errors::ErrorCode;
use crate::protocol::{Step, StepResult};

use super::{Session, StepExecutor};

pub struct NavigationExecutor;

impl NavigationExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NavigationExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `raw` como URL absoluta, usando `base` para caminhos relativos.
pub fn resolve_url(raw: &str, base: Option<&Url>) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| {
                anyhow!(
                    "[{}] URL relativa '{}' sem config.base_url",
                    ErrorCode::INVALID_URL,
                    raw
                )
            })?;
            base.join(raw)
                .map_err(|e| anyhow!("[{}] URL '{}' inválida: {}", ErrorCode::INVALID_URL, raw, e))
        }
        Err(e) => Err(anyhow!("[{}] URL '{}' inválida: {}", ErrorCode::INVALID_URL, raw, e)),
    }
}

#[async_trait]
impl StepExecutor for NavigationExecutor {
    fn can_handle(&self, action: &str) -> bool {
        action == "navigate" || action == "goto"
    }

    #[instrument(skip(self, session), fields(step_id = %step.id))]
    async fn execute(&self, step: &Step, session: &mut Session<'_>) -> Result<StepResult> {
        let start = Instant::now();

        let raw = step
            .params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Step '{}': parâmetro 'url' ausente", step.id))?;
        let url = resolve_url(&session.variables.interpolate_str(raw)?, session.base_url)?;
        let policy = session.policy_for(step);

        let outcome = session
            .core
            .navigate(&mut *session.driver, url.as_str(), &policy)
            .await;

        info!(
            step_id = %step.id,
            url = %session.variables.redacted(raw),
            success = outcome.is_success(),
            attempts = outcome.attempts(),
            "Navegação concluída"
        );

        Ok(StepResult::from_outcome(
            &step.id,
            start.elapsed().as_millis() as u64,
            outcome,
        ))
    }
}
