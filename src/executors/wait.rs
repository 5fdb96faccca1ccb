//! # Executor Wait/Sleep - Pausas Fixas
//!
//! Pausa a execução do cenário por um tempo fixo.
//!
//! ## Actions suportadas:
//! - `wait` - Pausa a execução pelo tempo especificado
//! - `sleep` - Alias de `wait`
//!
//! Para esperar um elemento aparecer, prefira `wait_for`, que usa os
//! candidatos e a política de retry.
//!
//! ## Exemplo no cenário:
//!
//! ```json
//! { "id": "debounce", "action": "wait", "params": { "duration_ms": 300 } }
//! ```
//!
//! A pausa nunca ultrapassa o prazo do cenário. Se o prazo vencer no meio
//! da pausa, o step falha com `timeout`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout_at};
use tracing::{info, instrument, warn};

use crate::errors::{ErrorCode, FailureKind};
use crate::protocol::{Step, StepResult};

use super::{Session, StepExecutor};

// ============================================================================
// PARÂMETROS DO WAIT
// ============================================================================

/// Parâmetros da ação `wait`/`sleep`.
///
/// ## Formatos aceitos:
/// - `{ "duration_ms": 1000 }` - Formato canônico
/// - `{ "ms": 1000 }` - Alias mais curto
///
/// Se ambos forem fornecidos, `duration_ms` tem precedência.
#[derive(Debug, Deserialize)]
struct WaitParams {
    #[serde(default)]
    duration_ms: Option<u64>,

    #[serde(default)]
    ms: Option<u64>,
}

impl WaitParams {
    fn get_duration(&self) -> Option<u64> {
        self.duration_ms.or(self.ms)
    }
}

// ============================================================================
// WAIT EXECUTOR
// ============================================================================

pub struct WaitExecutor;

impl WaitExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WaitExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for WaitExecutor {
    fn can_handle(&self, action: &str) -> bool {
        action == "wait" || action == "sleep"
    }

    #[instrument(skip(self, session), fields(step_id = %step.id, duration_ms))]
    async fn execute(&self, step: &Step, session: &mut Session<'_>) -> Result<StepResult> {
        let start = Instant::now();

        let params: WaitParams = serde_json::from_value(step.params.clone()).map_err(|e| {
            anyhow!(
                "Parâmetros inválidos para {}: {}. Esperado: {{ \"duration_ms\": <número> }} ou {{ \"ms\": <número> }}",
                step.action,
                e
            )
        })?;

        let duration_ms = params.get_duration().ok_or_else(|| {
            anyhow!(
                "Parâmetros incompletos para {}: forneça 'duration_ms' ou 'ms'",
                step.action
            )
        })?;

        tracing::Span::current().record("duration_ms", duration_ms);
        info!(step_id = %step.id, duration_ms, "⏳ Aguardando...");

        let pause = sleep(Duration::from_millis(duration_ms));
        let completed = match session.core.context().deadline {
            Some(deadline) => timeout_at(deadline, pause).await.is_ok(),
            None => {
                pause.await;
                true
            }
        };

        let elapsed = start.elapsed().as_millis() as u64;
        if !completed {
            warn!(
                step_id = %step.id,
                elapsed_ms = elapsed,
                "Prazo do cenário venceu durante a pausa"
            );
            return Ok(StepResult::failed(
                &step.id,
                elapsed,
                Some(FailureKind::Timeout),
                format!(
                    "[{}] prazo do cenário expirou durante '{}'",
                    ErrorCode::ACTION_TIMEOUT,
                    step.action
                ),
            ));
        }

        info!(step_id = %step.id, actual_duration_ms = elapsed, "✅ Wait concluído");
        Ok(StepResult::passed(&step.id, elapsed))
    }
}

// ============================================================================
// TESTES
// ============================================================================
