//! Política de uma operação resiliente.
//!
//! Tratada como valor: construída por chamada, nunca alterada depois.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::{LoadState, Strategy};

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MIN_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_TIMEOUT_SHRINK: f64 = 0.75;
pub const DEFAULT_BACKOFF_MS: u64 = 500;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5_000;

/// Agenda de espera entre tentativas: índice do retry → duração.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffSchedule {
    /// Sem espera.
    None,
    /// Lista explícita em ms; o último valor se repete.
    Fixed { delays_ms: Vec<u64> },
    /// `base_ms * factor^n`, limitado a `max_ms`.
    Exponential {
        base_ms: u64,
        factor: f64,
        max_ms: u64,
    },
}

impl BackoffSchedule {
    pub fn exponential(base: Duration, factor: f64, max: Duration) -> Self {
        Self::Exponential {
            base_ms: base.as_millis() as u64,
            factor,
            max_ms: max.as_millis() as u64,
        }
    }

    pub fn fixed(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self::Fixed {
            delays_ms: delays.into_iter().map(|d| d.as_millis() as u64).collect(),
        }
    }

    /// Espera antes do retry de índice `retry` (0 = primeiro retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let ms = match self {
            Self::None => 0,
            Self::Fixed { delays_ms } => delays_ms
                .get(retry as usize)
                .or_else(|| delays_ms.last())
                .copied()
                .unwrap_or(0),
            Self::Exponential {
                base_ms,
                factor,
                max_ms,
            } => {
                let raw = *base_ms as f64 * factor.powi(retry.min(i32::MAX as u32) as i32);
                if raw.is_finite() {
                    (raw as u64).min(*max_ms)
                } else {
                    *max_ms
                }
            }
        };
        Duration::from_millis(ms)
    }

    /// Durações não decrescentes ao longo da agenda.
    pub fn is_monotonic(&self) -> bool {
        match self {
            Self::None => true,
            Self::Fixed { delays_ms } => delays_ms.windows(2).all(|w| w[0] <= w[1]),
            Self::Exponential { factor, .. } => *factor >= 1.0,
        }
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::Exponential {
            base_ms: DEFAULT_BACKOFF_MS,
            factor: DEFAULT_BACKOFF_FACTOR,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("a política precisa de pelo menos uma estratégia")]
    NoStrategies,

    #[error("a escada de wait-until não pode ser vazia")]
    NoWaitConditions,

    #[error("agenda de backoff decrescente")]
    DecreasingBackoff,

    #[error("fator de redução de timeout {0} fora de (0, 1]")]
    InvalidShrink(f64),

    #[error("timeout zero")]
    ZeroTimeout,
}

/// Configuração de uma ação resiliente.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationPolicy {
    /// Retries da operação (tentativas = max_retries + 1, com escalonamento incluso).
    pub max_retries: u32,
    /// Timeout da primeira tentativa.
    pub timeout: Duration,
    /// Multiplicador aplicado ao timeout a cada nova tentativa.
    pub timeout_shrink: f64,
    /// Piso do timeout reduzido.
    pub min_timeout: Duration,
    pub backoff: BackoffSchedule,
    /// Ordem de escalonamento.
    pub strategies: Vec<Strategy>,
    /// Condições de navegação, da mais fraca para a mais forte.
    pub wait_until: Vec<LoadState>,
}

impl Default for OperationPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            timeout_shrink: DEFAULT_TIMEOUT_SHRINK,
            min_timeout: Duration::from_millis(DEFAULT_MIN_TIMEOUT_MS),
            backoff: BackoffSchedule::default(),
            strategies: Strategy::ESCALATION.to_vec(),
            wait_until: LoadState::LADDER.to_vec(),
        }
    }
}

impl OperationPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    pub fn with_timeout_shrink(mut self, factor: f64) -> Self {
        self.timeout_shrink = factor;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_wait_until(mut self, ladder: Vec<LoadState>) -> Self {
        self.wait_until = ladder;
        self
    }

    /// Tentativas permitidas na operação inteira, somando todas as estratégias.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Timeout da tentativa `attempt` (1 = primeira), nunca crescente.
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = if self.timeout_shrink.is_finite() {
            self.timeout_shrink.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let shrunk = self.timeout.mul_f64(factor.powi(exponent));
        shrunk.max(self.min_timeout).min(self.timeout)
    }

    /// Condição wait-until da tentativa de navegação `attempt` (1 = primeira).
    pub fn wait_until_for(&self, attempt: u32) -> LoadState {
        let idx = (attempt.saturating_sub(1) as usize).min(self.wait_until.len().saturating_sub(1));
        self.wait_until.get(idx).copied().unwrap_or(LoadState::Load)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.strategies.is_empty() {
            return Err(PolicyError::NoStrategies);
        }
        if self.wait_until.is_empty() {
            return Err(PolicyError::NoWaitConditions);
        }
        if !self.backoff.is_monotonic() {
            return Err(PolicyError::DecreasingBackoff);
        }
        if !(self.timeout_shrink > 0.0 && self.timeout_shrink <= 1.0) {
            return Err(PolicyError::InvalidShrink(self.timeout_shrink));
        }
        if self.timeout.is_zero() {
            return Err(PolicyError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Forma serializável de uma política, usada nos arquivos de cenário.
///
/// Campos ausentes herdam da política base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub min_timeout_ms: Option<u64>,
    #[serde(default)]
    pub timeout_shrink: Option<f64>,
    #[serde(default)]
    pub backoff: Option<BackoffSchedule>,
    #[serde(default)]
    pub strategies: Option<Vec<Strategy>>,
    #[serde(default)]
    pub wait_until: Option<Vec<LoadState>>,
}

impl PolicySpec {
    pub fn apply(&self, base: &OperationPolicy) -> OperationPolicy {
        let mut policy = base.clone();
        if let Some(n) = self.max_retries {
            policy.max_retries = n;
        }
        if let Some(ms) = self.timeout_ms {
            policy.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.min_timeout_ms {
            policy.min_timeout = Duration::from_millis(ms);
        }
        if let Some(f) = self.timeout_shrink {
            policy.timeout_shrink = f;
        }
        if let Some(b) = &self.backoff {
            policy.backoff = b.clone();
        }
        if let Some(s) = &self.strategies {
            policy.strategies = s.clone();
        }
        if let Some(w) = &self.wait_until {
            policy.wait_until = w.clone();
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::driver::Strategy;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = OperationPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.strategies, vec![Strategy::Standard, Strategy::Forced, Strategy::Script]);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let b = BackoffSchedule::exponential(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
        );
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(2), Duration::from_millis(400));
        assert_eq!(b.delay(3), Duration::from_millis(500));
        assert_eq!(b.delay(60), Duration::from_millis(500));
    }

    #[test]
    fn test_fixed_backoff_repeats_last() {
        let b = BackoffSchedule::fixed([Duration::from_millis(10), Duration::from_millis(30)]);
        assert_eq!(b.delay(0), Duration::from_millis(10));
        assert_eq!(b.delay(5), Duration::from_millis(30));
    }

    #[test]
    fn test_decreasing_backoff_is_rejected() {
        let policy = OperationPolicy::default().with_backoff(BackoffSchedule::fixed([
            Duration::from_millis(50),
            Duration::from_millis(10),
        ]));
        assert_eq!(policy.validate(), Err(PolicyError::DecreasingBackoff));
    }

    #[test]
    fn test_attempt_timeout_shrinks_to_floor() {
        let policy = OperationPolicy::default()
            .with_timeout(Duration::from_millis(1000))
            .with_timeout_shrink(0.5)
            .with_min_timeout(Duration::from_millis(300));

        assert_eq!(policy.attempt_timeout(1), Duration::from_millis(1000));
        assert_eq!(policy.attempt_timeout(2), Duration::from_millis(500));
        assert_eq!(policy.attempt_timeout(3), Duration::from_millis(300));
        assert_eq!(policy.attempt_timeout(9), Duration::from_millis(300));
    }

    #[test]
    fn test_wait_until_escalates_then_sticks() {
        let policy = OperationPolicy::default();
        assert_eq!(policy.wait_until_for(1), LoadState::DomContentLoaded);
        assert_eq!(policy.wait_until_for(2), LoadState::Load);
        assert_eq!(policy.wait_until_for(3), LoadState::NetworkIdle);
        assert_eq!(policy.wait_until_for(7), LoadState::NetworkIdle);
    }

    #[test]
    fn test_spec_overrides_only_given_fields() {
        let spec: PolicySpec = serde_json::from_value(serde_json::json!({
            "max_retries": 5,
            "strategies": ["script"],
            "backoff": { "kind": "fixed", "delays_ms": [5, 10] }
        }))
        .unwrap();

        let policy = spec.apply(&OperationPolicy::default());
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.strategies, vec![Strategy::Script]);
        assert_eq!(policy.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(policy.backoff.delay(1), Duration::from_millis(10));
    }

    proptest! {
        #[test]
        fn prop_exponential_schedule_is_non_decreasing(
            base in 0u64..2_000,
            factor in 1.0f64..4.0,
            max in 0u64..20_000,
        ) {
            let b = BackoffSchedule::Exponential { base_ms: base, factor, max_ms: max };
            for retry in 0..20 {
                prop_assert!(b.delay(retry) <= b.delay(retry + 1));
            }
        }
    }
}
