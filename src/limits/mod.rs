//! # Módulo de Limites de Execução
//!
//! Protege a sessão de browser contra cenários que nunca terminam:
//! muitos steps, retries em cascata ou timeouts enormes.
//!
//! ## Para todos entenderem:
//!
//! Cada operação resiliente pode tentar de novo várias vezes e em
//! várias estratégias. Sem um teto global, um cenário com 40 steps
//! instáveis poderia passar horas "quase funcionando". Estes limites
//! são o teto.
//!
//! ## Limites configuráveis:
//!
//! | Limite             | Padrão | Variável                    |
//! |--------------------|--------|-----------------------------|
//! | max_steps          | 100    | `RUNNER_MAX_STEPS`          |
//! | max_retries_total  | 50     | `RUNNER_MAX_RETRIES`        |
//! | max_execution_secs | 300    | `RUNNER_MAX_EXECUTION_SECS` |
//! | max_step_timeout   | 30     | `RUNNER_MAX_STEP_TIMEOUT`   |

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::policy::OperationPolicy;

// ============================================================================
// LIMITES PADRÃO (CONSTANTES)
// ============================================================================

/// Número máximo de steps em um cenário.
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Retries somados de todas as operações do cenário.
pub const DEFAULT_MAX_RETRIES_TOTAL: u32 = 50;

/// Prazo total do cenário (segundos).
pub const DEFAULT_MAX_EXECUTION_SECS: u64 = 300;

/// Teto do timeout de uma tentativa (segundos).
pub const DEFAULT_MAX_STEP_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// ESTRUTURA DE LIMITES
// ============================================================================

/// Configuração de limites de execução.
///
/// ```rust
/// use resilient_runner::limits::ExecutionLimits;
///
/// let limits = ExecutionLimits {
///     max_steps: 20,
///     ..Default::default()
/// };
/// assert_eq!(limits.max_retries_total, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Cenários maiores são rejeitados na validação.
    pub max_steps: usize,

    /// Orçamento global de retries, compartilhado pelas operações.
    pub max_retries_total: u32,

    /// Prazo do cenário inteiro.
    pub max_execution_time: Duration,

    /// Timeouts de política acima disso são reduzidos.
    pub max_step_timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_retries_total: DEFAULT_MAX_RETRIES_TOTAL,
            max_execution_time: Duration::from_secs(DEFAULT_MAX_EXECUTION_SECS),
            max_step_timeout: Duration::from_secs(DEFAULT_MAX_STEP_TIMEOUT_SECS),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl ExecutionLimits {
    /// Lê os limites das variáveis `RUNNER_*`; valores inválidos são ignorados.
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Some(n) = env_parse("RUNNER_MAX_STEPS") {
            limits.max_steps = n;
        }
        if let Some(n) = env_parse("RUNNER_MAX_RETRIES") {
            limits.max_retries_total = n;
        }
        if let Some(n) = env_parse("RUNNER_MAX_EXECUTION_SECS") {
            limits.max_execution_time = Duration::from_secs(n);
        }
        if let Some(n) = env_parse("RUNNER_MAX_STEP_TIMEOUT") {
            limits.max_step_timeout = Duration::from_secs(n);
        }

        limits
    }

    /// Limites restritivos para testes.
    #[cfg(test)]
    pub(crate) fn strict() -> Self {
        Self {
            max_steps: 10,
            max_retries_total: 5,
            max_execution_time: Duration::from_secs(30),
            max_step_timeout: Duration::from_secs(5),
        }
    }

    /// Aplica o teto de timeout a uma política.
    pub fn clamp_policy(&self, mut policy: OperationPolicy) -> OperationPolicy {
        policy.timeout = policy.timeout.min(self.max_step_timeout);
        policy.min_timeout = policy.min_timeout.min(policy.timeout);
        policy
    }
}

// ============================================================================
// VALIDAÇÃO DE LIMITES
// ============================================================================

#[derive(Debug)]
pub struct LimitValidationResult {
    pub passed: bool,
    pub violations: Vec<LimitViolation>,
}

/// Violação de limite detectada.
#[derive(Debug, Clone)]
pub struct LimitViolation {
    pub limit_name: String,
    pub limit_value: String,
    pub actual_value: String,
    pub message: String,
}

/// Valida um cenário contra os limites.
///
/// `worst_case_retries` é a soma, por step, de retries × estratégias.
pub fn validate_limits(
    step_count: usize,
    worst_case_retries: u32,
    limits: &ExecutionLimits,
) -> LimitValidationResult {
    let mut violations = Vec::new();

    if step_count > limits.max_steps {
        violations.push(LimitViolation {
            limit_name: "max_steps".to_string(),
            limit_value: limits.max_steps.to_string(),
            actual_value: step_count.to_string(),
            message: format!(
                "Cenário tem {} steps, máximo permitido é {}",
                step_count, limits.max_steps
            ),
        });
    }

    if worst_case_retries > limits.max_retries_total {
        violations.push(LimitViolation {
            limit_name: "max_retries_total".to_string(),
            limit_value: limits.max_retries_total.to_string(),
            actual_value: worst_case_retries.to_string(),
            message: format!(
                "Cenário pode fazer até {} retries, máximo permitido é {}",
                worst_case_retries, limits.max_retries_total
            ),
        });
    }

    LimitValidationResult {
        passed: violations.is_empty(),
        violations,
    }
}

// ============================================================================
// CONTADOR DE RETRIES (RUNTIME)
// ============================================================================

/// Orçamento de retries compartilhado entre as operações de um cenário.
#[derive(Debug, Default)]
pub struct RetryCounter {
    count: AtomicU32,
    limit: u32,
}

impl RetryCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            limit,
        }
    }

    /// `false` quando o orçamento acabou e o retry não deve acontecer.
    pub fn try_increment(&self) -> bool {
        let current = self.count.fetch_add(1, Ordering::SeqCst);
        current < self.limit
    }

    pub fn current(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}
