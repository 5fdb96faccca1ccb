//! # Executor Resiliente
//!
//! Executa uma ação lógica ("clique no botão salvar", "navegue para /app")
//! como uma máquina de estados explícita:
//!
//! ```text
//!                 ┌──────── falha transitória, ainda há tentativas ─────┐
//!                 ▼                                                      │
//!  Attempting(s, n) ──sucesso──► Succeeded                    Retrying(s, n+1, backoff)
//!        │  │                                                            ▲
//!        │  └──────────── falha transitória ─────────────────────────────┘
//!        │
//!        ├── erro da estratégia ──► Escalating(s → s+1) ──► Attempting(s+1, 1)
//!        │
//!        └── rejeição / prazo / orçamento esgotado ──► Exhausted(kind)
//! ```
//!
//! ## Para todos entenderem:
//!
//! - A operação inteira tem `max_retries + 1` tentativas, somando todas as
//!   estratégias (standard, forced, script)
//! - Só um erro específico da estratégia (ex: clique interceptado) escala
//! - Ao escalar, o contador da estratégia volta a 1 e o backoff recomeça,
//!   mas a tentativa continua contando no total da operação
//! - O timeout de cada tentativa encolhe até um piso e cobre a tentativa
//!   toda: resolução do alvo, ação e pós-condições
//! - Entre tentativas há um backoff que nunca diminui
//! - `ActionRejected` (ex: botão desabilitado) falha na hora, sem retry
//! - `NotFound` é retentado mas não escala: trocar a forma do clique não
//!   faz um elemento inexistente aparecer
//! - Navegação não tem estratégias: cada retry usa uma condição wait-until
//!   mais forte (domcontentloaded → load → networkidle)
//!
//! Em falha terminal, um snapshot é entregue ao `DiagnosticSink`.

pub mod outcome;
pub mod policy;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::context::AutomationContext;
use crate::diagnostics::Snapshot;
use crate::driver::{
    Driver, DriverError, ElementHandle, ErrorClass, LoadState, Requirement, Strategy,
};
use crate::errors::{ErrorCode, FailureKind};
use crate::resolver::{resolve, NotFound};

use outcome::{
    Action, ActionDescriptor, AttemptRecord, AttemptStatus, NavigationErrorClass, NavigationState,
    OperationFailure, OperationOutcome, PostCondition, Success,
};
use policy::OperationPolicy;

/// Limite da captura de screenshot em falha.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// MÁQUINA DE ESTADOS
// ============================================================================

/// Estado do executor. `strategy` é o índice em `policy.strategies`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecState {
    Attempting { strategy: usize, attempt: u32 },
    /// `attempt` é a próxima tentativa.
    Retrying {
        strategy: usize,
        attempt: u32,
        delay: Duration,
    },
    Escalating { from: usize, to: usize },
    Succeeded { strategy: usize, attempt: u32 },
    /// Terminal; `kind` é a classe da falha devolvida.
    Exhausted { kind: FailureKind },
}

/// Próximo estado após uma tentativa.
///
/// `attempt` conta dentro da estratégia atual; `made` conta a operação
/// inteira e nunca passa de `policy.max_attempts()`.
pub fn transition(
    policy: &OperationPolicy,
    strategy_count: usize,
    strategy: usize,
    attempt: u32,
    made: u32,
    status: AttemptStatus,
) -> ExecState {
    let budget_left = made < policy.max_attempts();

    match status {
        AttemptStatus::Succeeded => ExecState::Succeeded { strategy, attempt },
        AttemptStatus::ActionRejected => ExecState::Exhausted {
            kind: FailureKind::ActionRejected,
        },
        AttemptStatus::Cancelled => ExecState::Exhausted {
            kind: FailureKind::Timeout,
        },
        AttemptStatus::StrategyRejected if budget_left && strategy + 1 < strategy_count => {
            ExecState::Escalating {
                from: strategy,
                to: strategy + 1,
            }
        }
        AttemptStatus::StrategyRejected => ExecState::Exhausted {
            kind: FailureKind::Exhausted,
        },
        AttemptStatus::NotFound | AttemptStatus::Timeout | AttemptStatus::TransientNetwork
            if budget_left =>
        {
            ExecState::Retrying {
                strategy,
                attempt: attempt + 1,
                delay: policy.backoff.delay(attempt.saturating_sub(1)),
            }
        }
        AttemptStatus::NotFound => ExecState::Exhausted {
            kind: FailureKind::NotFound,
        },
        AttemptStatus::Timeout | AttemptStatus::TransientNetwork => ExecState::Exhausted {
            kind: FailureKind::Exhausted,
        },
    }
}

/// Como o executor reage a um erro do driver.
fn status_for(error: &DriverError) -> AttemptStatus {
    match error.class() {
        ErrorClass::StrategySpecific => AttemptStatus::StrategyRejected,
        ErrorClass::Permanent => AttemptStatus::ActionRejected,
        ErrorClass::Transient => match error.failure_kind() {
            Some(FailureKind::TransientNetwork) => AttemptStatus::TransientNetwork,
            _ => AttemptStatus::Timeout,
        },
    }
}

fn navigation_class(error: &DriverError) -> Option<NavigationErrorClass> {
    match error {
        DriverError::Network(_) => Some(NavigationErrorClass::Network),
        DriverError::Timeout { .. } => Some(NavigationErrorClass::Timeout),
        DriverError::Protocol(_) => Some(NavigationErrorClass::Protocol),
        _ => None,
    }
}

// ============================================================================
// TENTATIVA
// ============================================================================

#[derive(Clone, Copy)]
enum Operation<'a> {
    Act(&'a ActionDescriptor),
    Navigate(&'a str),
}

impl Operation<'_> {
    fn label(&self) -> String {
        match self {
            Self::Act(op) => op.label(),
            Self::Navigate(url) => format!("navigate '{}'", url),
        }
    }
}

struct AttemptReport {
    status: AttemptStatus,
    rank: Option<usize>,
    error: Option<String>,
    not_found: Option<NotFound>,
    navigation_error: Option<NavigationErrorClass>,
}

impl AttemptReport {
    fn ok(rank: Option<usize>) -> Self {
        Self {
            status: AttemptStatus::Succeeded,
            rank,
            error: None,
            not_found: None,
            navigation_error: None,
        }
    }

    fn failed(status: AttemptStatus, rank: Option<usize>, error: impl ToString) -> Self {
        Self {
            status,
            rank,
            error: Some(error.to_string()),
            not_found: None,
            navigation_error: None,
        }
    }

    fn driver_error(rank: Option<usize>, error: DriverError) -> Self {
        Self::failed(status_for(&error), rank, error)
    }
}

/// Executa a ação sob um timeout; estourar vira `DriverError::Timeout`.
async fn bounded<F>(limit: Duration, fut: F) -> Result<(), DriverError>
where
    F: Future<Output = Result<(), DriverError>>,
{
    timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(DriverError::timeout(limit)))
}

/// Uma tentativa completa. `limit` cobre resolução, ação e pós-condições.
async fn act<D: Driver + ?Sized>(
    driver: &mut D,
    op: &ActionDescriptor,
    strategy: Strategy,
    limit: Duration,
) -> AttemptReport {
    let deadline = Instant::now() + limit;
    match timeout_at(deadline, act_until(driver, op, strategy, limit, deadline)).await {
        Ok(report) => report,
        Err(_) => AttemptReport::failed(AttemptStatus::Timeout, None, DriverError::timeout(limit)),
    }
}

async fn act_until<D: Driver + ?Sized>(
    driver: &mut D,
    op: &ActionDescriptor,
    strategy: Strategy,
    limit: Duration,
    deadline: Instant,
) -> AttemptReport {
    let left = || deadline.saturating_duration_since(Instant::now());

    // O prazo da tentativa é dividido entre os candidatos.
    let per_candidate = share(limit, op.target.len());
    let target = match resolve(&*driver, &op.target, op.requirement, per_candidate).await {
        Ok(t) => t,
        Err(nf) => {
            return AttemptReport {
                status: AttemptStatus::NotFound,
                rank: None,
                error: Some(nf.to_string()),
                not_found: Some(nf),
                navigation_error: None,
            }
        }
    };
    let rank = Some(target.rank);
    let handle = &target.handle;

    let result = match &op.action {
        Action::Click => bounded(left(), driver.click(handle, strategy)).await,
        Action::Fill { text } => match bounded(left(), driver.fill(handle, text, strategy)).await {
            Ok(()) => bounded(left(), read_back(&*driver, handle, text)).await,
            Err(e) => Err(e),
        },
        Action::SetFiles { paths } => {
            bounded(left(), driver.set_files(handle, paths, strategy)).await
        }
        Action::Press { key } => bounded(left(), driver.press(handle, key, strategy)).await,
        Action::WaitFor => Ok(()),
    };
    if let Err(e) = result {
        return AttemptReport::driver_error(rank, e);
    }

    for condition in &op.post_conditions {
        if !post_condition_holds(&*driver, condition, left()).await {
            // Ação feita mas a página não reagiu a tempo.
            return AttemptReport::failed(
                AttemptStatus::Timeout,
                rank,
                format!("pós-condição não satisfeita: {}", condition),
            );
        }
    }

    AttemptReport::ok(rank)
}

/// Fatia de `limit` para cada um de `parts` candidatos.
fn share(limit: Duration, parts: usize) -> Duration {
    limit / u32::try_from(parts.max(1)).unwrap_or(u32::MAX)
}

/// Fill-and-verify: relê o valor do campo.
async fn read_back<D: Driver + ?Sized>(
    driver: &D,
    handle: &ElementHandle,
    expected: &str,
) -> Result<(), DriverError> {
    let actual = driver.value(handle).await?;
    if actual == expected {
        Ok(())
    } else {
        Err(DriverError::ValueMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

async fn post_condition_holds<D: Driver + ?Sized>(
    driver: &D,
    condition: &PostCondition,
    limit: Duration,
) -> bool {
    match condition {
        PostCondition::Visible(list) => {
            resolve(driver, list, Requirement::Visible, share(limit, list.len()))
                .await
                .is_ok()
        }
        PostCondition::UrlContains(fragment) => {
            poll_until(driver, limit, move |d| async move {
                d.current_url().await.is_ok_and(|url| url.contains(fragment.as_str()))
            })
            .await
        }
        PostCondition::Hidden(list) => {
            poll_until(driver, limit, move |d| async move {
                for (_, candidate) in list.ranked() {
                    let Ok(handles) = d.query(&candidate.query).await else {
                        continue;
                    };
                    for handle in handles {
                        if d.state(&handle).await.is_ok_and(|s| s.attached && s.visible) {
                            return false;
                        }
                    }
                }
                true
            })
            .await
        }
    }
}

async fn poll_until<'d, D, F, Fut>(driver: &'d D, limit: Duration, mut check: F) -> bool
where
    D: Driver + ?Sized,
    F: FnMut(&'d D) -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    loop {
        if check(driver).await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(driver.poll_interval().min(deadline - now)).await;
    }
}

async fn go<D: Driver + ?Sized>(
    driver: &mut D,
    url: &str,
    wait_until: LoadState,
    limit: Duration,
) -> AttemptReport {
    match bounded(limit, driver.navigate(url, wait_until, limit)).await {
        Ok(()) => AttemptReport::ok(None),
        Err(e) => AttemptReport {
            navigation_error: navigation_class(&e),
            ..AttemptReport::driver_error(None, e)
        },
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Executor de operações resilientes.
///
/// ## Exemplo:
///
/// ```rust,no_run
/// use resilient_runner::candidate::{CandidateList, Query};
/// use resilient_runner::context::AutomationContext;
/// use resilient_runner::driver::scripted::ScriptedDriver;
/// use resilient_runner::retry::outcome::ActionDescriptor;
/// use resilient_runner::retry::policy::OperationPolicy;
/// use resilient_runner::retry::ResilientExecutor;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let mut driver = ScriptedDriver::load("page.json")?;
/// let save = CandidateList::from_queries(
///     "botão salvar",
///     vec![Query::test_id("save"), Query::role("button", Some("Salvar"))],
/// )?;
///
/// let executor = ResilientExecutor::new(AutomationContext::new("checkout"));
/// let outcome = executor
///     .execute(&mut driver, &ActionDescriptor::click(save), &OperationPolicy::default())
///     .await;
/// println!("{} tentativa(s)", outcome.attempts());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResilientExecutor {
    ctx: AutomationContext,
}

impl ResilientExecutor {
    pub fn new(ctx: AutomationContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AutomationContext {
        &self.ctx
    }

    /// Executa uma ação sobre um alvo descrito por candidatos.
    #[instrument(skip_all, fields(operation = %op.label(), scenario = %self.ctx.scenario))]
    pub async fn execute<D: Driver + ?Sized>(
        &self,
        driver: &mut D,
        op: &ActionDescriptor,
        policy: &OperationPolicy,
    ) -> OperationOutcome {
        self.run(driver, Operation::Act(op), policy).await
    }

    /// Navega para `url` subindo a escada de wait-until a cada retry.
    #[instrument(skip_all, fields(url = %url, scenario = %self.ctx.scenario))]
    pub async fn navigate<D: Driver + ?Sized>(
        &self,
        driver: &mut D,
        url: &str,
        policy: &OperationPolicy,
    ) -> OperationOutcome {
        self.run(driver, Operation::Navigate(url), policy).await
    }

    /// `None` se o prazo do cenário acabar antes.
    async fn before_deadline<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.ctx.deadline {
            Some(deadline) => timeout_at(deadline, fut).await.ok(),
            None => Some(fut.await),
        }
    }

    async fn run<D: Driver + ?Sized>(
        &self,
        driver: &mut D,
        operation: Operation<'_>,
        policy: &OperationPolicy,
    ) -> OperationOutcome {
        let label = operation.label();
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut strategies_tried: Vec<Strategy> = Vec::new();
        let mut last_not_found: Option<NotFound> = None;
        let mut last_error: Option<String> = None;
        let mut cause: Option<FailureKind> = None;

        if let Err(e) = policy.validate() {
            let failure = OperationFailure {
                operation: label,
                kind: FailureKind::ActionRejected,
                cause: None,
                strategies_tried,
                candidates: None,
                last_error: Some(format!("política inválida: {}", e)),
                history,
                snapshot: None,
            };
            warn!(error = %e, "Política inválida, operação não executada");
            return OperationOutcome::Failed(failure);
        }

        let strategy_count = match operation {
            Operation::Act(_) => policy.strategies.len(),
            Operation::Navigate(_) => 1,
        };
        let mut navigation = match operation {
            Operation::Navigate(url) => Some(NavigationState::new(url, policy.wait_until_for(1))),
            Operation::Act(_) => None,
        };

        let mut state = ExecState::Attempting {
            strategy: 0,
            attempt: 1,
        };
        let mut backoff_before = Duration::ZERO;

        loop {
            match state {
                ExecState::Attempting { strategy, attempt } => {
                    let limit = policy.attempt_timeout(attempt);
                    let started = Instant::now();

                    let (used_strategy, wait_until, report) = match operation {
                        Operation::Act(op) => {
                            let s = policy.strategies[strategy];
                            if !strategies_tried.contains(&s) {
                                strategies_tried.push(s);
                            }
                            let report = self.before_deadline(act(driver, op, s, limit)).await;
                            (Some(s), None, report)
                        }
                        Operation::Navigate(url) => {
                            let w = policy.wait_until_for(attempt);
                            let report = self.before_deadline(go(driver, url, w, limit)).await;
                            (None, Some(w), report)
                        }
                    };
                    let report = report.unwrap_or_else(|| {
                        AttemptReport::failed(
                            AttemptStatus::Cancelled,
                            None,
                            "prazo do cenário esgotado",
                        )
                    });

                    debug!(
                        strategy = ?used_strategy,
                        attempt = attempt,
                        status = ?report.status,
                        "Tentativa concluída"
                    );

                    if let Some(nav) = navigation.as_mut() {
                        nav.attempts = attempt;
                        if let Some(w) = wait_until {
                            nav.wait_until = w;
                        }
                        if report.navigation_error.is_some() {
                            nav.last_error = report.navigation_error;
                        }
                    }

                    if report.status != AttemptStatus::Succeeded {
                        cause = report.status.cause().or(cause);
                        last_error = report.error.clone();
                        if let Some(nf) = report.not_found.clone() {
                            last_not_found = Some(nf);
                        }
                    }

                    history.push(AttemptRecord {
                        strategy: used_strategy,
                        attempt,
                        timeout_ms: limit.as_millis() as u64,
                        backoff_ms: backoff_before.as_millis() as u64,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        status: report.status,
                        rank: report.rank,
                        wait_until,
                        error: report.error,
                    });

                    let made = history.len() as u32;
                    state =
                        transition(policy, strategy_count, strategy, attempt, made, report.status);
                }

                ExecState::Retrying {
                    strategy,
                    attempt,
                    delay,
                } => {
                    if !self.ctx.try_consume_retry() {
                        warn!(operation = %label, "Orçamento global de retries esgotado");
                        state = ExecState::Exhausted {
                            kind: FailureKind::Exhausted,
                        };
                        continue;
                    }

                    if let Some(nav) = navigation.as_ref() {
                        debug!(navigation = ?nav, "Navegação será retentada");
                    }

                    warn!(
                        operation = %label,
                        next_attempt = attempt,
                        max_attempts = policy.max_attempts(),
                        backoff_ms = delay.as_millis() as u64,
                        error = last_error.as_deref().unwrap_or(""),
                        "Tentativa falhou, aguardando retry"
                    );

                    if self.before_deadline(sleep(delay)).await.is_none() {
                        cause = Some(FailureKind::Timeout);
                        last_error = Some("prazo do cenário esgotado".to_string());
                        state = ExecState::Exhausted {
                            kind: FailureKind::Timeout,
                        };
                        continue;
                    }
                    backoff_before = delay;
                    state = ExecState::Attempting { strategy, attempt };
                }

                ExecState::Escalating { from, to } => {
                    warn!(
                        operation = %label,
                        from = %policy.strategies[from],
                        to = %policy.strategies[to],
                        "Escalando estratégia"
                    );
                    backoff_before = Duration::ZERO;
                    state = ExecState::Attempting {
                        strategy: to,
                        attempt: 1,
                    };
                }

                ExecState::Succeeded { strategy, attempt } => {
                    let rank = history.last().and_then(|r| r.rank);
                    let winner = match operation {
                        Operation::Act(_) => Some(policy.strategies[strategy]),
                        Operation::Navigate(_) => None,
                    };
                    if history.len() > 1 {
                        info!(
                            operation = %label,
                            strategy = ?winner,
                            attempts = history.len(),
                            "Operação concluída após retry"
                        );
                    }
                    return OperationOutcome::Succeeded(Success {
                        operation: label,
                        strategy: winner,
                        attempt,
                        rank,
                        history,
                    });
                }

                ExecState::Exhausted { kind } => {
                    if let Some(nav) = navigation.as_ref() {
                        debug!(navigation = ?nav, "Navegação abandonada");
                    }
                    let mut failure = OperationFailure {
                        operation: label,
                        kind,
                        cause,
                        strategies_tried,
                        candidates: last_not_found,
                        last_error,
                        history,
                        snapshot: None,
                    };
                    warn!(
                        operation = %failure.operation,
                        kind = %kind,
                        attempts = failure.history.len(),
                        "Operação falhou"
                    );
                    failure.snapshot = self.capture(&*driver, &failure).await;
                    return OperationOutcome::Failed(failure);
                }
            }
        }
    }

    /// Snapshot best-effort; erros aqui só geram log.
    async fn capture<D: Driver + ?Sized>(
        &self,
        driver: &D,
        failure: &OperationFailure,
    ) -> Option<PathBuf> {
        let mut snapshot = Snapshot::new(&failure.operation, failure.summary());

        match timeout(SNAPSHOT_TIMEOUT, driver.current_url()).await {
            Ok(Ok(url)) => snapshot.url = Some(url),
            Ok(Err(e)) => debug!(error = %e, "URL indisponível para snapshot"),
            Err(_) => debug!("Timeout lendo URL para snapshot"),
        }

        match timeout(SNAPSHOT_TIMEOUT, driver.screenshot()).await {
            Ok(Ok(bytes)) => snapshot.image = Some(bytes),
            Ok(Err(e)) => warn!(error = %e, "Screenshot de diagnóstico falhou"),
            Err(_) => warn!("Screenshot de diagnóstico excedeu o timeout"),
        }

        match self.ctx.diagnostics.capture(snapshot).await {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    code = %ErrorCode::DIAGNOSTIC_WRITE,
                    error = %e,
                    "Falha ao gravar snapshot de diagnóstico"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CandidateList, Query};
    use crate::diagnostics::MemorySink;
    use crate::driver::scripted::{ClickEffect, NavigationFailure, ScriptedDriver, ScriptedElement};
    use crate::limits::RetryCounter;
    use policy::BackoffSchedule;
    use proptest::prelude::*;
    use std::sync::Arc;
    use crate::driver::Strategy;

    fn target(desc: &str, queries: Vec<Query>) -> CandidateList {
        CandidateList::from_queries(desc, queries).unwrap()
    }

    fn save_button() -> CandidateList {
        target("salvar", vec![Query::css("#save")])
    }

    /// Política com tempos curtos para testes.
    fn fast_policy(max_retries: u32, strategies: Vec<Strategy>) -> OperationPolicy {
        OperationPolicy::default()
            .with_max_retries(max_retries)
            .with_timeout(Duration::from_millis(60))
            .with_min_timeout(Duration::from_millis(20))
            .with_backoff(BackoffSchedule::exponential(
                Duration::from_millis(5),
                2.0,
                Duration::from_millis(40),
            ))
            .with_strategies(strategies)
    }

    fn executor() -> ResilientExecutor {
        ResilientExecutor::new(AutomationContext::new("teste"))
    }

    #[test]
    fn test_transition_retries_until_operation_budget() {
        let policy = fast_policy(1, Strategy::ESCALATION.to_vec());

        assert!(matches!(
            transition(&policy, 3, 0, 1, 1, AttemptStatus::Timeout),
            ExecState::Retrying { strategy: 0, attempt: 2, .. }
        ));
        assert_eq!(
            transition(&policy, 3, 0, 2, 2, AttemptStatus::TransientNetwork),
            ExecState::Exhausted { kind: FailureKind::Exhausted }
        );
    }

    #[test]
    fn test_transition_escalates_only_on_strategy_errors() {
        let policy = fast_policy(2, Strategy::ESCALATION.to_vec());

        assert_eq!(
            transition(&policy, 3, 0, 1, 1, AttemptStatus::StrategyRejected),
            ExecState::Escalating { from: 0, to: 1 }
        );
        // Sem tentativas sobrando não há para onde escalar.
        assert_eq!(
            transition(&policy, 3, 1, 2, 3, AttemptStatus::StrategyRejected),
            ExecState::Exhausted { kind: FailureKind::Exhausted }
        );
        assert_eq!(
            transition(&policy, 3, 2, 1, 2, AttemptStatus::StrategyRejected),
            ExecState::Exhausted { kind: FailureKind::Exhausted }
        );
    }

    #[test]
    fn test_transition_not_found_never_escalates() {
        let policy = fast_policy(0, Strategy::ESCALATION.to_vec());
        assert_eq!(
            transition(&policy, 3, 0, 1, 1, AttemptStatus::NotFound),
            ExecState::Exhausted { kind: FailureKind::NotFound }
        );
    }

    #[test]
    fn test_transition_rejection_is_terminal() {
        let policy = fast_policy(5, Strategy::ESCALATION.to_vec());
        assert_eq!(
            transition(&policy, 3, 0, 1, 1, AttemptStatus::ActionRejected),
            ExecState::Exhausted { kind: FailureKind::ActionRejected }
        );
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let mut driver =
            ScriptedDriver::new().with_element(ScriptedElement::new("save").css("#save"));

        let outcome = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(2, vec![Strategy::Standard]),
            )
            .await;

        let success = outcome.into_result().unwrap();
        assert_eq!(success.attempt, 1);
        assert_eq!(success.rank, Some(0));
        assert!(driver.was_called("click:save:standard"));
    }

    #[tokio::test]
    async fn test_always_transient_makes_n_plus_one_attempts() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save")
                .css("#save")
                .fail(None, DriverError::Network("ERR_CONNECTION_RESET".into()), None),
        );

        let outcome = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(3, vec![Strategy::Standard]),
            )
            .await;

        assert_eq!(outcome.attempts(), 4);
        let failure = outcome.into_result().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exhausted);
        assert_eq!(failure.cause, Some(FailureKind::TransientNetwork));
        assert!(failure
            .history
            .iter()
            .all(|r| r.status == AttemptStatus::TransientNetwork));
    }

    #[tokio::test]
    async fn test_disabled_control_is_rejected_after_one_attempt() {
        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("save").css("#save").disabled());

        let outcome = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(3, Strategy::ESCALATION.to_vec()),
            )
            .await;

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ActionRejected));
    }

    #[tokio::test]
    async fn test_backoff_never_decreases_within_strategy() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save")
                .css("#save")
                .fail(None, DriverError::Timeout { ms: 1 }, None),
        );

        let outcome = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(4, vec![Strategy::Standard]),
            )
            .await;

        let backoffs: Vec<u64> = outcome.history().iter().map(|r| r.backoff_ms).collect();
        assert_eq!(backoffs, vec![0, 5, 10, 20, 40]);
        assert!(backoffs.windows(2).all(|w| w[0] <= w[1]));

        let timeouts: Vec<u64> = outcome.history().iter().map(|r| r.timeout_ms).collect();
        assert!(timeouts.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_strategy_error_escalates_and_resets_counter() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save").css("#save").fail(
                Some(Strategy::Standard),
                DriverError::Intercepted("div.toast".into()),
                None,
            ),
        );

        let outcome = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(2, Strategy::ESCALATION.to_vec()),
            )
            .await;

        let success = outcome.into_result().unwrap();
        assert_eq!(success.strategy, Some(Strategy::Forced));
        assert_eq!(success.attempt, 1);
        assert_eq!(success.history.len(), 2);
        assert!(driver.was_called("click:save:forced"));
    }

    #[tokio::test]
    async fn test_escalation_resets_strategy_counter_but_shares_budget() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save")
                .css("#save")
                .fail(
                    Some(Strategy::Standard),
                    DriverError::Intercepted("div.toast".into()),
                    None,
                )
                .fail(Some(Strategy::Forced), DriverError::Timeout { ms: 1 }, Some(1)),
        );
        let click = ActionDescriptor::click(save_button());

        let outcome = executor()
            .execute(&mut driver, &click, &fast_policy(2, Strategy::ESCALATION.to_vec()))
            .await;

        let attempts: Vec<(Option<Strategy>, u32, u64)> = outcome
            .history()
            .iter()
            .map(|r| (r.strategy, r.attempt, r.backoff_ms))
            .collect();
        assert_eq!(
            attempts,
            vec![
                (Some(Strategy::Standard), 1, 0),
                (Some(Strategy::Forced), 1, 0),
                (Some(Strategy::Forced), 2, 5),
            ]
        );
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_with_default_strategies_stays_within_budget() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save")
                .css("#save")
                .fail(None, DriverError::Network("ERR_CONNECTION_RESET".into()), None),
        );
        let click = ActionDescriptor::click(save_button());

        let failure = executor()
            .execute(&mut driver, &click, &fast_policy(2, Strategy::ESCALATION.to_vec()))
            .await
            .into_result()
            .unwrap_err();

        assert_eq!(failure.history.len(), 3);
        assert_eq!(failure.kind, FailureKind::Exhausted);
        assert_eq!(failure.strategies_tried, vec![Strategy::Standard]);
    }

    #[tokio::test]
    async fn test_detached_element_is_retried_and_resolved_again() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save")
                .css("#save")
                .fail(None, DriverError::Detached, Some(1)),
        );
        let click = ActionDescriptor::click(save_button());

        let success = executor()
            .execute(&mut driver, &click, &fast_policy(1, Strategy::ESCALATION.to_vec()))
            .await
            .into_result()
            .unwrap();

        assert_eq!(success.attempt, 2);
        assert_eq!(success.strategy, Some(Strategy::Standard));
        assert_eq!(success.history[0].status, AttemptStatus::Timeout);
        assert!(driver.was_called("click:save:standard"));
    }

    #[tokio::test]
    async fn test_attempt_timeout_covers_candidate_resolution() {
        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("a").css("#a").hidden())
            .with_element(ScriptedElement::new("b").css("#b").hidden())
            .with_element(
                ScriptedElement::new("c")
                    .css("#c")
                    .visible_after(Duration::from_millis(110)),
            );
        let list = target(
            "enviar",
            vec![Query::css("#a"), Query::css("#b"), Query::css("#c")],
        );
        let policy = fast_policy(0, vec![Strategy::Standard]);

        let failure = executor()
            .execute(&mut driver, &ActionDescriptor::click(list), &policy)
            .await
            .into_result()
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::NotFound);
        assert_eq!(failure.history.len(), 1);
        assert!(failure.history[0].elapsed_ms < 110);
        assert_eq!(failure.candidates.unwrap().ranks(), vec![0, 1, 2]);
        assert!(!driver.was_called("click:c"));
    }

    #[tokio::test]
    async fn test_all_strategies_failing_is_exhausted() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save")
                .css("#save")
                .fail(None, DriverError::Intercepted("div.modal".into()), None),
        );

        let failure = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(2, Strategy::ESCALATION.to_vec()),
            )
            .await
            .into_result()
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Exhausted);
        assert_eq!(failure.strategies_tried, Strategy::ESCALATION.to_vec());
        assert_eq!(failure.history.len(), 3);
        assert!(failure.user_message().contains("standard, forced, script"));
    }

    #[tokio::test]
    async fn test_missing_target_is_not_found_with_every_candidate() {
        let mut driver = ScriptedDriver::new();
        let list = target(
            "salvar",
            vec![Query::test_id("save"), Query::css("#save"), Query::text("Salvar")],
        );

        let failure = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::click(list),
                &fast_policy(1, Strategy::ESCALATION.to_vec()),
            )
            .await
            .into_result()
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::NotFound);
        assert_eq!(failure.history.len(), 2);
        assert_eq!(failure.strategies_tried, vec![Strategy::Standard]);
        assert_eq!(failure.candidates.unwrap().ranks(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_hidden_then_visible_candidate_beats_later_one() {
        let mut driver = ScriptedDriver::new()
            .with_element(
                ScriptedElement::new("primary")
                    .css("#primary")
                    .visible_after(Duration::from_millis(300)),
            )
            .with_element(ScriptedElement::new("fallback").css("#fallback"));
        let list = target(
            "enviar",
            vec![Query::css("#absent"), Query::css("#primary"), Query::css("#fallback")],
        );

        // 200ms por candidato: #primary aparece dentro da sua janela.
        let policy =
            fast_policy(0, vec![Strategy::Standard]).with_timeout(Duration::from_millis(600));
        let success = executor()
            .execute(&mut driver, &ActionDescriptor::click(list), &policy)
            .await
            .into_result()
            .unwrap();

        assert_eq!(success.rank, Some(1));
        assert!(driver.was_called("click:primary"));
        assert!(!driver.was_called("click:fallback"));
    }

    #[tokio::test]
    async fn test_fill_is_verified_by_read_back() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("email")
                .tag("input")
                .css("#email")
                .ignore_fill_by(Strategy::Standard),
        );
        let email = target("email", vec![Query::css("#email")]);
        let op = ActionDescriptor::fill(email, "ana@example.com");

        let success = executor()
            .execute(&mut driver, &op, &fast_policy(1, Strategy::ESCALATION.to_vec()))
            .await
            .into_result()
            .unwrap();

        assert_eq!(success.strategy, Some(Strategy::Forced));
        assert_eq!(success.history[0].status, AttemptStatus::StrategyRejected);
        assert_eq!(driver.element_value("email"), Some("ana@example.com"));
    }

    #[tokio::test]
    async fn test_post_condition_waits_for_page_reaction() {
        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("save").css("#save").on_click(ClickEffect {
                navigate_to: Some("https://app.test/done".into()),
                show: vec!["toast".into()],
                hide: vec![],
            }))
            .with_element(ScriptedElement::new("toast").css(".toast").hidden());

        let op = ActionDescriptor::click(save_button())
            .expect(PostCondition::UrlContains("/done".into()))
            .expect(PostCondition::Visible(target("aviso", vec![Query::css(".toast")])));

        let outcome = executor()
            .execute(&mut driver, &op, &fast_policy(0, vec![Strategy::Standard]))
            .await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_unmet_post_condition_counts_as_timeout() {
        let mut driver =
            ScriptedDriver::new().with_element(ScriptedElement::new("save").css("#save"));
        let op = ActionDescriptor::click(save_button())
            .expect(PostCondition::Hidden(save_button()));

        let failure = executor()
            .execute(&mut driver, &op, &fast_policy(1, vec![Strategy::Standard]))
            .await
            .into_result()
            .unwrap_err();

        assert_eq!(failure.cause, Some(FailureKind::Timeout));
        assert_eq!(failure.history.len(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_only_resolves() {
        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("save").css("#save").disabled());

        let outcome = executor()
            .execute(
                &mut driver,
                &ActionDescriptor::wait_for(save_button(), Requirement::Visible),
                &fast_policy(0, vec![Strategy::Standard]),
            )
            .await;

        assert!(outcome.is_success());
        assert!(driver.history().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_climbs_wait_until_ladder() {
        let mut driver = ScriptedDriver::new().with_navigation_failure(NavigationFailure {
            url_contains: None,
            error: DriverError::Network("ERR_CONNECTION_RESET".into()),
            times: 2,
            unless_wait_until: None,
        });

        let success = executor()
            .navigate(&mut driver, "https://app.test/", &fast_policy(2, vec![Strategy::Standard]))
            .await
            .into_result()
            .unwrap();

        assert_eq!(success.attempt, 3);
        let ladder: Vec<Option<LoadState>> = success.history.iter().map(|r| r.wait_until).collect();
        assert_eq!(
            ladder,
            vec![
                Some(LoadState::DomContentLoaded),
                Some(LoadState::Load),
                Some(LoadState::NetworkIdle)
            ]
        );
        assert_eq!(success.history[0].status, AttemptStatus::TransientNetwork);
        assert_eq!(driver.current_url().await.unwrap(), "https://app.test/");
    }

    #[tokio::test]
    async fn test_navigation_rejection_fails_fast() {
        let mut driver = ScriptedDriver::new().with_navigation_failure(NavigationFailure {
            url_contains: None,
            error: DriverError::Rejected("ERR_BLOCKED_BY_CLIENT".into()),
            times: 9,
            unless_wait_until: None,
        });

        let outcome = executor()
            .navigate(
                &mut driver,
                "https://blocked.test/",
                &fast_policy(3, vec![Strategy::Standard]),
            )
            .await;

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ActionRejected));
    }

    #[tokio::test]
    async fn test_scenario_deadline_surfaces_timeout() {
        let mut driver = ScriptedDriver::new();
        let ctx = AutomationContext::new("prazo")
            .with_deadline(Instant::now() + Duration::from_millis(80));
        let policy = fast_policy(50, vec![Strategy::Standard])
            .with_backoff(BackoffSchedule::fixed([Duration::from_millis(10)]));

        let started = Instant::now();
        let failure = ResilientExecutor::new(ctx)
            .execute(&mut driver, &ActionDescriptor::click(save_button()), &policy)
            .await
            .into_result()
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.history.len() < 51);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_global_retry_budget_stops_retries() {
        let mut driver = ScriptedDriver::new().with_element(
            ScriptedElement::new("save")
                .css("#save")
                .fail(None, DriverError::Timeout { ms: 1 }, None),
        );
        let ctx = AutomationContext::new("orçamento")
            .with_retry_budget(Arc::new(RetryCounter::new(1)));

        let outcome = ResilientExecutor::new(ctx)
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(5, vec![Strategy::Standard]),
            )
            .await;

        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Exhausted));
    }

    #[tokio::test]
    async fn test_terminal_failure_captures_snapshot() {
        let sink = Arc::new(MemorySink::new());
        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("save").css("#save").disabled());
        let ctx = AutomationContext::new("snap").with_diagnostics(sink.clone());

        ResilientExecutor::new(ctx)
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(0, vec![Strategy::Standard]),
            )
            .await;

        let snapshots = sink.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].label, "click 'salvar'");
        assert_eq!(snapshots[0].summary["kind"], "action_rejected");
        assert!(snapshots[0].image.is_some());
    }

    #[tokio::test]
    async fn test_failed_screenshot_does_not_mask_failure() {
        let sink = Arc::new(MemorySink::new());
        let mut driver = ScriptedDriver::new()
            .with_element(ScriptedElement::new("save").css("#save").disabled())
            .with_failing_screenshot();
        let ctx = AutomationContext::new("snap").with_diagnostics(sink.clone());

        let outcome = ResilientExecutor::new(ctx)
            .execute(
                &mut driver,
                &ActionDescriptor::click(save_button()),
                &fast_policy(0, vec![Strategy::Standard]),
            )
            .await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::ActionRejected));
        assert!(sink.snapshots()[0].image.is_none());
    }

    #[tokio::test]
    async fn test_invalid_policy_is_rejected_without_attempts() {
        let mut driver = ScriptedDriver::new();
        let outcome = executor()
            .execute(&mut driver, &ActionDescriptor::click(save_button()), &fast_policy(1, vec![]))
            .await;

        assert_eq!(outcome.attempts(), 0);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ActionRejected));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_single_strategy_makes_exactly_n_plus_one_attempts(n in 0u32..5) {
            let mut driver = ScriptedDriver::new().with_element(
                ScriptedElement::new("save")
                    .css("#save")
                    .fail(None, DriverError::Protocol("target closed".into()), None),
            );
            let policy =
                fast_policy(n, vec![Strategy::Standard]).with_backoff(BackoffSchedule::None);

            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let outcome = rt.block_on(
                executor().execute(&mut driver, &ActionDescriptor::click(save_button()), &policy),
            );

            prop_assert_eq!(outcome.attempts(), n + 1);
            prop_assert_eq!(outcome.failure_kind(), Some(FailureKind::Exhausted));
        }

        #[test]
        fn prop_escalation_never_exceeds_operation_budget(
            n in 0u32..5,
            intercepted in any::<bool>(),
        ) {
            // Standard pode ser interceptado (escala); o resto falha por rede.
            let first = if intercepted {
                DriverError::Intercepted("div.overlay".into())
            } else {
                DriverError::Network("ERR_CONNECTION_RESET".into())
            };
            let mut driver = ScriptedDriver::new().with_element(
                ScriptedElement::new("save")
                    .css("#save")
                    .fail(Some(Strategy::Standard), first, None)
                    .fail(None, DriverError::Network("ERR_CONNECTION_RESET".into()), None),
            );
            let policy = OperationPolicy::default()
                .with_max_retries(n)
                .with_timeout(Duration::from_millis(60))
                .with_min_timeout(Duration::from_millis(20))
                .with_backoff(BackoffSchedule::None);
            prop_assert_eq!(policy.strategies.clone(), Strategy::ESCALATION.to_vec());

            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            let outcome = rt.block_on(
                executor().execute(&mut driver, &ActionDescriptor::click(save_button()), &policy),
            );

            prop_assert!(outcome.attempts() <= policy.max_retries + 1);
            prop_assert_eq!(outcome.attempts(), n + 1);
            prop_assert_eq!(outcome.failure_kind(), Some(FailureKind::Exhausted));
        }
    }
}
