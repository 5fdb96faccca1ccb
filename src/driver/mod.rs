//! # Driver - Capacidade do Motor de Automação
//!
//! O motor de browser (Chromium via CDP, um documento roteirizado para
//! testes, etc.) é um colaborador externo. Este trait define **apenas**
//! o que o núcleo resiliente consome dele:
//!
//! - (a) consulta ao documento: zero ou mais handles vivos por query
//! - (b) espera por condição (presente/visível/habilitado) com timeout
//! - (c) ações: click, fill, set-files, teclado; cada uma pode ser rejeitada
//! - (d) navegação com condição wait-until e timeout
//! - (e) screenshot para diagnóstico
//!
//! Operações de leitura recebem `&self`; as que alteram a página recebem
//! `&mut self`, o que garante que só um cenário dirige a sessão por vez.

pub mod scripted;

#[cfg(feature = "chromium")]
pub mod chromium;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::candidate::Query;
use crate::errors::FailureKind;

/// Intervalo padrão entre sondagens no `wait_for` genérico.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Referência a um elemento vivo no documento.
///
/// Não deve ser guardada entre operações: o documento pode ter mudado.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Estado observado de um elemento.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
}

/// O que o resolver exige de um candidato para considerá-lo casado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Basta estar no DOM.
    Present,
    /// No DOM e visível.
    #[default]
    Visible,
    /// Visível e habilitado.
    Enabled,
}

impl Requirement {
    pub fn is_met(&self, state: &ElementState) -> bool {
        match self {
            Self::Present => state.attached,
            Self::Visible => state.attached && state.visible,
            Self::Enabled => state.attached && state.visible && state.enabled,
        }
    }
}

/// Condição de espera da navegação, da mais fraca para a mais forte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl LoadState {
    /// Escada padrão usada quando as tentativas de navegação falham.
    pub const LADDER: [LoadState; 3] = [Self::DomContentLoaded, Self::Load, Self::NetworkIdle];
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DomContentLoaded => write!(f, "domcontentloaded"),
            Self::Load => write!(f, "load"),
            Self::NetworkIdle => write!(f, "networkidle"),
        }
    }
}

/// Forma de executar uma ação, em ordem de escalonamento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Interação normal, com checagens de acionabilidade.
    Standard,
    /// Ignora checagens de acionabilidade (sobreposição, viewport).
    Forced,
    /// Despacha a ação via script na página.
    Script,
}

impl Strategy {
    pub const ESCALATION: [Strategy; 3] = [Self::Standard, Self::Forced, Self::Script];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Forced => write!(f, "forced"),
            Self::Script => write!(f, "script"),
        }
    }
}

/// Como o executor deve reagir a um erro do driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retenta a mesma estratégia após backoff.
    Transient,
    /// Avança para a próxima estratégia.
    StrategySpecific,
    /// Falha imediatamente, sem retry.
    Permanent,
}

/// Erros devolvidos pelo driver.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum DriverError {
    #[error("timeout após {ms}ms")]
    Timeout { ms: u64 },

    #[error("erro de rede: {0}")]
    Network(String),

    #[error("erro de protocolo: {0}")]
    Protocol(String),

    #[error("elemento removido do documento")]
    Detached,

    #[error("clique interceptado por {0}")]
    Intercepted(String),

    #[error("elemento não interagível: {0}")]
    NotInteractable(String),

    #[error("estratégia não suportada: {0}")]
    Unsupported(String),

    #[error("valor esperado '{expected}', obtido '{actual}'")]
    ValueMismatch { expected: String, actual: String },

    #[error("controle desabilitado")]
    Disabled,

    #[error("ação rejeitada pela aplicação: {0}")]
    Rejected(String),

    #[error("query inválida: {0}")]
    InvalidQuery(String),

    #[error("driver não inicializado")]
    NotReady,
}

impl DriverError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            ms: after.as_millis() as u64,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } | Self::Network(_) | Self::Protocol(_) | Self::Detached => {
                ErrorClass::Transient
            }
            Self::Intercepted(_)
            | Self::NotInteractable(_)
            | Self::Unsupported(_)
            | Self::ValueMismatch { .. } => ErrorClass::StrategySpecific,
            Self::Disabled | Self::Rejected(_) | Self::InvalidQuery(_) | Self::NotReady => {
                ErrorClass::Permanent
            }
        }
    }

    /// Classe de falha usada no histórico de tentativas.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Timeout { .. } | Self::Detached => Some(FailureKind::Timeout),
            Self::Network(_) | Self::Protocol(_) => Some(FailureKind::TransientNetwork),
            Self::Disabled | Self::Rejected(_) | Self::InvalidQuery(_) | Self::NotReady => {
                Some(FailureKind::ActionRejected)
            }
            Self::Intercepted(_)
            | Self::NotInteractable(_)
            | Self::Unsupported(_)
            | Self::ValueMismatch { .. } => None,
        }
    }
}

/// Por que um candidato não casou.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", content = "detail", rename_all = "snake_case")]
pub enum MatchFailure {
    /// Nenhum elemento no documento.
    Absent,
    /// Presente mas invisível.
    Hidden,
    /// Visível mas desabilitado.
    Disabled,
    /// A própria query falhou (ex: seletor malformado).
    QueryFailed(String),
}

impl MatchFailure {
    /// Quanto mais perto de casar, maior.
    fn closeness(&self) -> u8 {
        match self {
            Self::QueryFailed(_) | Self::Absent => 0,
            Self::Hidden => 1,
            Self::Disabled => 2,
        }
    }
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "ausente"),
            Self::Hidden => write!(f, "oculto"),
            Self::Disabled => write!(f, "desabilitado"),
            Self::QueryFailed(e) => write!(f, "query falhou: {}", e),
        }
    }
}

/// Contrato do colaborador de automação de browser.
///
/// Implementações: `ScriptedDriver` (documento em memória) e, com a
/// feature `chromium`, `ChromiumDriver`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Todos os elementos que casam com a query, na ordem do documento.
    async fn query(&self, query: &Query) -> Result<Vec<ElementHandle>, DriverError>;

    /// Estado atual de um elemento.
    async fn state(&self, handle: &ElementHandle) -> Result<ElementState, DriverError>;

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
    }

    /// Espera até que algum elemento da query satisfaça `requirement`.
    ///
    /// A implementação padrão sonda `query` + `state` a cada
    /// `poll_interval`. Erro da query encerra a espera na hora.
    async fn wait_for(
        &self,
        query: &Query,
        requirement: Requirement,
        timeout: Duration,
    ) -> Result<ElementHandle, MatchFailure> {
        let deadline = Instant::now() + timeout;
        let mut observed = MatchFailure::Absent;

        loop {
            let handles = self
                .query(query)
                .await
                .map_err(|e| MatchFailure::QueryFailed(e.to_string()))?;

            for handle in handles {
                // Elemento que sumiu entre a query e o estado conta como ausente.
                let Ok(state) = self.state(&handle).await else {
                    continue;
                };
                if requirement.is_met(&state) {
                    return Ok(handle);
                }
                let seen = if !state.attached {
                    MatchFailure::Absent
                } else if !state.visible {
                    MatchFailure::Hidden
                } else {
                    MatchFailure::Disabled
                };
                if seen.closeness() > observed.closeness() {
                    observed = seen;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(observed);
            }
            sleep(self.poll_interval().min(deadline - now)).await;
        }
    }

    async fn click(
        &mut self,
        handle: &ElementHandle,
        strategy: Strategy,
    ) -> Result<(), DriverError>;

    async fn fill(
        &mut self,
        handle: &ElementHandle,
        text: &str,
        strategy: Strategy,
    ) -> Result<(), DriverError>;

    async fn set_files(
        &mut self,
        handle: &ElementHandle,
        paths: &[PathBuf],
        strategy: Strategy,
    ) -> Result<(), DriverError>;

    async fn press(
        &mut self,
        handle: &ElementHandle,
        key: &str,
        strategy: Strategy,
    ) -> Result<(), DriverError>;

    /// Valor atual de um campo, usado para verificar o fill.
    async fn value(&self, handle: &ElementHandle) -> Result<String, DriverError>;

    async fn navigate(
        &mut self,
        url: &str,
        wait_until: LoadState,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Captura visual (PNG) da página atual.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
}
