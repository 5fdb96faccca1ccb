//! Descritores de ação e resultados do executor resiliente.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::candidate::CandidateList;
use crate::driver::{LoadState, Requirement, Strategy};
use crate::errors::{ErrorContext, FailureKind, StructuredError};
use crate::resolver::NotFound;

/// A ação lógica e seu operando.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click,
    /// Preenche e confere o valor lido de volta.
    Fill { text: String },
    SetFiles { paths: Vec<PathBuf> },
    Press { key: String },
    /// Apenas espera o alvo atingir o requisito.
    WaitFor,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Fill { .. } => "fill",
            Self::SetFiles { .. } => "set_files",
            Self::Press { .. } => "press",
            Self::WaitFor => "wait_for",
        }
    }
}

/// Estado da página verificado depois da ação.
#[derive(Debug, Clone, PartialEq)]
pub enum PostCondition {
    UrlContains(String),
    Visible(CandidateList),
    Hidden(CandidateList),
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UrlContains(s) => write!(f, "url contém '{}'", s),
            Self::Visible(l) => write!(f, "'{}' visível", l.description()),
            Self::Hidden(l) => write!(f, "'{}' oculto", l.description()),
        }
    }
}

/// Uma ação sobre um alvo descrito por candidatos.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDescriptor {
    pub action: Action,
    pub target: CandidateList,
    pub requirement: Requirement,
    pub post_conditions: Vec<PostCondition>,
}

impl ActionDescriptor {
    pub fn new(action: Action, target: CandidateList) -> Self {
        // Upload aceita input oculto; o resto exige visibilidade.
        let requirement = match action {
            Action::SetFiles { .. } => Requirement::Present,
            _ => Requirement::Visible,
        };
        Self {
            action,
            target,
            requirement,
            post_conditions: Vec::new(),
        }
    }

    pub fn click(target: CandidateList) -> Self {
        Self::new(Action::Click, target)
    }

    pub fn fill(target: CandidateList, text: impl Into<String>) -> Self {
        Self::new(Action::Fill { text: text.into() }, target)
    }

    pub fn set_files(target: CandidateList, paths: Vec<PathBuf>) -> Self {
        Self::new(Action::SetFiles { paths }, target)
    }

    pub fn press(target: CandidateList, key: impl Into<String>) -> Self {
        Self::new(Action::Press { key: key.into() }, target)
    }

    pub fn wait_for(target: CandidateList, requirement: Requirement) -> Self {
        Self::new(Action::WaitFor, target).requiring(requirement)
    }

    pub fn requiring(mut self, requirement: Requirement) -> Self {
        self.requirement = requirement;
        self
    }

    pub fn expect(mut self, condition: PostCondition) -> Self {
        self.post_conditions.push(condition);
        self
    }

    /// Nome da operação lógica, ex: `click 'botão salvar'`.
    pub fn label(&self) -> String {
        format!("{} '{}'", self.action.name(), self.target.description())
    }
}

/// Como terminou uma tentativa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    NotFound,
    Timeout,
    TransientNetwork,
    /// A estratégia atual não serve; escalar.
    StrategyRejected,
    ActionRejected,
    /// O prazo do cenário acabou durante a tentativa.
    Cancelled,
}

impl AttemptStatus {
    pub fn cause(&self) -> Option<FailureKind> {
        match self {
            Self::NotFound => Some(FailureKind::NotFound),
            Self::Timeout | Self::Cancelled => Some(FailureKind::Timeout),
            Self::TransientNetwork => Some(FailureKind::TransientNetwork),
            Self::ActionRejected => Some(FailureKind::ActionRejected),
            Self::Succeeded | Self::StrategyRejected => None,
        }
    }
}

/// Classe do último erro de navegação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationErrorClass {
    Network,
    Timeout,
    Protocol,
}

/// Registro de uma tentativa, para diagnóstico.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// `None` em navegação.
    pub strategy: Option<Strategy>,
    /// Contador da estratégia atual (reinicia ao escalar), a partir de 1.
    pub attempt: u32,
    pub timeout_ms: u64,
    /// Espera aplicada antes desta tentativa.
    pub backoff_ms: u64,
    pub elapsed_ms: u64,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<LoadState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Estado de uma chamada `navigate`; descartado ao terminar.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationState {
    pub url: String,
    pub wait_until: LoadState,
    pub attempts: u32,
    pub last_error: Option<NavigationErrorClass>,
}

impl NavigationState {
    pub fn new(url: impl Into<String>, wait_until: LoadState) -> Self {
        Self {
            url: url.into(),
            wait_until,
            attempts: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Success {
    pub operation: String,
    pub strategy: Option<Strategy>,
    /// Tentativa da estratégia vencedora.
    pub attempt: u32,
    pub rank: Option<usize>,
    pub history: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationFailure {
    pub operation: String,
    pub kind: FailureKind,
    /// Classe da última tentativa que falhou.
    pub cause: Option<FailureKind>,
    pub strategies_tried: Vec<Strategy>,
    /// Detalhe por candidato da última resolução que falhou.
    pub candidates: Option<NotFound>,
    pub last_error: Option<String>,
    pub history: Vec<AttemptRecord>,
    pub snapshot: Option<PathBuf>,
}

impl OperationFailure {
    /// Mensagem para o usuário: operação, estratégias e candidatos tentados.
    pub fn user_message(&self) -> String {
        self.to_structured().user_message()
    }

    /// Erro com código, mensagem e o snapshot capturado.
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::new(self.kind.code(), self.details()).with_context(ErrorContext {
            step_id: None,
            snapshot: self.snapshot.as_ref().map(|p| p.display().to_string()),
        })
    }

    fn details(&self) -> String {
        let mut msg = format!(
            "{} falhou ({}) após {} tentativa(s)",
            self.operation,
            self.kind,
            self.history.len()
        );

        if !self.strategies_tried.is_empty() {
            let names: Vec<String> =
                self.strategies_tried.iter().map(ToString::to_string).collect();
            msg.push_str(&format!("; estratégias: {}", names.join(", ")));
        }
        if let Some(nf) = &self.candidates {
            let tried: Vec<String> = nf.tried.iter().map(ToString::to_string).collect();
            msg.push_str(&format!("; candidatos: {}", tried.join(", ")));
        }
        if let Some(cause) = self.cause {
            msg.push_str(&format!("; causa: {}", cause));
        }
        if let Some(err) = &self.last_error {
            msg.push_str(&format!("; último erro: {}", err));
        }
        msg
    }

    /// Resumo em JSON gravado ao lado do snapshot.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for OperationFailure {}

/// Resultado de `execute`/`navigate`.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Succeeded(Success),
    Failed(OperationFailure),
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn history(&self) -> &[AttemptRecord] {
        match self {
            Self::Succeeded(s) => &s.history,
            Self::Failed(f) => &f.history,
        }
    }

    /// Total de tentativas, somando todas as estratégias.
    pub fn attempts(&self) -> u32 {
        self.history().len() as u32
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(f) => Some(f.kind),
        }
    }

    pub fn into_result(self) -> Result<Success, OperationFailure> {
        match self {
            Self::Succeeded(s) => Ok(s),
            Self::Failed(f) => Err(f),
        }
    }
}
