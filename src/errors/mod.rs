//! # Módulo de Códigos de Erro Estruturados
//!
//! Define códigos de erro padronizados e a taxonomia de falhas das
//! operações resilientes (resolução de elementos, interações e navegação).
//!
//! ## Para todos entenderem:
//!
//! Quando algo dá errado, este módulo fornece códigos únicos
//! que identificam exatamente o que aconteceu.
//!
//! É como ter um "número do erro" que você pode pesquisar
//! na documentação ou passar para o suporte.
//!
//! ## Categorias de Erro
//!
//! | Faixa  | Categoria       | Descrição                                  |
//! |--------|-----------------|--------------------------------------------|
//! | E1xxx  | Cenário         | Erro no arquivo de cenário                 |
//! | E2xxx  | Resolução       | Nenhum candidato encontrou o elemento      |
//! | E3xxx  | Interação       | Click/fill/upload falhou ou foi rejeitado  |
//! | E4xxx  | Navegação       | Página não carregou                        |
//! | E5xxx  | Interno         | Bug no próprio Runner                      |
//!
//! ## Exemplo:
//!
//! ```text
//! Error E3002: click 'botao salvar' esgotou as tentativas
//!   Estratégias: standard, forced, script
//!   Candidatos: #0 ausente, #1 oculto
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// TAXONOMIA DE FALHAS
// ============================================================================

/// Classe de falha de uma tentativa ou de uma operação inteira.
///
/// `TransientNetwork` aparece apenas no histórico de tentativas: é retentada
/// silenciosamente e, se o orçamento acabar, a operação termina `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Nenhum candidato casou dentro do timeout.
    NotFound,
    /// Elemento encontrado mas a ação/pós-condição não completou a tempo.
    Timeout,
    /// Recusa da aplicação (ex: controle desabilitado). Nunca é retentada.
    ActionRejected,
    /// Falha de rede/navegação, retentada com backoff.
    TransientNetwork,
    /// Orçamento de tentativas e estratégias consumido.
    Exhausted,
}

impl FailureKind {
    /// Código estruturado correspondente à falha terminal.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NO_CANDIDATE_MATCHED,
            Self::Timeout => ErrorCode::ACTION_TIMEOUT,
            Self::ActionRejected => ErrorCode::ACTION_REJECTED,
            Self::TransientNetwork => ErrorCode::NAVIGATION_NETWORK,
            Self::Exhausted => ErrorCode::RETRIES_EXHAUSTED,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::ActionRejected => "action_rejected",
            Self::TransientNetwork => "transient_network",
            Self::Exhausted => "exhausted",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

/// Código de erro estruturado com categoria e número.
///
/// O código é um número de 4 dígitos onde:
/// - Primeiro dígito: categoria (1-5)
/// - Últimos 3 dígitos: erro específico (001-999)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // ========================================================================
    // E1xxx: Cenário
    // ========================================================================

    /// Cenário sem steps.
    pub const EMPTY_SCENARIO: Self = Self(1001);

    /// Versão de formato não suportada.
    pub const UNSUPPORTED_SPEC_VERSION: Self = Self(1002);

    /// Action desconhecida no step.
    pub const UNKNOWN_ACTION: Self = Self(1003);

    /// Parâmetro obrigatório ausente.
    pub const MISSING_PARAM: Self = Self(1004);

    /// Lista de candidatos vazia.
    pub const EMPTY_CANDIDATES: Self = Self(1005);

    /// Política inválida (backoff decrescente, sem estratégias...).
    pub const INVALID_POLICY: Self = Self(1006);

    /// IDs de step duplicados.
    pub const DUPLICATE_STEP_ID: Self = Self(1007);

    /// JSON inválido no cenário.
    pub const INVALID_SCENARIO_FORMAT: Self = Self(1009);

    // ========================================================================
    // E2xxx: Resolução
    // ========================================================================

    /// Nenhum candidato casou.
    pub const NO_CANDIDATE_MATCHED: Self = Self(2001);

    // ========================================================================
    // E3xxx: Interação
    // ========================================================================

    /// Ação ou pós-condição não completou a tempo.
    pub const ACTION_TIMEOUT: Self = Self(3001);

    /// Tentativas e estratégias esgotadas.
    pub const RETRIES_EXHAUSTED: Self = Self(3002);

    /// Aplicação recusou a ação.
    pub const ACTION_REJECTED: Self = Self(3003);

    // ========================================================================
    // E4xxx: Navegação
    // ========================================================================

    /// Falha de rede durante navegação.
    pub const NAVIGATION_NETWORK: Self = Self(4001);

    /// URL inválida.
    pub const INVALID_URL: Self = Self(4002);

    // ========================================================================
    // E5xxx: Interno
    // ========================================================================

    /// Executor não encontrado para action.
    pub const NO_EXECUTOR_FOR_ACTION: Self = Self(5002);

    /// Falha ao gravar diagnóstico.
    pub const DIAGNOSTIC_WRITE: Self = Self(5003);

    /// Retorna o código formatado com prefixo "E".
    ///
    /// Exemplo: ErrorCode::EMPTY_SCENARIO.formatted() == "E1001"
    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    /// Retorna uma descrição curta do erro.
    pub fn description(&self) -> &'static str {
        match self.0 {
            1001 => "Cenário vazio",
            1002 => "Versão de formato não suportada",
            1003 => "Action desconhecida",
            1004 => "Parâmetro obrigatório ausente",
            1005 => "Lista de candidatos vazia",
            1006 => "Política inválida",
            1007 => "ID de step duplicado",
            1009 => "Formato de cenário inválido",
            2001 => "Nenhum candidato encontrado",
            3001 => "Timeout na ação",
            3002 => "Tentativas esgotadas",
            3003 => "Ação rejeitada",
            4001 => "Erro de rede na navegação",
            4002 => "URL inválida",
            5002 => "Executor não encontrado",
            5003 => "Falha ao gravar diagnóstico",
            _ => "Erro desconhecido",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

// ============================================================================
// ERRO ESTRUTURADO
// ============================================================================

/// Erro estruturado com código, mensagem e contexto.
#[derive(Debug)]
pub struct StructuredError {
    /// Código do erro.
    pub code: ErrorCode,
    /// Mensagem detalhada.
    pub message: String,
    /// Contexto adicional (step_id, snapshot).
    pub context: Option<ErrorContext>,
}

/// Contexto adicional do erro.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// ID do step onde ocorreu o erro.
    pub step_id: Option<String>,
    /// Caminho do snapshot de diagnóstico, se capturado.
    pub snapshot: Option<String>,
}

impl StructuredError {
    /// Cria um novo erro estruturado.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Adiciona contexto ao erro.
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Adiciona step_id ao contexto.
    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.step_id = Some(step_id.into());
        self
    }

    /// Formata o erro para exibição ao usuário.
    pub fn user_message(&self) -> String {
        let mut msg = format!("[{}] {}", self.code, self.message);

        if let Some(ctx) = &self.context {
            if let Some(step_id) = &ctx.step_id {
                msg.push_str(&format!(" (step: {})", step_id));
            }
            if let Some(snapshot) = &ctx.snapshot {
                msg.push_str(&format!(" [snapshot: {}]", snapshot));
            }
        }

        msg
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for StructuredError {}
