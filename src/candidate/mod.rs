//! # Candidatos - Formas de Encontrar um Elemento
//!
//! Um `Candidate` descreve **uma** maneira de localizar o elemento alvo.
//! Uma `CandidateList` é a lista ordenada dessas maneiras: a posição na
//! lista é a prioridade (índice 0 = preferido).
//!
//! ## Para todos entenderem:
//!
//! Interfaces de terceiros mudam o tempo todo. Um botão que hoje tem
//! `data-testid="save"` amanhã pode ter só o texto "Salvar".
//! Então, em vez de apostar em um seletor, listamos vários:
//!
//! ```text
//! #0 [primary]     data-testid=save
//! #1 [fallback]    button:has-text("Salvar")
//! #2 [last-resort] form button[type=submit]
//! ```
//!
//! O resolver tenta na ordem e para no primeiro que funcionar.
//! Por isso a ordem importa: coloque os mais específicos primeiro.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Consulta contra o documento vivo.
///
/// A linguagem concreta é interpretada pelo `Driver`; aqui só
/// carregamos a intenção.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Query {
    /// Seletor CSS.
    Css(String),
    /// Expressão XPath.
    XPath(String),
    /// Texto visível (substring).
    Text(String),
    /// Atributo `data-testid`.
    TestId(String),
    /// Papel ARIA com nome acessível opcional.
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Placeholder de input.
    Placeholder(String),
}

impl Query {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::Placeholder(text.into())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={}", s),
            Self::XPath(s) => write!(f, "xpath={}", s),
            Self::Text(s) => write!(f, "text={}", s),
            Self::TestId(s) => write!(f, "testid={}", s),
            Self::Role { role, name: Some(n) } => write!(f, "role={}[name={}]", role, n),
            Self::Role { role, name: None } => write!(f, "role={}", role),
            Self::Placeholder(s) => write!(f, "placeholder={}", s),
        }
    }
}

/// Rótulo semântico usado apenas em diagnósticos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateTag {
    #[default]
    Primary,
    Fallback,
    LastResort,
}

impl fmt::Display for CandidateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
            Self::LastResort => write!(f, "last-resort"),
        }
    }
}

/// Uma forma de localizar o alvo. Imutável depois de construído.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub query: Query,
    #[serde(default)]
    pub tag: Option<CandidateTag>,
}

impl Candidate {
    pub fn new(query: Query) -> Self {
        Self { query, tag: None }
    }

    pub fn tagged(query: Query, tag: CandidateTag) -> Self {
        Self {
            query,
            tag: Some(tag),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Some(tag) => write!(f, "[{}] {}", tag, self.query),
            None => write!(f, "{}", self.query),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CandidateError {
    #[error("lista de candidatos vazia para '{0}'")]
    Empty(String),
}

/// Lista ordenada e **nunca vazia** de candidatos para um alvo.
///
/// O `description` nomeia o alvo lógico ("botão salvar") e aparece
/// nas mensagens de falha.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList {
    description: String,
    candidates: Vec<Candidate>,
}

impl CandidateList {
    pub fn new(
        description: impl Into<String>,
        candidates: Vec<Candidate>,
    ) -> Result<Self, CandidateError> {
        let description = description.into();
        if candidates.is_empty() {
            return Err(CandidateError::Empty(description));
        }
        Ok(Self {
            description,
            candidates,
        })
    }

    /// Atalho para listas só de queries; a primeira vira `primary`,
    /// a última `last-resort` e as do meio `fallback`.
    pub fn from_queries(
        description: impl Into<String>,
        queries: impl IntoIterator<Item = Query>,
    ) -> Result<Self, CandidateError> {
        let queries: Vec<Query> = queries.into_iter().collect();
        let last = queries.len().saturating_sub(1);
        let candidates = queries
            .into_iter()
            .enumerate()
            .map(|(rank, query)| {
                let tag = match rank {
                    0 => CandidateTag::Primary,
                    r if r == last => CandidateTag::LastResort,
                    _ => CandidateTag::Fallback,
                };
                Candidate::tagged(query, tag)
            })
            .collect();
        Self::new(description, candidates)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Sempre `false`; existe para satisfazer o par `len`/`is_empty`.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, rank: usize) -> Option<&Candidate> {
        self.candidates.get(rank)
    }

    /// Itera em ordem de prioridade com o rank de cada candidato.
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &Candidate)> {
        self.candidates.iter().enumerate()
    }
}
