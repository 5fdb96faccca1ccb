//! # Resolver de Candidatos
//!
//! Transforma uma `CandidateList` em **um** alvo vivo.
//!
//! ## Algoritmo:
//!
//! 1. Percorre os candidatos estritamente em ordem de prioridade
//! 2. Para cada um, espera até `per_candidate_timeout` pelo requisito
//!    (presente / visível / habilitado)
//! 3. Retorna no **primeiro** que casar
//! 4. Se nenhum casar, retorna `NotFound` com o motivo de cada um
//!
//! ## Atenção ao curto-circuito:
//!
//! Um candidato "last-resort" que casa rápido vence um mais específico
//! listado depois dele. O resolver não reordena nada: quem monta a lista
//! deve colocar os candidatos mais confiáveis primeiro.
//!
//! O resolver só lê o documento; nunca o altera.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::candidate::{CandidateList, CandidateTag, Query};
use crate::driver::{Driver, ElementHandle, MatchFailure, Requirement};

/// Alvo resolvido. Vale apenas para a operação que o pediu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub handle: ElementHandle,
    /// Índice válido na lista que produziu este alvo.
    pub rank: usize,
    pub tag: Option<CandidateTag>,
    pub query: Query,
}

/// Resultado da sondagem de um candidato.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateAttempt {
    pub rank: usize,
    pub tag: Option<CandidateTag>,
    pub query: String,
    pub failure: MatchFailure,
}

impl fmt::Display for CandidateAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} ({})", self.rank, self.query, self.failure)
    }
}

/// Nenhum candidato casou; um registro por candidato, em ordem.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("nenhum candidato encontrou '{target}': {}", summarize(.tried))]
pub struct NotFound {
    pub target: String,
    pub tried: Vec<CandidateAttempt>,
}

impl NotFound {
    pub fn ranks(&self) -> Vec<usize> {
        self.tried.iter().map(|a| a.rank).collect()
    }
}

fn summarize(tried: &[CandidateAttempt]) -> String {
    tried
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve a lista contra o documento vivo.
#[instrument(skip_all, fields(alvo = %candidates.description(), requirement = ?requirement))]
pub async fn resolve<D: Driver + ?Sized>(
    driver: &D,
    candidates: &CandidateList,
    requirement: Requirement,
    per_candidate_timeout: Duration,
) -> Result<ResolvedTarget, NotFound> {
    let mut tried = Vec::with_capacity(candidates.len());

    for (rank, candidate) in candidates.ranked() {
        match driver
            .wait_for(&candidate.query, requirement, per_candidate_timeout)
            .await
        {
            Ok(handle) => {
                debug!(rank = rank, query = %candidate.query, "Candidato casou");
                return Ok(ResolvedTarget {
                    handle,
                    rank,
                    tag: candidate.tag,
                    query: candidate.query.clone(),
                });
            }
            Err(failure) => {
                debug!(
                    rank = rank,
                    query = %candidate.query,
                    failure = %failure,
                    "Candidato falhou"
                );
                tried.push(CandidateAttempt {
                    rank,
                    tag: candidate.tag,
                    query: candidate.query.to_string(),
                    failure,
                });
            }
        }
    }

    Err(NotFound {
        target: candidates.description().to_string(),
        tried,
    })
}
