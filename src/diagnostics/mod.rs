//! # Diagnóstico em Falha Terminal
//!
//! Quando uma operação resiliente termina em falha, o executor captura
//! um snapshot (screenshot + resumo JSON) e entrega a um `DiagnosticSink`.
//!
//! A captura é best-effort: um erro aqui é registrado com `warn!` e
//! nunca substitui a falha original.
//!
//! ## Arquivos gerados pelo `FileSnapshotSink`:
//!
//! ```text
//! snapshots/
//!   click-salvar-20250101T120000Z-<uuid>.png
//!   click-salvar-20250101T120000Z-<uuid>.json   # url, sha256, falha, histórico
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// O que foi capturado no momento da falha.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Nome da operação que falhou.
    pub label: String,
    pub url: Option<String>,
    /// PNG; `None` se o screenshot falhou.
    pub image: Option<Vec<u8>>,
    pub summary: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(label: impl Into<String>, summary: serde_json::Value) -> Self {
        Self {
            label: label.into(),
            url: None,
            image: None,
            summary,
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("falha de E/S ao gravar snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("falha ao serializar resumo: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destino dos snapshots.
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    /// Grava o snapshot e devolve onde ficou, se em disco.
    async fn capture(&self, snapshot: Snapshot) -> Result<Option<PathBuf>, DiagnosticError>;
}

/// Descarta tudo.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl DiagnosticSink for NullSink {
    async fn capture(&self, _snapshot: Snapshot) -> Result<Option<PathBuf>, DiagnosticError> {
        Ok(None)
    }
}

/// Guarda em memória; usado em testes.
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DiagnosticSink for MemorySink {
    async fn capture(&self, snapshot: Snapshot) -> Result<Option<PathBuf>, DiagnosticError> {
        if let Ok(mut list) = self.snapshots.lock() {
            list.push(snapshot);
        }
        Ok(None)
    }
}

/// Grava PNG + JSON num diretório.
#[derive(Debug, Clone)]
pub struct FileSnapshotSink {
    dir: PathBuf,
}

#[derive(Serialize)]
struct Sidecar<'a> {
    label: &'a str,
    url: Option<&'a str>,
    captured_at: DateTime<Utc>,
    image: Option<String>,
    image_sha256: Option<String>,
    failure: &'a serde_json::Value,
}

impl FileSnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Nome de arquivo seguro a partir do rótulo da operação.
    fn slug(label: &str) -> String {
        let mut slug = String::with_capacity(label.len());
        for c in label.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_matches('-');
        if slug.is_empty() {
            "operation".to_string()
        } else {
            slug.chars().take(48).collect()
        }
    }
}

#[async_trait]
impl DiagnosticSink for FileSnapshotSink {
    async fn capture(&self, snapshot: Snapshot) -> Result<Option<PathBuf>, DiagnosticError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let stem = format!(
            "{}-{}-{}",
            Self::slug(&snapshot.label),
            snapshot.captured_at.format("%Y%m%dT%H%M%SZ"),
            Uuid::new_v4()
        );

        let mut image_name = None;
        let mut digest = None;
        if let Some(bytes) = &snapshot.image {
            let name = format!("{}.png", stem);
            tokio::fs::write(self.dir.join(&name), bytes).await?;
            digest = Some(format!("{:x}", Sha256::digest(bytes)));
            image_name = Some(name);
        }

        let sidecar = Sidecar {
            label: &snapshot.label,
            url: snapshot.url.as_deref(),
            captured_at: snapshot.captured_at,
            image: image_name.clone(),
            image_sha256: digest,
            failure: &snapshot.summary,
        };
        let json_path = self.dir.join(format!("{}.json", stem));
        tokio::fs::write(&json_path, serde_json::to_vec_pretty(&sidecar)?).await?;

        let path = match image_name {
            Some(name) => self.dir.join(name),
            None => json_path,
        };
        debug!(path = %path.display(), "Snapshot gravado");
        Ok(Some(path))
    }
}
