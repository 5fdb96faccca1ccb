//! # Módulo de Carregamento - Leitura de Cenários
//!
//! Lê um arquivo de cenário do disco e converte o JSON em `Scenario`.
//! Erros de leitura e de parse vêm com o caminho do arquivo no contexto.
//!
//! ## Exemplo de uso:
//!
//! ```rust,no_run
//! use resilient_runner::loader::load_scenario_from_file;
//!
//! let scenario = load_scenario_from_file("./scenarios/login.json")?;
//! println!("Cenário carregado: {}", scenario.meta.name);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::protocol::Scenario;

/// Carrega um cenário de um arquivo JSON.
///
/// ## Exemplos de erro:
/// - "Failed to read scenario file" → arquivo não existe ou sem permissão
/// - "Failed to parse scenario JSON" → JSON malformado ou estrutura inválida
pub fn load_scenario_from_file<P: AsRef<Path>>(path: P) -> Result<Scenario> {
    let path_ref = path.as_ref();

    let content = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read scenario file {:?}", path_ref))?;

    let scenario = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse scenario JSON {:?}", path_ref))?;

    Ok(scenario)
}
