//! # ScriptedDriver - Documento Roteirizado em Memória
//!
//! Implementa o `Driver` sobre um documento declarado em JSON (ou montado
//! em código). Cada elemento tem uma "linha do tempo" de visibilidade e
//! uma lista de falhas roteirizadas, o que permite reproduzir de forma
//! determinística as instabilidades de uma UI real:
//!
//! - elemento que só aparece depois de N ms
//! - overlay que intercepta o clique padrão
//! - fill que não "pega" até usar script
//! - navegação que cai duas vezes e depois carrega
//!
//! ## Exemplo de documento:
//!
//! ```json
//! {
//!   "url": "about:blank",
//!   "elements": [
//!     {
//!       "id": "save",
//!       "tag": "button",
//!       "test_id": "save-btn",
//!       "text": "Salvar",
//!       "visible_after_ms": 300,
//!       "failures": [
//!         { "on": "standard", "error": { "type": "intercepted", "detail": "div.toast" } }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{Driver, DriverError, ElementHandle, ElementState, LoadState, Strategy};
use crate::candidate::Query;

/// Cabeçalho PNG devolvido pelo screenshot roteirizado.
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Falha roteirizada para ações sobre um elemento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRule {
    /// Estratégia afetada. `None` = todas.
    #[serde(default)]
    pub on: Option<Strategy>,
    pub error: DriverError,
    /// Quantas vezes dispara. `None` = sempre.
    #[serde(default)]
    pub times: Option<u32>,
}

/// Falha roteirizada para navegação.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationFailure {
    /// Só afeta URLs que contêm este trecho.
    #[serde(default)]
    pub url_contains: Option<String>,
    pub error: DriverError,
    #[serde(default = "default_times")]
    pub times: u32,
    /// Condição mínima que faz a navegação passar mesmo com falhas restantes.
    #[serde(default)]
    pub unless_wait_until: Option<LoadState>,
}

fn default_times() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_tag() -> String {
    "div".to_string()
}

/// Efeitos colaterais de um clique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClickEffect {
    #[serde(default)]
    pub navigate_to: Option<String>,
    #[serde(default)]
    pub show: Vec<String>,
    #[serde(default)]
    pub hide: Vec<String>,
}

/// Um elemento do documento roteirizado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedElement {
    pub id: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Seletores CSS que casam com este elemento (comparação exata).
    #[serde(default)]
    pub css: Vec<String>,
    #[serde(default)]
    pub xpath: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    /// Entra no DOM após este tempo.
    #[serde(default)]
    pub attached_after_ms: Option<u64>,
    /// Fica visível após este tempo.
    #[serde(default)]
    pub visible_after_ms: Option<u64>,
    /// Nunca fica visível.
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub value: String,
    /// Estratégias cujo fill é ignorado pela página.
    #[serde(default)]
    pub fill_ignored_by: Vec<Strategy>,
    #[serde(default)]
    pub failures: Vec<FailureRule>,
    #[serde(default)]
    pub on_click: Option<ClickEffect>,
}

impl ScriptedElement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: default_tag(),
            css: Vec::new(),
            xpath: Vec::new(),
            text: None,
            test_id: None,
            role: None,
            name: None,
            placeholder: None,
            attached_after_ms: None,
            visible_after_ms: None,
            hidden: false,
            enabled: true,
            value: String::new(),
            fill_ignored_by: Vec::new(),
            failures: Vec::new(),
            on_click: None,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn css(mut self, selector: impl Into<String>) -> Self {
        self.css.push(selector.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn test_id(mut self, id: impl Into<String>) -> Self {
        self.test_id = Some(id.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn visible_after(mut self, after: Duration) -> Self {
        self.visible_after_ms = Some(after.as_millis() as u64);
        self
    }

    pub fn attached_after(mut self, after: Duration) -> Self {
        self.attached_after_ms = Some(after.as_millis() as u64);
        self
    }

    pub fn ignore_fill_by(mut self, strategy: Strategy) -> Self {
        self.fill_ignored_by.push(strategy);
        self
    }

    pub fn fail(mut self, on: Option<Strategy>, error: DriverError, times: Option<u32>) -> Self {
        self.failures.push(FailureRule { on, error, times });
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click = Some(effect);
        self
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::Css(s) => self.css.iter().any(|c| c == s),
            Query::XPath(s) => self.xpath.iter().any(|x| x == s),
            Query::Text(s) => self.text.as_deref().is_some_and(|t| t.contains(s.as_str())),
            Query::TestId(s) => self.test_id.as_deref() == Some(s.as_str()),
            Query::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && name.as_deref().map_or(true, |n| {
                        self.name.as_deref() == Some(n) || self.text.as_deref() == Some(n)
                    })
            }
            Query::Placeholder(s) => self.placeholder.as_deref() == Some(s.as_str()),
        }
    }
}

/// Documento completo, carregável de arquivo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedDocument {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub elements: Vec<ScriptedElement>,
    #[serde(default)]
    pub navigation_failures: Vec<NavigationFailure>,
}

/// Driver sobre um `ScriptedDocument`.
#[derive(Debug)]
pub struct ScriptedDriver {
    origin: Instant,
    url: String,
    elements: Vec<ScriptedElement>,
    navigation_failures: Vec<NavigationFailure>,
    visibility_overrides: HashMap<String, bool>,
    files: HashMap<String, Vec<PathBuf>>,
    history: Vec<String>,
    query_count: Mutex<u32>,
    screenshot_fails: bool,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::from_document(ScriptedDocument::default())
    }

    /// O relógio das linhas do tempo começa aqui.
    pub fn from_document(document: ScriptedDocument) -> Self {
        Self {
            origin: Instant::now(),
            url: if document.url.is_empty() {
                "about:blank".to_string()
            } else {
                document.url
            },
            elements: document.elements,
            navigation_failures: document.navigation_failures,
            visibility_overrides: HashMap::new(),
            files: HashMap::new(),
            history: Vec::new(),
            query_count: Mutex::new(0),
            screenshot_fails: false,
        }
    }

    /// Carrega o documento de um arquivo JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read document fixture {:?}", path_ref))?;
        let document: ScriptedDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse document fixture {:?}", path_ref))?;
        Ok(Self::from_document(document))
    }

    pub fn with_element(mut self, element: ScriptedElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn with_navigation_failure(mut self, failure: NavigationFailure) -> Self {
        self.navigation_failures.push(failure);
        self
    }

    pub fn with_failing_screenshot(mut self) -> Self {
        self.screenshot_fails = true;
        self
    }

    /// Histórico de ações, ex: `click:save:forced`.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn was_called(&self, prefix: &str) -> bool {
        self.history.iter().any(|c| c.starts_with(prefix))
    }

    /// Quantas queries foram feitas ao documento.
    pub fn query_count(&self) -> u32 {
        self.query_count.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn element_value(&self, id: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.value.as_str())
    }

    pub fn element_files(&self, id: &str) -> Option<&[PathBuf]> {
        self.files.get(id).map(Vec::as_slice)
    }

    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn observe(&self, element: &ScriptedElement) -> ElementState {
        let now = self.elapsed_ms();
        let attached = element.attached_after_ms.map_or(true, |t| now >= t);
        let visible = match self.visibility_overrides.get(&element.id) {
            Some(v) => *v,
            None => !element.hidden && element.visible_after_ms.map_or(true, |t| now >= t),
        };
        ElementState {
            attached,
            visible: attached && visible,
            enabled: element.enabled,
        }
    }

    fn validate_query(query: &Query) -> Result<(), DriverError> {
        match query {
            Query::Css(s) => {
                let balanced = s.matches('[').count() == s.matches(']').count()
                    && s.matches('(').count() == s.matches(')').count();
                if s.trim().is_empty() || !balanced {
                    return Err(DriverError::InvalidQuery(s.clone()));
                }
            }
            Query::XPath(s) => {
                if !(s.starts_with('/') || s.starts_with('(')) {
                    return Err(DriverError::InvalidQuery(s.clone()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn index_of(&self, handle: &ElementHandle) -> Result<usize, DriverError> {
        self.elements
            .iter()
            .position(|e| e.id == handle.id)
            .ok_or(DriverError::Detached)
    }

    /// Aplica falhas roteirizadas e checagens de acionabilidade.
    fn actionable(&mut self, idx: usize, strategy: Strategy) -> Result<(), DriverError> {
        let element = &mut self.elements[idx];
        if let Some(pos) = element
            .failures
            .iter()
            .position(|r| r.on.map_or(true, |s| s == strategy) && r.times != Some(0))
        {
            let rule = &mut element.failures[pos];
            if let Some(times) = rule.times.as_mut() {
                *times -= 1;
            }
            return Err(rule.error.clone());
        }

        let state = self.observe(&self.elements[idx]);
        if !state.attached {
            return Err(DriverError::Detached);
        }
        if !state.enabled {
            return Err(DriverError::Disabled);
        }
        if strategy == Strategy::Standard && !state.visible {
            return Err(DriverError::NotInteractable(format!(
                "{} não está visível",
                self.elements[idx].id
            )));
        }
        Ok(())
    }
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn query(&self, query: &Query) -> Result<Vec<ElementHandle>, DriverError> {
        if let Ok(mut count) = self.query_count.lock() {
            *count += 1;
        }
        Self::validate_query(query)?;

        Ok(self
            .elements
            .iter()
            .filter(|e| e.matches(query) && self.observe(e).attached)
            .map(|e| ElementHandle::new(e.id.clone()))
            .collect())
    }

    async fn state(&self, handle: &ElementHandle) -> Result<ElementState, DriverError> {
        let idx = self.index_of(handle)?;
        Ok(self.observe(&self.elements[idx]))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn click(
        &mut self,
        handle: &ElementHandle,
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        let idx = self.index_of(handle)?;
        self.actionable(idx, strategy)?;
        self.history.push(format!("click:{}:{}", handle.id, strategy));

        if let Some(effect) = self.elements[idx].on_click.clone() {
            if let Some(url) = effect.navigate_to {
                self.url = url;
            }
            for id in effect.show {
                self.visibility_overrides.insert(id, true);
            }
            for id in effect.hide {
                self.visibility_overrides.insert(id, false);
            }
        }
        Ok(())
    }

    async fn fill(
        &mut self,
        handle: &ElementHandle,
        text: &str,
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        let idx = self.index_of(handle)?;
        self.actionable(idx, strategy)?;
        self.history.push(format!("fill:{}:{}", handle.id, strategy));

        let element = &mut self.elements[idx];
        if !element.fill_ignored_by.contains(&strategy) {
            element.value = text.to_string();
        }
        Ok(())
    }

    async fn set_files(
        &mut self,
        handle: &ElementHandle,
        paths: &[PathBuf],
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        let idx = self.index_of(handle)?;
        if self.elements[idx].tag != "input" {
            return Err(DriverError::Rejected(format!(
                "{} não é um input de arquivo",
                handle.id
            )));
        }
        // Inputs de arquivo costumam ser ocultos; upload não exige visibilidade.
        let saved = self.visibility_overrides.insert(handle.id.clone(), true);
        let result = self.actionable(idx, strategy);
        match saved {
            Some(v) => self.visibility_overrides.insert(handle.id.clone(), v),
            None => self.visibility_overrides.remove(&handle.id),
        };
        result?;

        self.history.push(format!("set_files:{}:{}", handle.id, strategy));
        self.files.insert(handle.id.clone(), paths.to_vec());
        Ok(())
    }

    async fn press(
        &mut self,
        handle: &ElementHandle,
        key: &str,
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        let idx = self.index_of(handle)?;
        self.actionable(idx, strategy)?;
        self.history.push(format!("press:{}:{}:{}", handle.id, key, strategy));
        Ok(())
    }

    async fn value(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        let idx = self.index_of(handle)?;
        Ok(self.elements[idx].value.clone())
    }

    async fn navigate(
        &mut self,
        url: &str,
        wait_until: LoadState,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.history.push(format!("navigate:{}:{}", url, wait_until));

        let pending = self.navigation_failures.iter_mut().find(|f| {
            f.times > 0
                && f.url_contains.as_deref().map_or(true, |s| url.contains(s))
                && f.unless_wait_until.map_or(true, |min| wait_until < min)
        });
        if let Some(failure) = pending {
            failure.times -= 1;
            return Err(failure.error.clone());
        }

        self.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.url.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        if self.screenshot_fails {
            return Err(DriverError::Unsupported("screenshot".to_string()));
        }
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(self.url.as_bytes());
        Ok(bytes)
    }
}
