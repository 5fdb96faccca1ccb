//! # Driver Chromium (CDP)
//!
//! Implementação real do `Driver` sobre `chromiumoxide`. Disponível com a
//! feature `chromium`.
//!
//! Handles são atributos `data-rr-handle` gravados nos elementos na hora da
//! query. Se o elemento sair do DOM, o handle deixa de resolver e as
//! operações devolvem `Detached`.
//!
//! ## Estratégias:
//!
//! | Estratégia | click                          | fill                        |
//! |------------|--------------------------------|-----------------------------|
//! | standard   | mouse real, com hit-test       | foco + digitação            |
//! | forced     | `el.click()` sem hit-test      | atribui `value` + `input`   |
//! | script     | `MouseEvent` despachado        | setter nativo + `change`    |
//!
//! ## Navegação:
//!
//! `navigate` manda `Page.navigate` direto e acompanha `document.readyState`:
//! `domcontentloaded` aceita `interactive`, `load` exige `complete` e
//! `networkidle` ainda espera a rede ficar quieta.
//!
//! ## Variáveis de ambiente:
//! - `CHROME_BIN`: caminho de um binário Chrome/Chromium específico

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info};

use super::{Driver, DriverError, ElementHandle, ElementState, LoadState, Strategy};
use crate::candidate::Query;

const HANDLE_ATTR: &str = "data-rr-handle";

/// Quanto tempo a rede precisa ficar quieta para contar como `networkidle`.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

pub struct ChromiumDriver {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptReply<T> {
    Ok { ok: T },
    Err { error: String },
}

impl ChromiumDriver {
    /// Sobe um Chromium (headless por padrão) com uma aba em branco.
    pub async fn launch(headed: bool) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder().no_sandbox();
        if headed {
            builder = builder.with_head();
        }
        if let Ok(chrome_bin) = std::env::var("CHROME_BIN") {
            info!(chrome_bin = %chrome_bin, "Usando binário Chrome customizado");
            builder = builder.chrome_executable(chrome_bin);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Configuração do browser inválida: {}", e))?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Erro no handler do browser (ignorado): {}", e);
                }
            }
            debug!("Handler do browser encerrado");
        });

        let page = browser.new_page("about:blank").await?;
        info!(headed, "Chromium iniciado");

        Ok(Self {
            browser,
            handler_task,
            page,
        })
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.browser.close().await?;
        self.handler_task.await?;
        Ok(())
    }

    /// Avalia um script que devolve `{ ok }` ou `{ error }`.
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, DriverError> {
        let reply: ScriptReply<T> = self
            .page
            .evaluate(script)
            .await
            .map_err(cdp_error)?
            .into_value()
            .map_err(|e| DriverError::Protocol(e.to_string()))?;

        match reply {
            ScriptReply::Ok { ok } => Ok(ok),
            ScriptReply::Err { error } => Err(script_error(error)),
        }
    }

    /// Executa `body` com `el` ligado ao elemento do handle.
    async fn on_element<T: DeserializeOwned>(
        &self,
        handle: &ElementHandle,
        body: &str,
    ) -> Result<T, DriverError> {
        self.eval(format!(
            r#"(() => {{
                const el = document.querySelector({selector});
                if (!el) return {{ error: "detached" }};
                try {{ {body} }} catch (e) {{ return {{ error: String(e) }}; }}
            }})()"#,
            selector = js_string(&handle_selector(handle)),
        ))
        .await
    }

    async fn element(&self, handle: &ElementHandle) -> Result<Element, DriverError> {
        self.page
            .find_element(handle_selector(handle))
            .await
            .map_err(|_| DriverError::Detached)
    }

    /// Checagens da estratégia standard: habilitado e sem nada por cima.
    async fn preflight(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        self.on_element::<bool>(
            handle,
            r#"
            if (el.disabled || el.getAttribute("aria-disabled") === "true") return { error: "disabled" };
            el.scrollIntoView({ block: "center", inline: "center" });
            const r = el.getBoundingClientRect();
            if (r.width === 0 || r.height === 0) return { error: "not_interactable: sem área visível" };
            const hit = document.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
            if (hit && hit !== el && !el.contains(hit)) {
                const desc = hit.tagName.toLowerCase() + (hit.id ? "#" + hit.id : "") +
                    (hit.className && typeof hit.className === "string" ? "." + hit.className.split(" ").join(".") : "");
                return { error: "intercepted: " + desc };
            }
            return { ok: true };
            "#,
        )
        .await
        .map(|_| ())
    }

    async fn rejects_disabled(&self, handle: &ElementHandle) -> Result<(), DriverError> {
        self.on_element::<bool>(
            handle,
            r#"return (el.disabled || el.getAttribute("aria-disabled") === "true")
                ? { error: "disabled" } : { ok: true };"#,
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn query(&self, query: &Query) -> Result<Vec<ElementHandle>, DriverError> {
        let ids: Vec<String> = self
            .eval(format!(
                r#"(() => {{
                    let found;
                    try {{ found = ({finder})(); }} catch (e) {{ return {{ error: "invalid_query: " + String(e) }}; }}
                    window.__rrSeq = window.__rrSeq || 0;
                    return {{ ok: found.map(el => {{
                        if (!el.hasAttribute("{attr}")) el.setAttribute("{attr}", String(++window.__rrSeq));
                        return el.getAttribute("{attr}");
                    }}) }};
                }})()"#,
                finder = finder(query),
                attr = HANDLE_ATTR,
            ))
            .await?;

        Ok(ids.into_iter().map(ElementHandle::new).collect())
    }

    async fn state(&self, handle: &ElementHandle) -> Result<ElementState, DriverError> {
        #[derive(Deserialize)]
        struct Observed {
            visible: bool,
            enabled: bool,
        }

        let observed: Observed = self
            .on_element(
                handle,
                r#"
                const style = getComputedStyle(el);
                const r = el.getBoundingClientRect();
                const visible = el.isConnected && style.display !== "none" &&
                    style.visibility !== "hidden" && r.width > 0 && r.height > 0;
                const enabled = !el.disabled && el.getAttribute("aria-disabled") !== "true";
                return { ok: { visible, enabled } };
                "#,
            )
            .await?;

        Ok(ElementState {
            attached: true,
            visible: observed.visible,
            enabled: observed.enabled,
        })
    }

    async fn click(
        &mut self,
        handle: &ElementHandle,
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        match strategy {
            Strategy::Standard => {
                self.preflight(handle).await?;
                self.element(handle).await?.click().await.map_err(cdp_error)?;
            }
            Strategy::Forced => {
                self.rejects_disabled(handle).await?;
                self.on_element::<bool>(handle, "el.click(); return { ok: true };")
                    .await?;
            }
            Strategy::Script => {
                self.rejects_disabled(handle).await?;
                self.on_element::<bool>(
                    handle,
                    r#"el.dispatchEvent(new MouseEvent("click", { bubbles: true, cancelable: true, view: window }));
                    return { ok: true };"#,
                )
                .await?;
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
        match strategy {
            Strategy::Standard => {
                self.preflight(handle).await?;
                self.on_element::<bool>(
                    handle,
                    r#"el.focus(); el.value = ""; return { ok: true };"#,
                )
                .await?;
                self.element(handle)
                    .await?
                    .type_str(text)
                    .await
                    .map_err(cdp_error)?;
            }
            Strategy::Forced => {
                self.rejects_disabled(handle).await?;
                self.on_element::<bool>(
                    handle,
                    &format!(
                        r#"el.focus(); el.value = {text};
                        el.dispatchEvent(new Event("input", {{ bubbles: true }}));
                        return {{ ok: true }};"#,
                        text = js_string(text)
                    ),
                )
                .await?;
            }
            Strategy::Script => {
                self.rejects_disabled(handle).await?;
                // Setter nativo: frameworks que interceptam `value` também enxergam a mudança.
                self.on_element::<bool>(
                    handle,
                    &format!(
                        r#"const proto = Object.getPrototypeOf(el);
                        const setter = Object.getOwnPropertyDescriptor(proto, "value")?.set;
                        if (setter) setter.call(el, {text}); else el.value = {text};
                        el.dispatchEvent(new Event("input", {{ bubbles: true }}));
                        el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                        return {{ ok: true }};"#,
                        text = js_string(text)
                    ),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn set_files(
        &mut self,
        handle: &ElementHandle,
        paths: &[PathBuf],
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        if strategy == Strategy::Script {
            return Err(DriverError::Unsupported(
                "upload via script não é possível".to_string(),
            ));
        }
        self.on_element::<bool>(
            handle,
            r#"return (el.tagName === "INPUT" && el.type === "file")
                ? { ok: true } : { error: "rejected: não é um input de arquivo" };"#,
        )
        .await?;
        self.rejects_disabled(handle).await?;

        let element = self.element(handle).await?;
        let params = SetFileInputFilesParams::builder()
            .files(paths.iter().map(|p| p.display().to_string()))
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(DriverError::Protocol)?;
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn press(
        &mut self,
        handle: &ElementHandle,
        key: &str,
        strategy: Strategy,
    ) -> Result<(), DriverError> {
        match strategy {
            Strategy::Standard => {
                self.preflight(handle).await?;
                self.element(handle)
                    .await?
                    .press_key(key)
                    .await
                    .map_err(cdp_error)?;
            }
            Strategy::Forced | Strategy::Script => {
                self.rejects_disabled(handle).await?;
                self.on_element::<bool>(
                    handle,
                    &format!(
                        r#"el.focus();
                        for (const type of ["keydown", "keypress", "keyup"]) {{
                            el.dispatchEvent(new KeyboardEvent(type, {{ key: {key}, bubbles: true }}));
                        }}
                        return {{ ok: true }};"#,
                        key = js_string(key)
                    ),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn value(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        self.on_element(
            handle,
            r#"return { ok: String(el.value ?? el.textContent ?? "") };"#,
        )
        .await
    }

    async fn navigate(
        &mut self,
        url: &str,
        wait_until: LoadState,
        limit: Duration,
    ) -> Result<(), DriverError> {
        let start = Instant::now();
        let left = || limit.saturating_sub(start.elapsed());

        // O documento atual recebe uma marca; o novo documento nasce sem ela.
        let _: bool = self
            .eval(r#"(() => { window.__rrPrevious = true; return { ok: true }; })()"#.to_string())
            .await?;

        // `Page.navigate` cru: volta no commit, sem esperar o load.
        let reply = timeout(left(), self.page.execute(NavigateParams::new(url)))
            .await
            .map_err(|_| DriverError::timeout(limit))?
            .map_err(cdp_error)?;
        if let Some(text) = reply.result.error_text.as_deref() {
            return Err(DriverError::Network(text.to_string()));
        }

        let ready = ready_states(wait_until);
        loop {
            // Durante a troca de documento o eval pode falhar; conta como "ainda não".
            let state: String = self
                .eval(
                    r#"({ ok: window.__rrPrevious ? "previous" : document.readyState })"#
                        .to_string(),
                )
                .await
                .unwrap_or_default();
            if ready.contains(&state.as_str()) {
                break;
            }
            if start.elapsed() >= limit {
                return Err(DriverError::timeout(limit));
            }
            sleep(self.poll_interval()).await;
        }

        if wait_until == LoadState::NetworkIdle {
            let mut last = usize::MAX;
            let mut quiet_since = Instant::now();
            loop {
                let count: usize = self
                    .eval(
                        r#"({ ok: performance.getEntriesByType("resource").length })"#.to_string(),
                    )
                    .await?;
                if count != last {
                    last = count;
                    quiet_since = Instant::now();
                } else if quiet_since.elapsed() >= NETWORK_QUIET {
                    break;
                }
                if start.elapsed() >= limit {
                    return Err(DriverError::timeout(limit));
                }
                sleep(Duration::from_millis(100)).await;
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.page.url().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        self.page
            .screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(cdp_error)
    }
}

fn handle_selector(handle: &ElementHandle) -> String {
    format!("[{}=\"{}\"]", HANDLE_ATTR, handle.id)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Função JS que devolve os elementos da query, em ordem de documento.
fn finder(query: &Query) -> String {
    match query {
        Query::Css(selector) => format!(
            "() => Array.from(document.querySelectorAll({}))",
            js_string(selector)
        ),
        Query::XPath(expr) => format!(
            r#"() => {{
                const r = document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                const out = [];
                for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i));
                return out;
            }}"#,
            js_string(expr)
        ),
        Query::Text(text) => format!(
            r#"() => Array.from(document.querySelectorAll("body *")).filter(el =>
                Array.from(el.childNodes).some(n => n.nodeType === Node.TEXT_NODE && n.textContent.includes({})))"#,
            js_string(text)
        ),
        Query::TestId(id) => format!(
            r#"() => Array.from(document.querySelectorAll('[data-testid="' + CSS.escape({}) + '"]'))"#,
            js_string(id)
        ),
        Query::Placeholder(text) => format!(
            r#"() => Array.from(document.querySelectorAll('[placeholder="' + CSS.escape({}) + '"]'))"#,
            js_string(text)
        ),
        Query::Role { role, name } => format!(
            r#"() => {{
                const role = {role};
                const implicit = {{ button: "button", link: "a[href]", textbox: "input:not([type]),input[type=text],input[type=email],textarea", checkbox: "input[type=checkbox]" }};
                const selector = '[role="' + CSS.escape(role) + '"]' + (implicit[role] ? "," + implicit[role] : "");
                const name = {name};
                return Array.from(document.querySelectorAll(selector)).filter(el => {{
                    if (name === null) return true;
                    const label = el.getAttribute("aria-label") || el.textContent || el.value || "";
                    return label.trim() === name;
                }});
            }}"#,
            role = js_string(role),
            name = name.as_deref().map_or("null".to_string(), js_string),
        ),
    }
}

/// Traduz os marcadores de erro devolvidos pelos scripts.
fn script_error(raw: String) -> DriverError {
    let (kind, detail) = raw.split_once(": ").unwrap_or((raw.as_str(), ""));
    match kind {
        "detached" => DriverError::Detached,
        "disabled" => DriverError::Disabled,
        "intercepted" => DriverError::Intercepted(detail.to_string()),
        "not_interactable" => DriverError::NotInteractable(detail.to_string()),
        "invalid_query" => DriverError::InvalidQuery(detail.to_string()),
        "rejected" => DriverError::Rejected(detail.to_string()),
        _ => DriverError::Protocol(raw),
    }
}

/// Valores de `document.readyState` que satisfazem a condição wait-until.
fn ready_states(wait_until: LoadState) -> &'static [&'static str] {
    match wait_until {
        LoadState::DomContentLoaded => &["interactive", "complete"],
        LoadState::Load | LoadState::NetworkIdle => &["complete"],
    }
}

fn cdp_error(e: CdpError) -> DriverError {
    if let CdpError::Timeout = e {
        return DriverError::Timeout { ms: 0 };
    }
    let message = e.to_string();
    if message.contains("net::ERR_") {
        DriverError::Network(message)
    } else {
        DriverError::Protocol(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_markers() {
        assert_eq!(script_error("detached".into()), DriverError::Detached);
        assert_eq!(
            script_error("intercepted: div#cookie-banner".into()),
            DriverError::Intercepted("div#cookie-banner".into())
        );
        assert!(matches!(
            script_error("TypeError: x is undefined".into()),
            DriverError::Protocol(_)
        ));
    }

    #[test]
    fn test_finder_escapes_input() {
        let js = finder(&Query::css(r#"a[title="x"]"#));
        assert!(js.contains(r#""a[title=\"x\"]""#));
        assert!(finder(&Query::role("button", None)).contains("const name = null"));
    }

    #[test]
    fn test_wait_until_ladder_tightens_ready_state() {
        assert!(ready_states(LoadState::DomContentLoaded).contains(&"interactive"));
        assert!(!ready_states(LoadState::Load).contains(&"interactive"));
        assert_eq!(ready_states(LoadState::NetworkIdle), &["complete"]);
    }
}
