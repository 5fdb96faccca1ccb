// Module: Context
// Scenario variables, interpolation, and the ambient context each operation runs under.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::diagnostics::{DiagnosticSink, NullSink};
use crate::limits::RetryCounter;

static INTERPOLATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_.:-]+)\}").expect("valid interpolation regex")
});

/// Scenario variables. `${name}` reads a variable, `${ENV_NAME}` reads the environment.
#[derive(Debug, Default, Clone)]
pub struct Variables {
    values: HashMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn extend(&mut self, entries: &HashMap<String, Value>) {
        for (k, v) in entries {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Interpolates placeholders like ${token} inside a string.
    pub fn interpolate_str(&self, input: &str) -> Result<String> {
        let mut result = String::with_capacity(input.len());
        let mut last_index = 0;

        for capture in INTERPOLATION_RE.captures_iter(input) {
            let (Some(matched), Some(token)) = (capture.get(0), capture.get(1)) else {
                continue;
            };
            result.push_str(&input[last_index..matched.start()]);
            result.push_str(&self.resolve_token(token.as_str())?);
            last_index = matched.end();
        }

        result.push_str(&input[last_index..]);
        Ok(result)
    }

    /// Recursively interpolates strings inside JSON values.
    pub fn interpolate_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => Ok(Value::String(self.interpolate_str(s)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.interpolate_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut new_map = Map::with_capacity(map.len());
                for (k, v) in map {
                    new_map.insert(k.clone(), self.interpolate_value(v)?);
                }
                Ok(Value::Object(new_map))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Text safe for logs and reports: `${ENV_*}` placeholders stay unresolved.
    pub fn redacted(&self, input: &str) -> String {
        INTERPOLATION_RE
            .replace_all(input, |caps: &regex::Captures| {
                let token = &caps[1];
                if token.starts_with("ENV_") {
                    "***".to_string()
                } else {
                    self.resolve_token(token).unwrap_or_else(|_| caps[0].to_string())
                }
            })
            .into_owned()
    }

    fn resolve_token(&self, token: &str) -> Result<String> {
        if let Some(rest) = token.strip_prefix("ENV_") {
            std::env::var(rest).map_err(|_| anyhow!("Missing environment variable '{}'.", rest))
        } else if let Some(value) = self.values.get(token) {
            match value {
                Value::String(s) => Ok(s.clone()),
                primitive => Ok(primitive.to_string()),
            }
        } else {
            Err(anyhow!("Missing context variable '{}'.", token))
        }
    }
}

/// What an operation runs under: scenario name, snapshot sink, shared
/// retry budget and the scenario deadline.
#[derive(Clone)]
pub struct AutomationContext {
    pub scenario: String,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub retry_budget: Option<Arc<RetryCounter>>,
    pub deadline: Option<Instant>,
}

impl std::fmt::Debug for AutomationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationContext")
            .field("scenario", &self.scenario)
            .field("retry_budget", &self.retry_budget)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Default for AutomationContext {
    fn default() -> Self {
        Self::new("ad-hoc")
    }
}

impl AutomationContext {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            diagnostics: Arc::new(NullSink),
            retry_budget: None,
            deadline: None,
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn with_retry_budget(mut self, counter: Arc<RetryCounter>) -> Self {
        self.retry_budget = Some(counter);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Consumes one retry from the shared budget. Without a budget, always allowed.
    pub fn try_consume_retry(&self) -> bool {
        self.retry_budget
            .as_ref()
            .map_or(true, |counter| counter.try_increment())
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_interpolates_variables() {
        let mut vars = Variables::new();
        vars.set("user", Value::String("ana@example.com".into()));
        vars.set("count", serde_json::json!(3));

        assert_eq!(
            vars.interpolate_str("login ${user} x${count}").unwrap(),
            "login ana@example.com x3"
        );
        assert!(vars.interpolate_str("${missing}").is_err());
    }

    #[test]
    fn test_interpolates_nested_values() {
        let mut vars = Variables::new();
        vars.set("path", Value::String("/tmp/a.pdf".into()));

        let value = vars
            .interpolate_value(&serde_json::json!({"paths": ["${path}"], "n": 1}))
            .unwrap();
        assert_eq!(value["paths"][0], "/tmp/a.pdf");
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_redacted_hides_environment_secrets() {
        let mut vars = Variables::new();
        vars.set("user", Value::String("ana".into()));

        assert_eq!(vars.redacted("${user}:${ENV_PASSWORD}"), "ana:***");
    }

    #[test]
    fn test_retry_budget_is_shared() {
        let counter = Arc::new(RetryCounter::new(1));
        let a = AutomationContext::new("s").with_retry_budget(counter.clone());
        let b = a.clone();

        assert!(a.try_consume_retry());
        assert!(!b.try_consume_retry());
        assert!(AutomationContext::default().try_consume_retry());
    }

    #[tokio::test]
    async fn test_deadline_expiry() {
        let ctx =
            AutomationContext::new("s").with_deadline(Instant::now() + Duration::from_millis(5));
        assert!(!ctx.is_expired());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(ctx.is_expired());
    }
}
