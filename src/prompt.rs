//! Prompt rendering
//!
//! Queries carry either literal text or a reference to a named template.
//! Both may contain `{{variable}}` placeholders which are filled from the
//! query's variables. A placeholder with no value is a validation error,
//! raised before any client is started.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Input for a query: plain text or a template reference
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value")]
pub enum PromptInput {
    /// Plain text prompt, placeholders allowed
    #[serde(rename = "string")]
    String(String),

    /// Named template with parameters
    #[serde(rename = "template")]
    Template(PromptTemplateInput),
}

/// Template reference with parameters
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptTemplateInput {
    /// Template name (e.g. "`code_review`")
    pub name: String,

    /// Parameters; these take precedence over query variables
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl From<&str> for PromptInput {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Turns a prompt input and variables into the text sent to the agent
#[async_trait]
pub trait PromptRenderer: Send + Sync {
    /// Render the prompt
    ///
    /// # Errors
    /// Returns `EngineError::Validation` for unknown templates, missing
    /// variables, malformed placeholders or an empty result
    async fn render(
        &self,
        input: &PromptInput,
        variables: &HashMap<String, String>,
    ) -> Result<String>;
}

/// `{{variable}}` substitution over literal prompts and registered templates
#[derive(Default)]
pub struct TemplateRenderer {
    templates: RwLock<HashMap<String, String>>,
}

impl TemplateRenderer {
    /// Create a renderer with no named templates
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named template
    pub fn register(&self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.write().insert(name.into(), template.into());
    }

    /// Substitute placeholders in `template`
    ///
    /// # Errors
    /// Returns `EngineError::Validation` for an unterminated or empty
    /// placeholder, or a variable with no value
    pub fn substitute(template: &str, variables: &HashMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                EngineError::validation(format!(
                    "unterminated placeholder at byte {}",
                    template.len() - rest.len() + start
                ))
            })?;
            let name = after[..end].trim();
            if name.is_empty() {
                return Err(EngineError::validation("empty placeholder '{{}}'"));
            }
            let value = variables
                .get(name)
                .ok_or_else(|| EngineError::validation(format!("missing variable '{name}'")))?;
            out.push_str(value);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn parameter_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PromptRenderer for TemplateRenderer {
    async fn render(
        &self,
        input: &PromptInput,
        variables: &HashMap<String, String>,
    ) -> Result<String> {
        let rendered = match input {
            PromptInput::String(text) => Self::substitute(text, variables)?,
            PromptInput::Template(reference) => {
                let template = self
                    .templates
                    .read()
                    .get(&reference.name)
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::validation(format!("unknown template '{}'", reference.name))
                    })?;
                let mut merged = variables.clone();
                for (key, value) in &reference.parameters {
                    merged.insert(key.clone(), parameter_to_string(value));
                }
                Self::substitute(&template, &merged)?
            }
        };

        if rendered.trim().is_empty() {
            return Err(EngineError::validation("prompt is empty"));
        }
        Ok(rendered)
    }
}
