//! The root document: an ordered, name-unique sequence of prompts plus
//! document-level metadata.
//!
//! Prompt order is significant. It defines display order and which prompts
//! are eligible as chat history or template references for a later prompt.

use aiconfig_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::types::{ModelRef, Output, Params, Prompt};

/// Root container holding prompts and document metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub metadata: DocumentMetadata,

    #[serde(default)]
    prompts: Vec<Prompt>,
}

/// Document-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Global parameters, lowest precedence
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Params,

    /// Global settings per model name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, Map<String, Value>>,

    /// Model used by prompts that do not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Model name to backend id overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_parsers: HashMap<String, String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Create an empty document.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_version: Some("latest".to_string()),
            ..Default::default()
        }
    }

    /// Build a document from prompts, rejecting duplicate names.
    pub fn with_prompts(name: impl Into<String>, prompts: Vec<Prompt>) -> AppResult<Self> {
        let mut document = Self::new(name);
        for prompt in prompts {
            document.add_prompt(prompt, None)?;
        }
        Ok(document)
    }

    /// Check structural invariants after loading.
    pub fn validate(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        for prompt in &self.prompts {
            if prompt.name.is_empty() {
                return Err(AppError::Other("Prompt name cannot be empty".to_string()));
            }
            if !seen.insert(prompt.name.as_str()) {
                return Err(AppError::DuplicatePrompt {
                    name: prompt.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// All prompts in document order.
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn prompt_names(&self) -> Vec<&str> {
        self.prompts.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn prompt(&self, name: &str) -> AppResult<&Prompt> {
        self.prompts
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| AppError::prompt_not_found(name))
    }

    fn prompt_mut(&mut self, name: &str) -> AppResult<&mut Prompt> {
        self.prompts
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| AppError::prompt_not_found(name))
    }

    pub fn prompt_index(&self, name: &str) -> AppResult<usize> {
        self.prompts
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| AppError::prompt_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prompts.iter().any(|p| p.name == name)
    }

    /// Add a prompt at `index` (or at the end).
    ///
    /// A duplicate name is rejected and leaves the document untouched.
    pub fn add_prompt(&mut self, prompt: Prompt, index: Option<usize>) -> AppResult<()> {
        if self.contains(&prompt.name) {
            return Err(AppError::DuplicatePrompt { name: prompt.name });
        }

        match index {
            Some(i) if i <= self.prompts.len() => self.prompts.insert(i, prompt),
            Some(i) => {
                return Err(AppError::Other(format!(
                    "Prompt index {} out of bounds (len {})",
                    i,
                    self.prompts.len()
                )))
            }
            None => self.prompts.push(prompt),
        }
        Ok(())
    }

    /// Replace the prompt named `name`, keeping its position.
    ///
    /// Renaming is allowed only to a name no other prompt uses.
    pub fn update_prompt(&mut self, name: &str, prompt: Prompt) -> AppResult<()> {
        let index = self.prompt_index(name)?;
        if prompt.name != name && self.contains(&prompt.name) {
            return Err(AppError::DuplicatePrompt { name: prompt.name });
        }
        self.prompts[index] = prompt;
        Ok(())
    }

    /// Remove and return the named prompt.
    pub fn delete_prompt(&mut self, name: &str) -> AppResult<Prompt> {
        let index = self.prompt_index(name)?;
        Ok(self.prompts.remove(index))
    }

    /// Append an output to the prompt's history.
    pub fn add_output(&mut self, name: &str, output: Output) -> AppResult<()> {
        self.prompt_mut(name)?.outputs.push(output);
        Ok(())
    }

    /// Clear a prompt's output history, returning what was removed.
    pub fn delete_outputs(&mut self, name: &str) -> AppResult<Vec<Output>> {
        Ok(std::mem::take(&mut self.prompt_mut(name)?.outputs))
    }

    pub fn latest_output(&self, name: &str) -> AppResult<Option<&Output>> {
        Ok(self.prompt(name)?.latest_output())
    }

    /// Set a parameter globally, or on one prompt when `prompt` is given.
    pub fn set_parameter(
        &mut self,
        key: impl Into<String>,
        value: Value,
        prompt: Option<&str>,
    ) -> AppResult<()> {
        let params = match prompt {
            Some(name) => &mut self.prompt_mut(name)?.metadata.parameters,
            None => &mut self.metadata.parameters,
        };
        params.insert(key.into(), value);
        Ok(())
    }

    /// Remove a parameter globally or from one prompt.
    pub fn delete_parameter(&mut self, key: &str, prompt: Option<&str>) -> AppResult<Option<Value>> {
        let params = match prompt {
            Some(name) => &mut self.prompt_mut(name)?.metadata.parameters,
            None => &mut self.metadata.parameters,
        };
        Ok(params.remove(key))
    }

    pub fn set_default_model(&mut self, model: Option<String>) {
        self.metadata.default_model = model;
    }

    /// Set model settings globally, or bind the model to one prompt.
    pub fn update_model(
        &mut self,
        model: &str,
        settings: Map<String, Value>,
        prompt: Option<&str>,
    ) -> AppResult<()> {
        match prompt {
            Some(name) => {
                let settings = (!settings.is_empty()).then_some(settings);
                self.prompt_mut(name)?.metadata.model = Some(ModelRef::Detailed {
                    name: model.to_string(),
                    settings,
                });
            }
            None => {
                self.metadata.models.insert(model.to_string(), settings);
            }
        }
        Ok(())
    }

    /// Model a prompt runs against: its own, else the document default.
    pub fn model_name_for(&self, prompt: &Prompt) -> Option<String> {
        prompt
            .model_name()
            .map(str::to_string)
            .or_else(|| self.metadata.default_model.clone())
    }

    /// Global settings for the prompt's model overlaid by the prompt's own.
    pub fn model_settings_for(&self, prompt: &Prompt) -> Map<String, Value> {
        let mut settings = self
            .model_name_for(prompt)
            .and_then(|model| self.metadata.models.get(&model).cloned())
            .unwrap_or_default();

        if let Some(local) = prompt.metadata.model.as_ref().and_then(ModelRef::settings) {
            for (key, value) in local {
                settings.insert(key.clone(), value.clone());
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        Document::with_prompts(
            "sample",
            vec![Prompt::new("p1", "one"), Prompt::new("p2", "two")],
        )
        .unwrap()
    }

    #[test]
    fn test_add_duplicate_rejected_without_mutation() {
        let mut doc = sample();
        let before = doc.clone();

        let result = doc.add_prompt(Prompt::new("p1", "other"), None);
        assert!(matches!(result, Err(AppError::DuplicatePrompt { ref name }) if name == "p1"));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_add_at_index() {
        let mut doc = sample();
        doc.add_prompt(Prompt::new("p0", "zero"), Some(0)).unwrap();
        assert_eq!(doc.prompt_names(), vec!["p0", "p1", "p2"]);
        assert!(doc.add_prompt(Prompt::new("p9", "x"), Some(10)).is_err());
    }

    #[test]
    fn test_update_rename_collision() {
        let mut doc = sample();
        let result = doc.update_prompt("p1", Prompt::new("p2", "clash"));
        assert!(matches!(result, Err(AppError::DuplicatePrompt { .. })));

        doc.update_prompt("p1", Prompt::new("first", "renamed")).unwrap();
        assert_eq!(doc.prompt_names(), vec!["first", "p2"]);
    }

    #[test]
    fn test_delete_missing_prompt() {
        let mut doc = sample();
        assert!(matches!(
            doc.delete_prompt("nope"),
            Err(AppError::PromptNotFound { .. })
        ));
        doc.delete_prompt("p1").unwrap();
        assert_eq!(doc.prompt_names(), vec!["p2"]);
    }

    #[test]
    fn test_outputs_accumulate() {
        let mut doc = sample();
        doc.add_output("p1", Output::execute_result("a")).unwrap();
        doc.add_output("p1", Output::execute_result("b")).unwrap();

        assert_eq!(doc.prompt("p1").unwrap().outputs.len(), 2);
        assert_eq!(doc.latest_output("p1").unwrap().unwrap().text(), "b");

        let removed = doc.delete_outputs("p1").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(doc.latest_output("p1").unwrap().is_none());
    }

    #[test]
    fn test_parameters() {
        let mut doc = sample();
        doc.set_parameter("city", json!("Paris"), None).unwrap();
        doc.set_parameter("city", json!("Lyon"), Some("p2")).unwrap();

        assert_eq!(doc.metadata.parameters["city"], json!("Paris"));
        assert_eq!(
            doc.prompt("p2").unwrap().metadata.parameters["city"],
            json!("Lyon")
        );
        assert_eq!(
            doc.delete_parameter("city", None).unwrap(),
            Some(json!("Paris"))
        );
        assert!(doc.set_parameter("x", json!(1), Some("nope")).is_err());
    }

    #[test]
    fn test_model_settings_overlay() {
        let mut doc = sample();
        let mut global = Map::new();
        global.insert("temperature".to_string(), json!(0.9));
        global.insert("top_p".to_string(), json!(1.0));
        doc.update_model("gpt-4", global, None).unwrap();

        let mut local = Map::new();
        local.insert("temperature".to_string(), json!(0.1));
        doc.update_model("gpt-4", local, Some("p1")).unwrap();

        let p1 = doc.prompt("p1").unwrap().clone();
        let settings = doc.model_settings_for(&p1);
        assert_eq!(settings["temperature"], json!(0.1));
        assert_eq!(settings["top_p"], json!(1.0));
    }

    #[test]
    fn test_default_model_fallback() {
        let mut doc = sample();
        let p1 = doc.prompt("p1").unwrap().clone();
        assert_eq!(doc.model_name_for(&p1), None);

        doc.set_default_model(Some("echo".to_string()));
        assert_eq!(doc.model_name_for(&p1), Some("echo".to_string()));
    }

    #[test]
    fn test_validate_detects_duplicates() {
        let doc: Document = serde_json::from_value(json!({
            "name": "dup",
            "prompts": [
                {"name": "a", "input": "x"},
                {"name": "a", "input": "y"}
            ]
        }))
        .unwrap();
        assert!(matches!(
            doc.validate(),
            Err(AppError::DuplicatePrompt { .. })
        ));
    }
}
