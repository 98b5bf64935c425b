//! Chat history reconstruction (prompt chaining).
//!
//! For a target prompt that remembers chat context, every earlier prompt on
//! the same model that also remembers chat context contributes one
//! request/response pair: its resolved input and the text of its latest
//! output. Backends are not re-invoked; the transcript is rebuilt from the
//! document alone.

use aiconfig_core::AppResult;
use serde::Serialize;
use serde_json::Value;

use crate::document::Document;
use crate::params::binding_for;
use crate::template::resolve_input;
use crate::types::{Output, Params, Prompt};

/// One request/response pair of a reconstructed conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    pub prompt_name: String,
    pub resolved_input: Value,
    /// Latest output text; empty for the target and for prompts never run
    pub output_text: String,
}

/// Ordered resolution plan for one target prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyPlan {
    /// Prior context-carrying prompts, in document order
    pub history: Vec<ChainEntry>,
    /// The target itself, the final request
    pub target: ChainEntry,
}

impl DependencyPlan {
    /// History followed by the target.
    pub fn entries(&self) -> impl Iterator<Item = &ChainEntry> {
        self.history.iter().chain(std::iter::once(&self.target))
    }
}

/// Build the resolution plan for `target`.
///
/// `output_text` extracts text from a prior prompt's latest output; the
/// dispatcher passes the backend's own extractor.
///
/// # Errors
/// [`PromptNotFound`](aiconfig_core::AppError::PromptNotFound) if `target`
/// is not in the document; any template error from resolving an input.
pub fn resolve_dependencies(
    document: &Document,
    target: &str,
    runtime: &Params,
    output_text: &dyn Fn(&Output) -> String,
) -> AppResult<DependencyPlan> {
    let index = document.prompt_index(target)?;
    let prompts = document.prompts();
    let target_prompt = &prompts[index];
    let target_model = document.model_name_for(target_prompt);

    let mut history = Vec::new();
    if target_prompt.remembers_chat_context() {
        for prior in &prompts[..index] {
            if !prior.remembers_chat_context() || document.model_name_for(prior) != target_model {
                continue;
            }
            tracing::trace!("Including '{}' in chat history of '{}'", prior.name, target);

            history.push(ChainEntry {
                prompt_name: prior.name.clone(),
                resolved_input: resolve_prompt_input(document, prior, runtime)?,
                output_text: prior
                    .latest_output()
                    .filter(|output| !output.is_error())
                    .map(output_text)
                    .unwrap_or_default(),
            });
        }
    }

    tracing::debug!(
        "Resolved {} history entries for '{}'",
        history.len(),
        target
    );

    Ok(DependencyPlan {
        history,
        target: ChainEntry {
            prompt_name: target_prompt.name.clone(),
            resolved_input: resolve_prompt_input(document, target_prompt, runtime)?,
            output_text: String::new(),
        },
    })
}

fn resolve_prompt_input(document: &Document, prompt: &Prompt, runtime: &Params) -> AppResult<Value> {
    let binding = binding_for(document, prompt, runtime)?;
    resolve_input(&prompt.input, &binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiconfig_core::AppError;
    use serde_json::json;

    fn text(output: &Output) -> String {
        output.text()
    }

    fn chat_document() -> Document {
        let mut doc = Document::with_prompts(
            "chat",
            vec![
                Prompt::new("p1", "Hello").with_model("M").with_chat_context(true),
                Prompt::new("p2", "Unrelated").with_model("N"),
                Prompt::new("p3", "And then {{topic}}?")
                    .with_model("M")
                    .with_chat_context(true),
            ],
        )
        .unwrap();
        doc.add_output("p1", Output::execute_result("Hi")).unwrap();
        doc
    }

    #[test]
    fn test_dependency_ordering() {
        let doc = chat_document();
        let runtime = json!({"topic": "rust"}).as_object().cloned().unwrap();
        let plan = resolve_dependencies(&doc, "p3", &runtime, &text).unwrap();

        let names: Vec<_> = plan.history.iter().map(|e| e.prompt_name.as_str()).collect();
        assert_eq!(names, vec!["p1"]);
        assert_eq!(plan.history[0].resolved_input, json!("Hello"));
        assert_eq!(plan.history[0].output_text, "Hi");
        assert_eq!(plan.target.resolved_input, json!("And then rust?"));
        assert_eq!(plan.entries().count(), 2);
    }

    #[test]
    fn test_history_in_document_order() {
        let mut doc = chat_document();
        doc.add_prompt(
            Prompt::new("p0", "First").with_model("M").with_chat_context(true),
            Some(0),
        )
        .unwrap();

        let runtime = json!({"topic": "x"}).as_object().cloned().unwrap();
        let plan = resolve_dependencies(&doc, "p3", &runtime, &text).unwrap();
        let names: Vec<_> = plan.history.iter().map(|e| e.prompt_name.as_str()).collect();
        assert_eq!(names, vec!["p0", "p1"]);
        assert_eq!(plan.history[0].output_text, "");
    }

    #[test]
    fn test_no_history_without_flag_on_target() {
        let mut doc = chat_document();
        doc.add_prompt(Prompt::new("p4", "Standalone").with_model("M"), None)
            .unwrap();

        let plan = resolve_dependencies(&doc, "p4", &Params::new(), &text).unwrap();
        assert!(plan.history.is_empty());
        assert_eq!(plan.target.prompt_name, "p4");
    }

    #[test]
    fn test_default_model_counts_as_same_model() {
        let mut doc = Document::with_prompts(
            "defaults",
            vec![
                Prompt::new("a", "one").with_chat_context(true),
                Prompt::new("b", "two").with_model("echo").with_chat_context(true),
            ],
        )
        .unwrap();
        doc.set_default_model(Some("echo".to_string()));

        let plan = resolve_dependencies(&doc, "b", &Params::new(), &text).unwrap();
        assert_eq!(plan.history.len(), 1);
    }

    #[test]
    fn test_failed_prior_run_contributes_no_response() {
        let mut doc = chat_document();
        doc.add_output("p1", Output::error("BackendError", "Backend error: rate limited"))
            .unwrap();

        // Extractor that would leak the error message if it were consulted.
        let leaky = |output: &Output| match output {
            Output::Error(err) => err.evalue.clone(),
            other => other.text(),
        };
        let runtime = json!({"topic": "rust"}).as_object().cloned().unwrap();
        let plan = resolve_dependencies(&doc, "p3", &runtime, &leaky).unwrap();

        assert_eq!(plan.history.len(), 1);
        assert_eq!(plan.history[0].output_text, "");
    }

    #[test]
    fn test_missing_target_propagates() {
        let doc = chat_document();
        let result = resolve_dependencies(&doc, "ghost", &Params::new(), &text);
        assert!(matches!(result, Err(AppError::PromptNotFound { ref name }) if name == "ghost"));
    }

    #[test]
    fn test_unresolved_parameter_propagates() {
        let doc = chat_document();
        let result = resolve_dependencies(&doc, "p3", &Params::new(), &text);
        assert!(matches!(result, Err(AppError::UnresolvedParameter { ref name }) if name == "topic"));
    }
}
