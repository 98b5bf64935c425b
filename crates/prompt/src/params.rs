//! Parameter merging.
//!
//! Precedence, lowest to highest: references to earlier prompts, document
//! parameters, prompt-local parameters, parameters passed to the run call.
//! Merging is per top-level key; nested objects are replaced, not merged.

use aiconfig_core::AppResult;
use serde_json::{json, Value};

use crate::document::Document;
use crate::types::{Params, Prompt};

/// Merge the three parameter layers into one binding.
///
/// Pure: none of the inputs are modified.
pub fn merge_parameters(global: &Params, prompt: &Params, runtime: &Params) -> Params {
    let mut merged = global.clone();
    for layer in [prompt, runtime] {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Bindings for every prompt preceding position `upto`.
///
/// Each prompt is exposed under its name as `{input, output}`: the stored
/// input text and the text of its latest output (empty when never run).
pub fn prompt_references(document: &Document, upto: usize) -> Params {
    document
        .prompts()
        .iter()
        .take(upto)
        .map(|prompt| {
            let output = prompt.latest_output().map(|o| o.text()).unwrap_or_default();
            (
                prompt.name.clone(),
                json!({ "input": prompt.input.as_text(), "output": output }),
            )
        })
        .collect()
}

/// Full binding used to resolve `prompt`'s input inside `document`.
pub fn binding_for(document: &Document, prompt: &Prompt, runtime: &Params) -> AppResult<Params> {
    let index = document.prompt_index(&prompt.name)?;
    let mut binding = prompt_references(document, index);

    let merged = merge_parameters(
        &document.metadata.parameters,
        &prompt.metadata.parameters,
        runtime,
    );
    for (key, value) in merged {
        binding.insert(key, value);
    }
    Ok(binding)
}

/// Parse `key=value` pairs; values that parse as JSON keep their type.
pub fn parse_assignments<'a>(pairs: impl IntoIterator<Item = &'a str>) -> AppResult<Params> {
    let mut params = Params::new();
    for pair in pairs {
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            aiconfig_core::AppError::Config(format!(
                "Invalid parameter '{}': expected key=value",
                pair
            ))
        })?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Output;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_precedence_law() {
        let merged = merge_parameters(
            &params(json!({"a": "global"})),
            &params(json!({"a": "local", "b": "x"})),
            &params(json!({"a": "call"})),
        );
        assert_eq!(Value::Object(merged), json!({"a": "call", "b": "x"}));
    }

    #[test]
    fn test_nested_objects_replaced() {
        let merged = merge_parameters(
            &params(json!({"cfg": {"x": 1, "y": 2}})),
            &Params::new(),
            &params(json!({"cfg": {"x": 9}})),
        );
        assert_eq!(merged["cfg"], json!({"x": 9}));
    }

    #[test]
    fn test_merge_is_pure() {
        let global = params(json!({"a": 1}));
        let runtime = params(json!({"a": 2}));
        let _ = merge_parameters(&global, &Params::new(), &runtime);
        assert_eq!(global["a"], json!(1));
    }

    #[test]
    fn test_binding_includes_prior_prompts() {
        let mut doc = Document::with_prompts(
            "chain",
            vec![
                Prompt::new("summary", "Summarize {{text}}"),
                Prompt::new("title", "Title for: {{summary.output}}")
                    .with_parameter("style", "short"),
            ],
        )
        .unwrap();
        doc.add_output("summary", Output::execute_result("a summary")).unwrap();

        let title = doc.prompt("title").unwrap().clone();
        let binding = binding_for(&doc, &title, &Params::new()).unwrap();

        assert_eq!(binding["summary"]["output"], json!("a summary"));
        assert_eq!(binding["summary"]["input"], json!("Summarize {{text}}"));
        assert_eq!(binding["style"], json!("short"));
        assert!(!binding.contains_key("title"));
    }

    #[test]
    fn test_failed_run_binds_empty_output() {
        let mut doc = Document::with_prompts(
            "chain",
            vec![Prompt::new("p1", "first"), Prompt::new("p2", "ref={{p1.output}}")],
        )
        .unwrap();
        doc.add_output("p1", Output::execute_result("earlier answer")).unwrap();
        doc.add_output("p1", Output::error("BackendError", "Backend error: rate limited"))
            .unwrap();

        let p2 = doc.prompt("p2").unwrap().clone();
        let binding = binding_for(&doc, &p2, &Params::new()).unwrap();
        assert_eq!(binding["p1"]["output"], json!(""));
    }

    #[test]
    fn test_parameters_shadow_references() {
        let mut doc = Document::with_prompts(
            "shadow",
            vec![Prompt::new("a", "x"), Prompt::new("b", "{{a}}")],
        )
        .unwrap();
        doc.set_parameter("a", json!("param wins"), None).unwrap();

        let b = doc.prompt("b").unwrap().clone();
        let binding = binding_for(&doc, &b, &Params::new()).unwrap();
        assert_eq!(binding["a"], json!("param wins"));
    }

    #[test]
    fn test_parse_assignments() {
        let parsed = parse_assignments(["name=Bo", "n=3", "tags=[\"a\"]"]).unwrap();
        assert_eq!(parsed["name"], json!("Bo"));
        assert_eq!(parsed["n"], json!(3));
        assert_eq!(parsed["tags"], json!(["a"]));
        assert!(parse_assignments(["broken"]).is_err());
    }
}
