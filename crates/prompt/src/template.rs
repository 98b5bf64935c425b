//! Template resolution for `{{placeholder}}` syntax.
//!
//! Simple placeholders (`{{name}}`, `{{step.output}}`) are resolved here so
//! that missing keys fail with [`AppError::UnresolvedParameter`], structured
//! values are substituted as JSON text, and a template consisting of a single
//! placeholder yields the raw typed value. Anything else between double
//! braces (block helpers, comments) is handed to Handlebars in strict mode.
//!
//! Substituted values are never re-scanned for placeholders.

use aiconfig_core::{AppError, AppResult};
use handlebars::{Handlebars, RenderErrorReason};
use serde_json::Value;

use crate::types::{Params, PromptInput};

/// Keywords that look like paths but are Handlebars syntax.
const RESERVED: &[&str] = &["else", "this"];

#[derive(Debug, Clone, PartialEq)]
enum Segment<'a> {
    Literal(&'a str),
    /// `\{{`, emitted literally
    Escaped,
    /// Simple path outside any block helper
    Placeholder(&'a str),
    /// Simple path inside a block helper; Handlebars resolves it in the
    /// block's own context
    Scoped { path: &'a str, raw: &'a str },
    Expression(&'a str),
}

/// Resolve `template` against `bindings`, always producing a string.
///
/// # Example
/// ```
/// use aiconfig_prompt::template::resolve;
/// use serde_json::json;
///
/// let mut bindings = serde_json::Map::new();
/// bindings.insert("name".to_string(), json!("Bo"));
/// assert_eq!(resolve("Hello {{name}}", &bindings).unwrap(), "Hello Bo");
/// ```
pub fn resolve(template: &str, bindings: &Params) -> AppResult<String> {
    Ok(match resolve_value(template, bindings)? {
        Value::String(s) => s,
        other => stringify(&other),
    })
}

/// Resolve `template` against `bindings`.
///
/// When the whole template is a single placeholder the bound value is
/// returned with its JSON type intact; otherwise the result is a string.
pub fn resolve_value(template: &str, bindings: &Params) -> AppResult<Value> {
    let segments = tokenize(template);

    if let [Segment::Placeholder(path)] = segments.as_slice() {
        return lookup(bindings, path).cloned();
    }

    let has_expressions = segments
        .iter()
        .any(|s| matches!(s, Segment::Expression(_) | Segment::Scoped { .. }));

    if has_expressions {
        render_with_handlebars(&segments, bindings).map(Value::String)
    } else {
        substitute(&segments, bindings).map(Value::String)
    }
}

/// Paths of every simple placeholder in `template`, in order.
///
/// Paths inside block helpers are relative to the block's context.
pub fn placeholders(template: &str) -> Vec<String> {
    tokenize(template)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Placeholder(path) | Segment::Scoped { path, .. } => Some(path.to_string()),
            _ => None,
        })
        .collect()
}

/// Resolve a prompt input.
///
/// Text inputs resolve as a template. Structured inputs resolve every string
/// leaf of `data`; attachments are left untouched.
pub fn resolve_input(input: &PromptInput, bindings: &Params) -> AppResult<Value> {
    match input {
        PromptInput::Text(text) => resolve_value(text, bindings),
        PromptInput::Structured(structured) => resolve_leaves(&structured.data, bindings),
    }
}

fn resolve_leaves(value: &Value, bindings: &Params) -> AppResult<Value> {
    Ok(match value {
        Value::String(s) => resolve_value(s, bindings)?,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_leaves(item, bindings))
                .collect::<AppResult<_>>()?,
        ),
        Value::Object(obj) => {
            let mut out = serde_json::Map::with_capacity(obj.len());
            for (key, item) in obj {
                out.insert(key.clone(), resolve_leaves(item, bindings)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// Text form used when a value is spliced into surrounding text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tokenize(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut pos = 0;
    let mut scan = 0;
    let mut depth = 0usize;

    while let Some(offset) = template[scan..].find("{{") {
        let start = scan + offset;

        if start > 0 && template.as_bytes()[start - 1] == b'\\' {
            push_literal(&mut segments, &template[pos..start - 1]);
            segments.push(Segment::Escaped);
            pos = start + 2;
            scan = pos;
            continue;
        }

        let (open, close) = if template[start..].starts_with("{{{") {
            (3, "}}}")
        } else {
            (2, "}}")
        };

        // An unmatched `{{` stays literal; scanning resumes after it.
        let end = match template[start + open..].find(close) {
            Some(end) if !template[start + open..start + open + end].contains("{{") => end,
            _ => {
                scan = start + 2;
                continue;
            }
        };
        let inner = &template[start + open..start + open + end];
        let raw = &template[start..start + open + end + close.len()];

        push_literal(&mut segments, &template[pos..start]);
        let expr = inner.trim().trim_matches('~').trim();
        if is_simple_path(expr) {
            if depth == 0 {
                segments.push(Segment::Placeholder(expr));
            } else {
                segments.push(Segment::Scoped { path: expr, raw });
            }
        } else {
            if expr.starts_with('#') {
                depth += 1;
            } else if expr.starts_with('/') {
                depth = depth.saturating_sub(1);
            }
            segments.push(Segment::Expression(raw));
        }
        pos = start + open + end + close.len();
        scan = pos;
    }

    push_literal(&mut segments, &template[pos..]);
    segments
}

fn push_literal<'a>(segments: &mut Vec<Segment<'a>>, text: &'a str) {
    if !text.is_empty() {
        segments.push(Segment::Literal(text));
    }
}

fn is_simple_path(expr: &str) -> bool {
    let head = expr.split('.').next().unwrap_or_default();
    if expr.is_empty() || RESERVED.contains(&head) {
        return false;
    }
    expr.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    })
}

fn lookup<'a>(bindings: &'a Params, path: &str) -> AppResult<&'a Value> {
    let unresolved = || AppError::UnresolvedParameter {
        name: path.to_string(),
    };

    let mut parts = path.split('.');
    let head = parts.next().ok_or_else(unresolved)?;
    let mut current = bindings.get(head).ok_or_else(unresolved)?;

    for part in parts {
        current = match current {
            Value::Object(obj) => obj.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(unresolved)?;
    }
    Ok(current)
}

fn substitute(segments: &[Segment<'_>], bindings: &Params) -> AppResult<String> {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Escaped => out.push_str("{{"),
            Segment::Placeholder(path) => out.push_str(&stringify(lookup(bindings, path)?)),
            Segment::Scoped { raw, .. } | Segment::Expression(raw) => out.push_str(raw),
        }
    }
    Ok(out)
}

/// Render a template containing block helpers.
///
/// Top-level placeholders are pre-resolved into synthetic bindings so they
/// keep the strict, JSON-stringifying semantics of [`substitute`].
/// Placeholders inside blocks are left to Handlebars strict mode.
fn render_with_handlebars(segments: &[Segment<'_>], bindings: &Params) -> AppResult<String> {
    let mut context = bindings.clone();
    let mut source = String::new();

    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Literal(text) => source.push_str(&text.replace("{{", "\\{{")),
            Segment::Escaped => source.push_str("\\{{"),
            Segment::Placeholder(path) => {
                let key = format!("__binding_{}", i);
                context.insert(key.clone(), Value::String(stringify(lookup(bindings, path)?)));
                source.push_str(&format!("{{{{{}}}}}", key));
            }
            Segment::Scoped { raw, .. } | Segment::Expression(raw) => source.push_str(raw),
        }
    }

    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.set_strict_mode(true);

    handlebars
        .register_template_string("prompt", &source)
        .map_err(|e| AppError::Template(format!("Failed to parse template: {}", e)))?;

    handlebars
        .render("prompt", &Value::Object(context))
        .map_err(|e| match e.reason() {
            RenderErrorReason::MissingVariable(Some(name)) => AppError::UnresolvedParameter {
                name: name.clone(),
            },
            _ => AppError::Template(format!("Failed to render template: {}", e)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_simple_substitution() {
        let b = bindings(json!({"name": "Bo"}));
        assert_eq!(resolve("Hello {{name}}", &b).unwrap(), "Hello Bo");
        assert_eq!(resolve("Hello {{ name }}!", &b).unwrap(), "Hello Bo!");
    }

    #[test]
    fn test_missing_binding_is_error() {
        let result = resolve("Hello {{name}}", &Params::new());
        assert!(matches!(
            result,
            Err(AppError::UnresolvedParameter { ref name }) if name == "name"
        ));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let b = bindings(json!({"a": 1, "b": {"c": "d"}}));
        let template = "{{a}} and {{b}} and {{b.c}}";
        assert_eq!(resolve(template, &b).unwrap(), resolve(template, &b).unwrap());
    }

    #[test]
    fn test_non_string_values_are_stringified() {
        let b = bindings(json!({"n": 3, "flag": true, "obj": {"k": [1, 2]}}));
        assert_eq!(
            resolve("n={{n}} flag={{flag}} obj={{obj}}", &b).unwrap(),
            r#"n=3 flag=true obj={"k":[1,2]}"#
        );
    }

    #[test]
    fn test_single_placeholder_returns_raw_value() {
        let b = bindings(json!({"obj": {"k": [1, 2]}}));
        assert_eq!(resolve_value("{{obj}}", &b).unwrap(), json!({"k": [1, 2]}));
        assert_eq!(resolve_value("{{ obj.k }}", &b).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_surrounding_whitespace_is_kept() {
        let b = bindings(json!({"name": "Bo", "obj": {"k": 1}}));
        assert_eq!(resolve("  {{name}}\n", &b).unwrap(), "  Bo\n");
        assert_eq!(resolve_value(" {{obj}}", &b).unwrap(), json!(r#" {"k":1}"#));
    }

    #[test]
    fn test_dotted_paths() {
        let b = bindings(json!({"step": {"output": "42", "items": ["x", "y"]}}));
        assert_eq!(resolve("ans: {{step.output}}", &b).unwrap(), "ans: 42");
        assert_eq!(resolve("{{step.items.1}}!", &b).unwrap(), "y!");
        assert!(matches!(
            resolve("{{step.missing}}?", &b),
            Err(AppError::UnresolvedParameter { ref name }) if name == "step.missing"
        ));
    }

    #[test]
    fn test_no_recursive_expansion() {
        let b = bindings(json!({"a": "{{b}}", "b": "secret"}));
        assert_eq!(resolve("value: {{a}}", &b).unwrap(), "value: {{b}}");
    }

    #[test]
    fn test_single_braces_pass_through() {
        let b = bindings(json!({"x": "1"}));
        assert_eq!(
            resolve("fn() { return {{x}}; }", &b).unwrap(),
            "fn() { return 1; }"
        );
        assert_eq!(resolve("open {{ never closed", &b).unwrap(), "open {{ never closed");
    }

    #[test]
    fn test_unmatched_open_does_not_hide_later_placeholders() {
        let b = bindings(json!({"x": "1", "flag": true}));
        assert_eq!(resolve("a {{ b {{x}} c", &b).unwrap(), "a {{ b 1 c");
        assert_eq!(resolve("{{x}} then {{ dangling", &b).unwrap(), "1 then {{ dangling");
        assert_eq!(
            resolve("a {{ b {{#if flag}}{{x}}{{/if}}", &b).unwrap(),
            "a {{ b 1"
        );
    }

    #[test]
    fn test_escaped_placeholder() {
        assert_eq!(
            resolve(r"literal \{{name}}", &Params::new()).unwrap(),
            "literal {{name}}"
        );
    }

    #[test]
    fn test_block_helpers_render() {
        let b = bindings(json!({"formal": true, "name": "Bo"}));
        assert_eq!(
            resolve("{{#if formal}}Dear {{name}}{{else}}Hi {{name}}{{/if}}", &b).unwrap(),
            "Dear Bo"
        );
    }

    #[test]
    fn test_each_block_uses_item_context() {
        let b = bindings(json!({"who": "team", "people": [{"name": "Ann"}, {"name": "Bo"}]}));
        assert_eq!(
            resolve("{{who}}: {{#each people}}{{name}};{{/each}}", &b).unwrap(),
            "team: Ann;Bo;"
        );
        assert_eq!(
            resolve("{{#each people}}{{this.name}};{{/each}}", &b).unwrap(),
            "Ann;Bo;"
        );
    }

    #[test]
    fn test_with_block_scopes_lookup() {
        let b = bindings(json!({"name": "Top", "user": {"name": "Ann"}}));
        assert_eq!(
            resolve("{{name}} / {{#with user}}{{name}}{{/with}}", &b).unwrap(),
            "Top / Ann"
        );
    }

    #[test]
    fn test_missing_binding_inside_block_is_error() {
        let b = bindings(json!({"people": [{"name": "Ann"}]}));
        assert!(resolve("{{#each people}}{{age}}{{/each}}", &b).is_err());
    }

    #[test]
    fn test_placeholders_listing() {
        assert_eq!(
            placeholders("{{a}} {{#if b}}{{c.d}}{{/if}}"),
            vec!["a".to_string(), "c.d".to_string()]
        );
    }

    #[test]
    fn test_structured_input_resolution() {
        let input: PromptInput = serde_json::from_value(json!({
            "data": {"question": "What is {{topic}}?", "n": 2}
        }))
        .unwrap();
        let b = bindings(json!({"topic": "rust"}));
        assert_eq!(
            resolve_input(&input, &b).unwrap(),
            json!({"question": "What is rust?", "n": 2})
        );
    }
}
