//! List command handler.

use super::open_document;
use aiconfig_core::config::AppConfig;
use aiconfig_prompt::{find_documents, Document};
use clap::Args;
use serde_json::{json, Value};
use std::path::PathBuf;

/// List documents in a directory, or the prompts of one document
#[derive(Args, Debug)]
pub struct ListCommand {
    /// Document file or directory to scan (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ListCommand {
    pub fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        if self.path.is_dir() {
            let documents = find_documents(&self.path)?;
            tracing::info!("Found {} documents under {:?}", documents.len(), self.path);

            if self.json {
                let paths: Vec<String> = documents.iter().map(|p| p.display().to_string()).collect();
                println!("{}", serde_json::to_string_pretty(&paths)?);
            } else if documents.is_empty() {
                println!("No documents found in {}", self.path.display());
            } else {
                for path in documents {
                    println!("{}", path.display());
                }
            }
            return Ok(());
        }

        let document = open_document(&self.path)?;
        let rows = prompt_rows(&document, config.default_model.as_deref());

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        } else {
            println!("{} ({} prompts)", document.name, rows.len());
            for row in &rows {
                println!(
                    "  {:<24} {:<16} {} output(s){}",
                    row["name"].as_str().unwrap_or_default(),
                    row["model"].as_str().unwrap_or("-"),
                    row["outputs"],
                    if row["chatContext"] == json!(true) { " [chat]" } else { "" }
                );
            }
        }
        Ok(())
    }
}

/// One summary row per prompt, in document order.
fn prompt_rows(document: &Document, fallback_model: Option<&str>) -> Vec<Value> {
    document
        .prompts()
        .iter()
        .map(|prompt| {
            let model = document
                .model_name_for(prompt)
                .or_else(|| fallback_model.map(str::to_string));
            json!({
                "name": prompt.name,
                "model": model,
                "outputs": prompt.outputs.len(),
                "chatContext": prompt.remembers_chat_context(),
            })
        })
        .collect()
}
