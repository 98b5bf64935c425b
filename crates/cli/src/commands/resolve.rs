//! Resolve command handler.
//!
//! Prints the backend request a prompt resolves to. Nothing is executed and
//! the document is not modified.

use super::{build_engine, open_document};
use aiconfig_core::config::AppConfig;
use aiconfig_prompt::parse_assignments;
use clap::Args;
use std::path::PathBuf;

/// Print the backend request a prompt resolves to
#[derive(Args, Debug)]
pub struct ResolveCommand {
    /// Document file (.aiconfig.json / .aiconfig.yaml)
    pub file: PathBuf,

    /// Name of the prompt to resolve
    pub prompt: String,

    /// Runtime parameter as key=value (repeatable)
    #[arg(short, long = "param")]
    pub params: Vec<String>,

    /// Output as YAML instead of JSON
    #[arg(long)]
    pub yaml: bool,
}

impl ResolveCommand {
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Resolving prompt '{}'", self.prompt);

        let params = parse_assignments(self.params.iter().map(String::as_str))?;
        let engine = build_engine(config, open_document(&self.file)?)?;
        let request = engine.resolve(&self.prompt, &params).await?;

        if self.yaml {
            print!("{}", serde_yaml::to_string(&request)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        Ok(())
    }
}
