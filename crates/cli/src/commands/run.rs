//! Run command handler.
//!
//! Resolves a prompt against its document and parameters, executes it and
//! prints the output. Ctrl-C cancels the in-flight run.

use super::{build_engine, open_document};
use aiconfig_core::config::AppConfig;
use aiconfig_prompt::{parse_assignments, save_document, Output};
use aiconfig_runtime::{RunOptions, StreamDelta};
use anyhow::Context;
use clap::Args;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Run a prompt and print its output
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Document file (.aiconfig.json / .aiconfig.yaml)
    pub file: PathBuf,

    /// Name of the prompt to run
    pub prompt: String,

    /// Runtime parameter as key=value (repeatable); JSON values keep their type
    #[arg(short, long = "param")]
    pub params: Vec<String>,

    /// Stream output as it is produced
    #[arg(long)]
    pub stream: bool,

    /// Write the updated document (with the new outputs) back to the file
    #[arg(long)]
    pub save: bool,

    /// Write the updated document to this path instead
    #[arg(long, conflicts_with = "save")]
    pub save_to: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing run command for prompt '{}'", self.prompt);
        tracing::debug!("Run command options: {:?}", self);

        let params = parse_assignments(self.params.iter().map(String::as_str))?;
        let document = open_document(&self.file)?;
        let engine = build_engine(config, document)?;

        let streaming = self.stream && !self.json;
        let mut options = RunOptions::default();
        if streaming {
            options = RunOptions::streaming(Arc::new(|delta: &StreamDelta| {
                print!("{}", delta.delta);
                let _ = std::io::stdout().flush();
            }));
        }

        let handle = engine.start(&self.prompt, params, options)?;
        let run_id = handle.id();
        let result = tokio::select! {
            result = handle.wait() => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted; cancelling run {}", run_id);
                engine.cancel(run_id);
                anyhow::bail!("Run of '{}' cancelled", self.prompt);
            }
        };

        // Backend failures are recorded in the document before surfacing.
        if let Some(path) = self.save_path() {
            save_document(&engine.document(), &path)
                .with_context(|| format!("Failed to save document {}", path.display()))?;
            tracing::info!("Saved document to {}", path.display());
        }

        let outputs = result?;
        if self.json {
            let output = serde_json::json!({
                "prompt": self.prompt,
                "state": engine.state(&self.prompt),
                "outputs": outputs,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else if streaming {
            println!();
        } else {
            for output in &outputs {
                println!("{}", render(output));
            }
        }

        Ok(())
    }

    fn save_path(&self) -> Option<PathBuf> {
        match (&self.save_to, self.save) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(self.file.clone()),
            (None, false) => None,
        }
    }
}

fn render(output: &Output) -> String {
    match output {
        Output::Error(error) => format!("Error ({}): {}", error.ename, error.evalue),
        Output::ExecuteResult(_) => output.text(),
    }
}
