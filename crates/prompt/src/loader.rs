//! Document loading and saving.
//!
//! The engine itself never touches the filesystem; this module is the
//! loader/saver collaborator used by the CLI. Format is chosen by file
//! extension: `.yaml`/`.yml` for YAML, anything else for JSON.

use crate::document::Document;
use aiconfig_core::{AppError, AppResult};
use std::path::{Path, PathBuf};

/// Suffixes recognised by [`find_documents`].
const DOCUMENT_SUFFIXES: &[&str] = &[".aiconfig.json", ".aiconfig.yaml", ".aiconfig.yml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

fn format_for(path: &Path) -> Format {
    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Format::Yaml,
        _ => Format::Json,
    }
}

/// Load and validate a document.
///
/// # Example
/// ```no_run
/// use aiconfig_prompt::load_document;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let doc = load_document(Path::new("travel.aiconfig.json"))?;
/// println!("Loaded {} prompts", doc.prompts().len());
/// # Ok(())
/// # }
/// ```
pub fn load_document(path: &Path) -> AppResult<Document> {
    tracing::debug!("Loading document from: {:?}", path);

    if !path.exists() {
        return Err(AppError::Config(format!(
            "Document file not found: {:?}",
            path
        )));
    }

    let contents = std::fs::read_to_string(path)?;

    let document: Document = match format_for(path) {
        Format::Yaml => serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Serialization(format!("Failed to parse YAML {:?}: {}", path, e))
        })?,
        Format::Json => serde_json::from_str(&contents).map_err(|e| {
            AppError::Serialization(format!("Failed to parse JSON {:?}: {}", path, e))
        })?,
    };

    document.validate()?;

    tracing::info!(
        "Loaded document: {} ({} prompts)",
        document.name,
        document.prompts().len()
    );

    Ok(document)
}

/// Write a document, creating parent directories as needed.
pub fn save_document(document: &Document, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let contents = match format_for(path) {
        Format::Yaml => serde_yaml::to_string(document)?,
        Format::Json => serde_json::to_string_pretty(document)?,
    };

    std::fs::write(path, contents)?;
    tracing::debug!("Saved document '{}' to {:?}", document.name, path);
    Ok(())
}

/// List document files under `dir` (two levels deep), sorted.
pub fn find_documents(dir: &Path) -> AppResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(AppError::Config(format!("Not a directory: {:?}", dir)));
    }

    let mut documents: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            DOCUMENT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        })
        .map(|entry| entry.into_path())
        .collect();

    documents.sort();
    Ok(documents)
}
