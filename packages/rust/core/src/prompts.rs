//! Prompt templates for the two inference passes.
//!
//! Each request is the document's title and abstract followed by a task
//! template. Templates are read from the files named in `[prompts]`; a
//! missing file falls back to the built-in default.

use std::path::Path;

use paperpipe_batch::BatchItem;
use paperpipe_shared::{Document, PipelineError, PromptsConfig, Result};
use tracing::debug;

const DEFAULT_INTEREST_PROMPT: &str = "\
Decide whether the paper above is worth reading for a researcher working on \
dynamical systems, combinatorics, group theory, logic, formal languages and \
discrete mathematics. Answer with JSON: {\"interested_in\": true} or \
{\"interested_in\": false}.
";

const DEFAULT_SUMMARY_PROMPT: &str = "\
Summarize the paper above for a busy researcher. Answer with JSON containing \
`title` (the paper title), `summary` (three to five sentences on the problem, \
the method and the main result), `keywords` (a list of short keywords) and \
optionally `appendix` (background needed to follow the summary).
";

/// The templates appended to each request.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub interest: String,
    pub summary: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            interest: DEFAULT_INTEREST_PROMPT.to_string(),
            summary: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

impl PromptSet {
    /// Read both templates, using the built-in default for any missing file.
    pub fn load(config: &PromptsConfig) -> Result<Self> {
        Ok(Self {
            interest: read_template(Path::new(&config.interest_path), DEFAULT_INTEREST_PROMPT)?,
            summary: read_template(Path::new(&config.summary_path), DEFAULT_SUMMARY_PROMPT)?,
        })
    }

    /// Relevance-check request for one document.
    pub fn interest_item(&self, document: &Document) -> BatchItem {
        BatchItem {
            key: document.id.clone(),
            prompt: render(document, &self.interest),
        }
    }

    /// Summarization request for one document.
    pub fn summary_item(&self, document: &Document) -> BatchItem {
        BatchItem {
            key: document.id.clone(),
            prompt: render(document, &self.summary),
        }
    }
}

fn render(document: &Document, template: &str) -> String {
    format!(
        "\nTitle: {}\n\nAbstract: {}\n{template}",
        document.title, document.body
    )
}

fn read_template(path: &Path, default: &str) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "prompt file not found, using built-in template");
            Ok(default.to_string())
        }
        Err(e) => Err(PipelineError::io(path, e)),
    }
}
