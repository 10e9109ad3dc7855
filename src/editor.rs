//! Source Editor Seam
//!
//! The runner only needs the current text of whatever holds the learner's
//! code. Editor widgets, files and fixed strings all implement
//! [`SourceEditor`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::language::Language;

/// Anything that can hand over the code being edited
pub trait SourceEditor: Send + Sync {
    /// Current document text; empty when nothing is loaded
    fn current_text(&self) -> String;
}

/// A fixed document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StaticSource(pub String);

impl StaticSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

impl SourceEditor for StaticSource {
    fn current_text(&self) -> String {
        self.0.clone()
    }
}

/// A document read from disk on every access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SourceEditor for FileSource {
    fn current_text(&self) -> String {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read source file {:?}: {}", self.path, e);
                String::new()
            }
        }
    }
}

/// Presentation settings for an editor widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorOptions {
    /// Editor language id
    pub language: String,
    /// Document shown before the learner types anything
    pub starting_document: String,
    pub line_numbers: bool,
    pub minimap: bool,
    pub font_family: String,
    pub font_size: u16,
    pub theme: String,
    pub read_only: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self::for_language(Language::Python)
    }
}

impl EditorOptions {
    /// Options for a language, starting from its template
    pub fn for_language(language: Language) -> Self {
        Self {
            language: language.editor_id().to_string(),
            starting_document: language.starter_code().to_string(),
            line_numbers: true,
            minimap: true,
            font_family: "Menlo, Monaco, Courier New, monospace".to_string(),
            font_size: 14,
            theme: "vs-dark".to_string(),
            read_only: false,
        }
    }
}
