//! Error types for routecheck.
//!
//! These are the conditions that stop an analysis run outright. Anything
//! the checker can report about the analyzed source is a
//! [`Diagnostic`](crate::check::Diagnostic) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised while loading or analyzing a program.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Reading a source or config file failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tree-sitter grammar could not be loaded.
    #[error("failed to load Go grammar: {0}")]
    Language(#[from] tree_sitter::LanguageError),

    /// tree-sitter returned no tree for a file.
    #[error("failed to parse {}", .0.display())]
    Parse(PathBuf),

    /// The file is not Go source.
    #[error("unsupported source file: {}", .0.display())]
    UnsupportedLanguage(PathBuf),

    /// The config file exists but is not valid TOML.
    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A package declares server routes but no client calls anywhere.
    #[error("no Client definition found in package {package}")]
    NoClientDefinition { package: String },
}

/// Result alias used across the analysis side of the crate.
pub type Result<T> = std::result::Result<T, CheckError>;
