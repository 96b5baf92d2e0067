// This file defines the errors that the stages of Neighborhoods can return.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;


/// One malformed record in a tabular input file. These are usually recovered from (the record is
/// skipped and counted) so they are a plain struct that can also be wrapped in `PipelineError`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub file: String,
    pub line: u64,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}: {}", self.file, self.line, self.message)
    }
}

impl std::error::Error for ParseError {}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed record: {0}")]
    Parse(#[from] ParseError),

    #[error("corrupt input {file}: {message}")]
    CorruptInput { file: String, message: String },

    #[error("malformed tree in {file}: {reason}")]
    MalformedTree { file: String, reason: String },

    #[error("tree in {file} has only {leaves} leaves (at least 4 are needed)")]
    TrivialTree { file: String, leaves: usize },

    #[error("distance between {a} and {b} is undefined, so {method} cannot proceed")]
    SingularMatrix { method: String, a: String, b: String },

    #[error("only {found} valid tree(s) remain, at least 2 are needed for distances")]
    InsufficientTrees { found: usize },

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("CSV error on {}: {source}", .path.display())]
    Csv { path: PathBuf, #[source] source: csv::Error },

    #[error("failed to write {}: {message}", .path.display())]
    Output { path: PathBuf, message: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io { path: path.into(), source }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PipelineError::Csv { path: path.into(), source }
    }

    pub fn malformed_tree(file: &str, reason: impl Into<String>) -> Self {
        PipelineError::MalformedTree { file: file.to_string(), reason: reason.into() }
    }

    /// Per-unit errors are the ones a stage recovers from by dropping the unit (one tree file)
    /// and carrying on with the rest.
    pub fn is_per_unit(&self) -> bool {
        matches!(self, PipelineError::Parse(_) | PipelineError::MalformedTree { .. } |
                       PipelineError::TrivialTree { .. })
    }
}


pub type Result<T> = std::result::Result<T, PipelineError>;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let e = PipelineError::Parse(ParseError { file: "a.tsv".to_string(), line: 7,
                                                  message: "expected 8 columns, found 7".to_string() });
        assert_eq!(e.to_string(), "malformed record: a.tsv line 7: expected 8 columns, found 7");
        let e = PipelineError::SingularMatrix { method: "neighbor joining".to_string(),
                                                a: "tree_1".to_string(), b: "tree_2".to_string() };
        assert!(e.to_string().contains("tree_1"));
        assert!(e.to_string().contains("tree_2"));
        let e = PipelineError::TrivialTree { file: "x.treefile".to_string(), leaves: 3 };
        assert!(e.to_string().contains("x.treefile"));
    }

    #[test]
    fn test_is_per_unit() {
        assert!(PipelineError::malformed_tree("a", "b").is_per_unit());
        assert!(PipelineError::TrivialTree { file: "a".to_string(), leaves: 2 }.is_per_unit());
        assert!(!PipelineError::InsufficientTrees { found: 1 }.is_per_unit());
        assert!(!PipelineError::CorruptInput { file: "a".to_string(),
                                               message: "b".to_string() }.is_per_unit());
    }
}
