//! # Code Solutions
//!
//! The structured artifact every model call must produce: a description of
//! the approach, the import statements, and the executable body.

use crate::error::{self, Result};
use crate::provider::ToolDefinition;
use serde::{Deserialize, Serialize};

/// Name of the tool the model is forced to call
pub const SOLUTION_TOOL_NAME: &str = "code_solution";

/// A candidate solution produced by the model.
///
/// Immutable once produced. `body` is supposed to be free of import
/// statements, but that is only an instruction to the model; see
/// [`CodeSolution::inline_imports`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeSolution {
    /// Description of the problem and approach
    #[serde(alias = "prefix")]
    pub description: String,
    /// Only import statements
    pub imports: String,
    /// Executable code without imports
    #[serde(alias = "code")]
    pub body: String,
}

impl CodeSolution {
    pub fn new(
        description: impl Into<String>,
        imports: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            imports: imports.into(),
            body: body.into(),
        }
    }

    /// The program run by the execution check: imports, newline, body
    pub fn program(&self) -> String {
        format!("{}\n{}", self.imports, self.body)
    }

    /// True when there is nothing to import
    pub fn has_imports(&self) -> bool {
        !self.imports.trim().is_empty()
    }

    /// Import statements the model left in the body
    pub fn inline_imports(&self) -> Vec<&str> {
        self.body
            .lines()
            .map(str::trim_start)
            .filter(|line| is_import_line(line))
            .collect()
    }

    /// Conversation entry recording this attempt, so later retries see it
    pub fn attempt_summary(&self) -> String {
        format!(
            "Here is my solution attempt:\n\n\
             Description:\n{}\n\n\
             Imports:\n{}\n\n\
             Code:\n{}",
            self.description, self.imports, self.body
        )
    }

    /// Tool definition whose JSON schema is exactly the three string fields
    pub fn tool_definition() -> ToolDefinition {
        ToolDefinition::new(
            SOLUTION_TOOL_NAME,
            "Schema for code solutions.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "description": {
                        "type": "string",
                        "description": "Description of the problem and approach"
                    },
                    "imports": {
                        "type": "string",
                        "description": "Only import statements"
                    },
                    "body": {
                        "type": "string",
                        "description": "Executable code without imports"
                    }
                },
                "required": ["description", "imports", "body"],
                "additionalProperties": false
            }),
        )
    }

    /// Parse a solution from model output.
    ///
    /// Accepts a bare JSON object or one wrapped in markdown fences. Anything
    /// that does not yield the three string fields is a `MalformedSolution`.
    pub fn from_model_output(raw: &str) -> Result<Self> {
        let json_str = extract_json(raw);
        serde_json::from_str::<CodeSolution>(json_str)
            .map_err(|e| error::malformed_solution(format!("invalid code solution: {}", e), raw))
    }
}

/// Whether a line is a Python import statement
pub fn is_import_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("import ") || (line.starts_with("from ") && line.contains(" import "))
}

/// Strip markdown code fences around a JSON payload, if present
fn extract_json(content: &str) -> &str {
    if content.contains("```json") {
        content
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .unwrap_or(content)
    } else if content.contains("```") {
        content
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .unwrap_or(content)
    } else {
        content.trim()
    }
}
