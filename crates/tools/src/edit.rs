//! `str_replace_editor`: view, create and edit files by exact string
//! replacement, with per-file undo.

use async_trait::async_trait;
use operative_core::error::ToolError;
use operative_core::tool::{Tool, ToolResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::process::{self, shell_quote, truncate};

const SNIPPET_LINES: usize = 4;

/// Previous contents of every edited file, most recent last.
#[derive(Clone, Default)]
pub struct EditHistory(Arc<Mutex<HashMap<PathBuf, Vec<String>>>>);

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct EditTool {
    api_type: &'static str,
    history: EditHistory,
}

impl EditTool {
    pub fn new(api_type: &'static str, history: EditHistory) -> Self {
        Self { api_type, history }
    }

    async fn view(&self, path: &Path, view_range: Option<&serde_json::Value>) -> Result<ToolResult, ToolError> {
        if path.is_dir() {
            if view_range.is_some() {
                return Ok(ToolResult::error(
                    "The `view_range` parameter is not allowed when `path` points to a directory.",
                ));
            }
            let listing = process::run(
                "str_replace_editor",
                &format!(
                    "find {} -maxdepth 2 -not -path '*/\\.*'",
                    shell_quote(&path.to_string_lossy())
                ),
                Duration::from_secs(30),
            )
            .await?;
            if !listing.stderr.is_empty() {
                return Ok(ToolResult::error(listing.stderr));
            }
            return Ok(ToolResult::output(format!(
                "Here's the files and directories up to 2 levels deep in {}, excluding hidden items:\n{}\n",
                path.display(),
                listing.stdout
            )));
        }

        let content = read_file(path).await?;
        let Some(range) = view_range else {
            return Ok(ToolResult::output(numbered(&content, path.display(), 1)));
        };

        let bounds: Option<(i64, i64)> = range.as_array().and_then(|r| match r.as_slice() {
            [a, b] => Some((a.as_i64()?, b.as_i64()?)),
            _ => None,
        });
        let Some((start, end)) = bounds else {
            return Ok(ToolResult::error(
                "Invalid `view_range`. It should be a list of two integers.",
            ));
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let n_lines = lines.len() as i64;
        if start < 1 || start > n_lines {
            return Ok(ToolResult::error(format!(
                "Invalid `view_range`: [{start}, {end}]. Its first element `{start}` should be within the range of lines of the file: [1, {n_lines}]"
            )));
        }
        if end != -1 && end > n_lines {
            return Ok(ToolResult::error(format!(
                "Invalid `view_range`: [{start}, {end}]. Its second element `{end}` should be smaller than the number of lines in the file: `{n_lines}`"
            )));
        }
        if end != -1 && end < start {
            return Ok(ToolResult::error(format!(
                "Invalid `view_range`: [{start}, {end}]. Its second element `{end}` should be larger or equal than its first `{start}`"
            )));
        }

        let start_idx = (start - 1) as usize;
        let end_idx = if end == -1 { lines.len() } else { end as usize };
        let slice = lines[start_idx..end_idx].join("\n");
        Ok(ToolResult::output(numbered(&slice, path.display(), start as usize)))
    }

    async fn create(&self, path: &Path, file_text: &str) -> Result<ToolResult, ToolError> {
        if path.exists() {
            return Ok(ToolResult::error(format!(
                "File already exists at: {}. Cannot overwrite files using command `create`.",
                path.display()
            )));
        }
        write_file(path, file_text).await?;
        self.remember(path, file_text.to_string()).await;
        Ok(ToolResult::output(format!(
            "File created successfully at: {}",
            path.display()
        )))
    }

    async fn str_replace(
        &self,
        path: &Path,
        old_str: &str,
        new_str: &str,
    ) -> Result<ToolResult, ToolError> {
        let content = read_file(path).await?;

        let occurrences = content.matches(old_str).count();
        if occurrences == 0 || old_str.is_empty() {
            return Ok(ToolResult::error(format!(
                "No replacement was performed, old_str `{old_str}` did not appear verbatim in {}.",
                path.display()
            )));
        }
        if occurrences > 1 {
            let lines: Vec<String> = content
                .split('\n')
                .enumerate()
                .filter(|(_, line)| line.contains(old_str))
                .map(|(i, _)| (i + 1).to_string())
                .collect();
            return Ok(ToolResult::error(format!(
                "No replacement was performed. Multiple occurrences of old_str `{old_str}` in lines {}. Please ensure it is unique",
                lines.join(", ")
            )));
        }

        let new_content = content.replacen(old_str, new_str, 1);
        write_file(path, &new_content).await?;
        self.remember(path, content.clone()).await;

        let prefix = content.split_once(old_str).map(|(p, _)| p).unwrap_or_default();
        let replacement_line = prefix.matches('\n').count();
        let start = replacement_line.saturating_sub(SNIPPET_LINES);
        let end = replacement_line + SNIPPET_LINES + new_str.matches('\n').count();
        let snippet = snippet(&new_content, start, end);

        Ok(ToolResult::output(format!(
            "The file {} has been edited. {}Review the changes and make sure they are as expected. Edit the file again if necessary.",
            path.display(),
            numbered(&snippet, &format!("a snippet of {}", path.display()), start + 1)
        )))
    }

    async fn insert(
        &self,
        path: &Path,
        insert_line: i64,
        new_str: &str,
    ) -> Result<ToolResult, ToolError> {
        let content = read_file(path).await?;
        let lines: Vec<&str> = content.split('\n').collect();
        let n_lines = lines.len() as i64;
        if insert_line < 0 || insert_line > n_lines {
            return Ok(ToolResult::error(format!(
                "Invalid `insert_line` parameter: {insert_line}. It should be within the range of lines of the file: [0, {n_lines}]"
            )));
        }

        let at = insert_line as usize;
        let new_lines: Vec<&str> = new_str.split('\n').collect();
        let mut updated: Vec<&str> = Vec::with_capacity(lines.len() + new_lines.len());
        updated.extend_from_slice(&lines[..at]);
        updated.extend_from_slice(&new_lines);
        updated.extend_from_slice(&lines[at..]);
        let new_content = updated.join("\n");

        write_file(path, &new_content).await?;
        self.remember(path, content.clone()).await;

        let start = at.saturating_sub(SNIPPET_LINES);
        let end = at + new_lines.len() + SNIPPET_LINES;
        let snippet = snippet(&new_content, start, end);

        Ok(ToolResult::output(format!(
            "The file {} has been edited. {}Review the changes and make sure they are as expected (correct indentation, no duplicate lines, etc). Edit the file again if necessary.",
            path.display(),
            numbered(&snippet, "a snippet of the edited file", start + 1)
        )))
    }

    async fn undo_edit(&self, path: &Path) -> Result<ToolResult, ToolError> {
        let previous = {
            let mut history = self.history.0.lock().await;
            history.get_mut(path).and_then(Vec::pop)
        };
        let Some(previous) = previous else {
            return Ok(ToolResult::error(format!(
                "No edit history found for {}.",
                path.display()
            )));
        };
        write_file(path, &previous).await?;
        Ok(ToolResult::output(format!(
            "Last edit to {} undone successfully. {}",
            path.display(),
            numbered(&previous, path.display(), 1)
        )))
    }

    async fn remember(&self, path: &Path, content: String) {
        self.history
            .0
            .lock()
            .await
            .entry(path.to_path_buf())
            .or_default()
            .push(content);
    }
}

/// `cat -n` style rendering of `content`.
fn numbered(content: &str, label: impl std::fmt::Display, first_line: usize) -> String {
    let content = truncate(content);
    let body: Vec<String> = content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:>6}\t{line}", i + first_line))
        .collect();
    format!(
        "Here's the result of running `cat -n` on {label}:\n{}\n",
        body.join("\n")
    )
}

fn snippet(content: &str, start: usize, end: usize) -> String {
    content
        .split('\n')
        .skip(start)
        .take(end.saturating_sub(start) + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

async fn read_file(path: &Path) -> Result<String, ToolError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "str_replace_editor".into(),
            reason: format!("Ran into {e} while trying to read {}", path.display()),
        })
}

async fn write_file(path: &Path, content: &str) -> Result<(), ToolError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "str_replace_editor".into(),
            reason: format!("Ran into {e} while trying to write to {}", path.display()),
        })
}

fn required<'a>(input: &'a serde_json::Value, key: &str, command: &str) -> Result<&'a str, ToolError> {
    input[key].as_str().ok_or_else(|| {
        ToolError::InvalidArguments(format!("Parameter `{key}` is required for command: {command}"))
    })
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "str_replace_editor"
    }

    fn api_type(&self) -> &str {
        self.api_type
    }

    async fn run(&self, input: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = input["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Parameter `command` is required".into()))?;
        let path = PathBuf::from(required(&input, "path", command)?);

        if !path.is_absolute() {
            return Ok(ToolResult::error(format!(
                "The path {} is not an absolute path, it should start with `/`. Maybe you meant /{}?",
                path.display(),
                path.display()
            )));
        }
        if !path.exists() && command != "create" {
            return Ok(ToolResult::error(format!(
                "The path {} does not exist. Please provide a valid path.",
                path.display()
            )));
        }
        if path.is_dir() && command != "view" {
            return Ok(ToolResult::error(format!(
                "The path {} is a directory and only the `view` command can be used on directories",
                path.display()
            )));
        }

        debug!(command, path = %path.display(), "str_replace_editor");
        match command {
            "view" => self.view(&path, input.get("view_range").filter(|v| !v.is_null())).await,
            "create" => self.create(&path, required(&input, "file_text", command)?).await,
            "str_replace" => {
                let old_str = required(&input, "old_str", command)?;
                let new_str = input["new_str"].as_str().unwrap_or_default();
                self.str_replace(&path, old_str, new_str).await
            }
            "insert" => {
                let insert_line = input["insert_line"].as_i64().ok_or_else(|| {
                    ToolError::InvalidArguments(
                        "Parameter `insert_line` is required for command: insert".into(),
                    )
                })?;
                self.insert(&path, insert_line, required(&input, "new_str", command)?)
                    .await
            }
            "undo_edit" => self.undo_edit(&path).await,
            other => Ok(ToolResult::error(format!(
                "Unrecognized command {other}. The allowed commands for the {} tool are: view, create, str_replace, insert, undo_edit",
                self.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn editor() -> EditTool {
        EditTool::new("text_editor_20250124", EditHistory::new())
    }

    async fn call(tool: &EditTool, input: serde_json::Value) -> ToolResult {
        tool.run(input).await.unwrap()
    }

    #[tokio::test]
    async fn create_view_replace_undo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let path_str = path.to_str().unwrap();
        let tool = editor();

        let created = call(
            &tool,
            json!({"command": "create", "path": path_str, "file_text": "alpha\nbeta\ngamma"}),
        )
        .await;
        assert!(created.output.unwrap().starts_with("File created successfully"));

        let viewed = call(&tool, json!({"command": "view", "path": path_str})).await;
        assert!(viewed.output.unwrap().contains("     2\tbeta"));

        let replaced = call(
            &tool,
            json!({"command": "str_replace", "path": path_str, "old_str": "beta", "new_str": "BETA"}),
        )
        .await;
        assert!(!replaced.is_error());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "alpha\nBETA\ngamma"
        );

        let undone = call(&tool, json!({"command": "undo_edit", "path": path_str})).await;
        assert!(undone.output.unwrap().contains("undone successfully"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "alpha\nbeta\ngamma"
        );
    }

    #[tokio::test]
    async fn replace_requires_a_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.txt");
        std::fs::write(&path, "x = 1\nx = 1\n").unwrap();
        let tool = editor();

        let result = call(
            &tool,
            json!({"command": "str_replace", "path": path.to_str().unwrap(), "old_str": "x = 1", "new_str": "x = 2"}),
        )
        .await;
        assert!(result.error.unwrap().contains("lines 1, 2"));

        let missing = call(
            &tool,
            json!({"command": "str_replace", "path": path.to_str().unwrap(), "old_str": "y", "new_str": "z"}),
        )
        .await;
        assert!(missing.error.unwrap().contains("did not appear verbatim"));
    }

    #[tokio::test]
    async fn insert_and_view_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "one\ntwo\nthree").unwrap();
        let tool = editor();
        let p = path.to_str().unwrap();

        let inserted = call(
            &tool,
            json!({"command": "insert", "path": p, "insert_line": 1, "new_str": "one and a half"}),
        )
        .await;
        assert!(!inserted.is_error());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "one\none and a half\ntwo\nthree"
        );

        let ranged = call(
            &tool,
            json!({"command": "view", "path": p, "view_range": [2, 3]}),
        )
        .await
        .output
        .unwrap();
        assert!(ranged.contains("     2\tone and a half"));
        assert!(ranged.contains("     3\ttwo"));
        assert!(!ranged.contains("three"));

        let bad = call(&tool, json!({"command": "insert", "path": p, "insert_line": 99, "new_str": "x"})).await;
        assert!(bad.is_error());
    }

    #[tokio::test]
    async fn path_checks() {
        let tool = editor();
        let relative = call(&tool, json!({"command": "view", "path": "relative.txt"})).await;
        assert!(relative.error.unwrap().contains("not an absolute path"));

        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("exists.txt");
        std::fs::write(&existing, "x").unwrap();
        let clash = call(
            &tool,
            json!({"command": "create", "path": existing.to_str().unwrap(), "file_text": "y"}),
        )
        .await;
        assert!(clash.error.unwrap().contains("Cannot overwrite"));

        let listing = call(&tool, json!({"command": "view", "path": dir.path().to_str().unwrap()})).await;
        assert!(listing.output.unwrap().contains("exists.txt"));
    }

    #[tokio::test]
    async fn undo_without_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.txt");
        std::fs::write(&path, "x").unwrap();
        let result = call(&editor(), json!({"command": "undo_edit", "path": path.to_str().unwrap()})).await;
        assert!(result.error.unwrap().starts_with("No edit history"));
    }
}
