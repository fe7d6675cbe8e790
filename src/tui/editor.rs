use anyhow::{Context, Result};
use std::io::Write;
use std::process::Command;

/// Editor command from `VISUAL`, then `EDITOR`.
pub fn editor_from_env() -> Option<String> {
    std::env::var("VISUAL")
        .ok()
        .or_else(|| std::env::var("EDITOR").ok())
        .filter(|e| !e.trim().is_empty())
}

/// Open `content` in `editor` and return the saved text, or `None` when unchanged.
///
/// `editor` may carry arguments (`code --wait`); the file path is appended last.
pub fn edit_text(editor: &str, content: &str) -> Result<Option<String>> {
    let mut parts = editor.split_whitespace();
    let program = parts.next().context("editor command is empty")?;

    let mut file = tempfile::Builder::new()
        .prefix("sow-edit-")
        .suffix(".md")
        .tempfile()
        .context("create SOW edit file")?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.flush())
        .context("write SOW edit file")?;

    let status = Command::new(program)
        .args(parts)
        .arg(file.path())
        .status()
        .with_context(|| format!("failed to launch editor `{program}`"))?;
    if !status.success() {
        anyhow::bail!("editor exited with {status}");
    }

    let edited = std::fs::read_to_string(file.path()).context("read edited SOW")?;
    Ok((edited != content).then_some(edited))
}
