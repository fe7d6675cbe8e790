use anyhow::{Context, Result};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Initialize the clipboard manager thread if not already initialized.
/// Each copy gets its own clipboard instance, kept alive long enough for clipboard
/// managers on Linux to read it.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Queue text for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}

/// Log text as copied by `y`.
pub fn log_text(log: &[String]) -> String {
    log.join("\n")
}

/// Directory exports land in.
pub fn export_dir() -> Result<std::path::PathBuf> {
    std::env::current_dir().context("get current directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_text_joins_lines() {
        let log = vec!["[auditor] Parsing SOW requirements".to_string(), "[DONE]".to_string()];
        assert_eq!(log_text(&log), "[auditor] Parsing SOW requirements\n[DONE]");
        assert_eq!(log_text(&[]), "");
    }
}
