//! Clipboard access.
//!
//! Uses the native clipboard when available and falls back to the
//! wl-copy/xclip/xsel command-line tools.

use anyhow::{anyhow, Result};
use arboard::Clipboard;
use async_trait::async_trait;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use which::which;

/// Something text can be copied into.
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    async fn copy_text(&self, text: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct TextIoService {
    inner: Arc<TextIoInner>,
}

struct TextIoInner {
    clipboard: Mutex<Option<Clipboard>>,
}

impl TextIoService {
    pub fn new() -> Self {
        let clipboard = match Clipboard::new() {
            Ok(cb) => Some(cb),
            Err(err) => {
                warn!(
                    "System clipboard backend unavailable ({}); falling back to CLI tools",
                    err
                );
                None
            }
        };

        Self {
            inner: Arc::new(TextIoInner {
                clipboard: Mutex::new(clipboard),
            }),
        }
    }

    pub async fn copy_to_clipboard(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        info!("Copying {} chars to clipboard", text.len());

        let mut used_native = false;
        {
            let mut clipboard_guard = self.inner.clipboard.lock().await;
            if let Some(clipboard) = clipboard_guard.as_mut() {
                match clipboard.set_text(text) {
                    Ok(_) => used_native = true,
                    Err(err) => {
                        warn!(
                            "Primary clipboard backend failed ({}), disabling until restart",
                            err
                        );
                        *clipboard_guard = None;
                    }
                }
            } else {
                debug!("Native clipboard backend unavailable; using system clipboard tools");
            }
        }

        if !used_native {
            copy_with_system_backends(text)?;
        }
        Ok(())
    }
}

impl Default for TextIoService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClipboardSink for TextIoService {
    async fn copy_text(&self, text: &str) -> Result<()> {
        self.copy_to_clipboard(text).await
    }
}

fn copy_with_system_backends(text: &str) -> Result<()> {
    for backend in CLIPBOARD_BACKENDS {
        if which(backend.copy_cmd).is_err() {
            continue;
        }

        let mut cmd = Command::new(backend.copy_cmd);
        cmd.args(backend.copy_args).stdin(Stdio::piped());

        if let Ok(mut child) = cmd.spawn() {
            if let Some(mut stdin) = child.stdin.take() {
                if stdin.write_all(text.as_bytes()).is_err() {
                    continue;
                }
            }

            if let Ok(status) = child.wait() {
                if status.success() {
                    debug!("Text copied to clipboard with {}", backend.name);
                    return Ok(());
                }
            }
        }
    }

    Err(anyhow!(
        "No clipboard tool (wl-copy/xclip/xsel) available for fallback"
    ))
}

struct ClipboardBackend {
    name: &'static str,
    copy_cmd: &'static str,
    copy_args: &'static [&'static str],
}

const CLIPBOARD_BACKENDS: &[ClipboardBackend] = &[
    ClipboardBackend {
        name: "wl-copy",
        copy_cmd: "wl-copy",
        copy_args: &[],
    },
    ClipboardBackend {
        name: "xclip",
        copy_cmd: "xclip",
        copy_args: &["-selection", "clipboard"],
    },
    ClipboardBackend {
        name: "xsel",
        copy_cmd: "xsel",
        copy_args: &["--clipboard", "--input"],
    },
];
