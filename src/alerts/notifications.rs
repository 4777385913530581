//! Notification channels. Console and stub-email are pure logging; the file
//! channel is the one with real I/O, serialized by an internal mutex with
//! directory auto-creation, grounded on the teacher's sqlite-storage
//! `open()` pattern of creating the parent directory before first write.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &str) -> AppResult<()>;
}

pub struct ConsoleChannel;

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, message: &str) -> AppResult<()> {
        info!(channel = "console", "{}", message);
        Ok(())
    }
}

pub struct FileChannel {
    path: PathBuf,
    file: AsyncMutex<()>,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Configuration(format!("cannot create alert log directory: {e}")))?;
            }
        }
        Ok(Self { path, file: AsyncMutex::new(()) })
    }
}

#[async_trait]
impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        "file"
    }

    async fn send(&self, message: &str) -> AppResult<()> {
        let _guard = self.file.lock().await;
        let path = self.path.clone();
        let line = format!("{} {}\n", chrono::Utc::now().to_rfc3339(), message);
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())
        })
        .await
        .map_err(|e| AppError::BackendUnavailable(format!("file channel task panicked: {e}")))?
        .map_err(|e| AppError::BackendUnavailable(format!("file channel write failed: {e}")))
    }
}

/// Stub: logs intent only. A production channel would call an email API.
pub struct StubEmailChannel;

#[async_trait]
impl NotificationChannel for StubEmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &str) -> AppResult<()> {
        info!(channel = "email_stub", "would send email: {}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_channel_appends_lines_and_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alerts.log");
        let channel = FileChannel::new(&path).unwrap();

        channel.send("first").await.unwrap();
        channel.send("second").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
    }
}
