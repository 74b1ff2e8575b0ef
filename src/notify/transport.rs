//! Notification transports.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Result, SweepError};

/// A rendered message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl Message {
    /// RFC 5322 style text, suitable for `sendmail -t`.
    pub fn to_mail_text(&self) -> String {
        format!(
            "To: {}\nFrom: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.to, self.from, self.subject, self.body
        )
    }
}

/// Delivers a message somewhere.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Pipes the message into a mail command such as `sendmail -t`.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl NotificationTransport for CommandTransport {
    async fn send(&self, message: &Message) -> Result<()> {
        if message.to.is_empty() {
            return Err(SweepError::Notify("no recipient configured".to_string()));
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SweepError::Notify(format!("Failed to start {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.to_mail_text().as_bytes())
                .await
                .map_err(|e| SweepError::Notify(format!("Failed to write message: {}", e)))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SweepError::Notify(format!("{} timed out after {:?}", self.program, self.timeout)))?
            .map_err(|e| SweepError::Notify(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SweepError::Notify(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Writes messages to the log. Used when no recipient is configured.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, message: &Message) -> Result<()> {
        warn!("NOTIFICATION: {}\n{}", message.subject, message.body);
        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Message>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn count_matching(&self, subject_fragment: &str) -> usize {
        self.messages()
            .iter()
            .filter(|m| m.subject.contains(subject_fragment))
            .count()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, message: &Message) -> Result<()> {
        if self.fail {
            return Err(SweepError::Notify("transport unavailable".to_string()));
        }
        self.sent
            .lock()
            .map_err(|e| SweepError::Notify(e.to_string()))?
            .push(message.clone());
        Ok(())
    }
}
