//! Append-only JSONL outputs: order audit records and candidate events.
//!
//! Each file has one [`JsonlSink`]: a bounded queue drained by a background
//! task that appends one JSON object per line. Producers never block; when
//! the queue is full the line is dropped and counted.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::venue::OrderAction;

enum SinkMessage {
    Line(String),
    Flush(oneshot::Sender<()>),
}

pub struct JsonlSink {
    path: PathBuf,
    tx: mpsc::Sender<SinkMessage>,
    dropped: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink")
            .field("path", &self.path)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl JsonlSink {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(writer_loop(path.clone(), rx));
        Self {
            path,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            task,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines discarded because the queue was full or the writer had stopped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue one record. Never waits.
    pub fn push<T: Serialize>(&self, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unserializable JSONL record");
                return;
            }
        };
        if let Err(e) = self.tx.try_send(SinkMessage::Line(line)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let why = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(path = %self.path.display(), reason = why, "JSONL line dropped");
        }
    }

    /// Wait until every line queued before this call is on disk.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SinkMessage::Flush(ack)).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Flush and stop the writer task.
    pub async fn close(self) {
        self.flush().await;
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(path = %self.path.display(), error = %e, "JSONL writer task failed");
        }
    }
}

async fn writer_loop(path: PathBuf, mut rx: mpsc::Receiver<SinkMessage>) {
    let mut writer = match open_append(&path).await {
        Ok(f) => Some(tokio::io::BufWriter::new(f)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open JSONL file; lines will be discarded");
            None
        }
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            SinkMessage::Line(line) => {
                if let Some(w) = writer.as_mut() {
                    let res = async {
                        w.write_all(line.as_bytes()).await?;
                        w.write_all(b"\n").await
                    }
                    .await;
                    if let Err(e) = res {
                        warn!(path = %path.display(), error = %e, "JSONL append failed");
                    }
                }
            }
            SinkMessage::Flush(ack) => {
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = w.flush().await {
                        warn!(path = %path.display(), error = %e, "JSONL flush failed");
                    }
                }
                let _ = ack.send(());
            }
        }
    }

    if let Some(mut w) = writer {
        let _ = w.flush().await;
    }
    debug!(path = %path.display(), "JSONL writer stopped");
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

/// Read every well-formed record of a JSONL file; malformed lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> std::io::Result<Vec<T>> {
    let file = std::fs::File::open(path)?;
    let mut out = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(rec) => out.push(rec),
            Err(e) => debug!(error = %e, "skipping malformed JSONL line"),
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmitMode {
    Dry,
    Live,
}

/// One order submission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: i64,
    pub action: OrderAction,
    pub mode: SubmitMode,
    pub pair: String,
    pub amount: f64,
    pub reason: String,
    #[serde(default)]
    pub signal: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Open,
    Close,
}

/// A trade the worker considered, emitted even when it was not acted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub timestamp: i64,
    pub candidate_type: CandidateType,
    pub desired_action: OrderAction,
    pub timeframe: String,
    pub price: f64,
    pub reason: String,
    pub actionable: bool,
    pub throttled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(i: i64) -> CandidateEvent {
        CandidateEvent {
            timestamp: i,
            candidate_type: CandidateType::Open,
            desired_action: OrderAction::Buy,
            timeframe: "1h".into(),
            price: 100.0 + i as f64,
            reason: "score(0.40)".into(),
            actionable: true,
            throttled: false,
        }
    }

    #[tokio::test]
    async fn flush_makes_lines_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events").join("candidates.jsonl");
        let sink = JsonlSink::spawn(&path, 16);
        for i in 0..5 {
            sink.push(&event(i));
        }
        sink.flush().await;

        let back: Vec<CandidateEvent> = read_jsonl(&path).unwrap();
        assert_eq!(back.len(), 5);
        assert_eq!(back[3], event(3));
        assert_eq!(sink.dropped(), 0);
        sink.close().await;
    }

    #[tokio::test]
    async fn appends_across_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.jsonl");
        let first = JsonlSink::spawn(&path, 4);
        first.push(&event(1));
        first.close().await;
        let second = JsonlSink::spawn(&path, 4);
        second.push(&event(2));
        second.close().await;

        let back: Vec<CandidateEvent> = read_jsonl(&path).unwrap();
        assert_eq!(back.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.jsonl");
        let good = serde_json::to_string(&event(7)).unwrap();
        std::fs::write(&path, format!("{good}\n{{broken\n\n{good}\n")).unwrap();
        let back: Vec<CandidateEvent> = read_jsonl(&path).unwrap();
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_value(event(0)).unwrap();
        assert_eq!(json["candidate_type"], "open");
        assert_eq!(json["desired_action"], "BUY");
        assert_eq!(serde_json::to_value(SubmitMode::Dry).unwrap(), "DRY");
    }
}
