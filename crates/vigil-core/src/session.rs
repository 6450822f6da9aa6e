//! Session log — sequenced, correlation-linked, append-only.
//!
//! The log is the single strictly-serialized resource in a run. Its critical
//! section is one seq assignment, one in-memory push, and one JSONL line
//! write. Everything else happens outside the lock.
//!
//! On-disk format is JSONL: a header record, one record per event, and a
//! footer record written when the session is sealed. The legacy single-object
//! JSON format is still accepted on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::event::Event;

/// Allocate a fresh correlation id: 4 random bytes as lowercase hex.
///
/// One id is allocated per tool call and shared by the call's security
/// events and its result.
pub fn new_correlation_id() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

/// Largest prefix of `s` that fits in `cap` bytes without splitting a char.
pub fn clamp_utf8(s: &str, cap: usize) -> &str {
    if s.len() <= cap {
        return s;
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate `s` to at most `cap` bytes (on a char boundary), appending a
/// byte-count marker when anything was dropped.
pub fn truncate_marked(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    format!("{}... [truncated, {} total bytes]", clamp_utf8(s, cap), s.len())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Complete,
    Failed,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A fully materialized session, as loaded from disk or snapshotted from a
/// live log. This is what the replayer consumes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub state: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub outputs: Value,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Truncate oversized event content in place, marking what was dropped.
    /// Used by the replayer; the on-disk log is never rewritten.
    pub fn truncate_content(&mut self, cap: usize) {
        for event in &mut self.events {
            if event.content.len() > cap {
                event.content = truncate_marked(&event.content, cap);
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "lowercase")]
enum Record {
    Header(HeaderRecord),
    Event(Event),
    Footer(FooterRecord),
}

#[derive(Serialize, Deserialize)]
struct HeaderRecord {
    id: String,
    workflow_name: String,
    #[serde(default)]
    inputs: HashMap<String, String>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct FooterRecord {
    status: SessionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    error: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    outputs: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    state: Value,
    updated_at: DateTime<Utc>,
}

struct LogInner {
    events: Vec<Event>,
    next_seq: u64,
    writer: Option<BufWriter<File>>,
    sealed: bool,
}

/// Append-only event log for one live session.
pub struct SessionLog {
    id: String,
    workflow_name: String,
    inputs: HashMap<String, String>,
    created_at: DateTime<Utc>,
    inner: Mutex<LogInner>,
}

impl SessionLog {
    /// Create a session. When `path` is given the header record is written
    /// immediately; every append flushes one line.
    pub fn create(
        workflow_name: impl Into<String>,
        inputs: HashMap<String, String>,
        path: Option<&Path>,
    ) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let workflow_name = workflow_name.into();
        let created_at = Utc::now();

        let writer = match path {
            Some(p) => {
                if let Some(dir) = p.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                let file = File::create(p)?;
                let mut w = BufWriter::new(file);
                let header = Record::Header(HeaderRecord {
                    id: id.clone(),
                    workflow_name: workflow_name.clone(),
                    inputs: inputs.clone(),
                    created_at,
                });
                serde_json::to_writer(&mut w, &header)?;
                w.write_all(b"\n")?;
                w.flush()?;
                Some(w)
            }
            None => None,
        };

        Ok(Self {
            id,
            workflow_name,
            inputs,
            created_at,
            inner: Mutex::new(LogInner {
                events: Vec::new(),
                next_seq: 0,
                writer,
                sealed: false,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// Append an event: assigns `seq`, stamps the timestamp if unset, pushes
    /// in memory, and flushes one JSONL line. Returns the assigned seq.
    pub fn append(&self, mut event: Event) -> Result<u64> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Internal("session log lock poisoned".into()))?;
        if inner.sealed {
            return Err(Error::Internal("append to sealed session".into()));
        }

        inner.next_seq += 1;
        event.seq = inner.next_seq;
        if event.ts == DateTime::<Utc>::UNIX_EPOCH {
            event.ts = Utc::now();
        }

        if let Some(w) = inner.writer.as_mut() {
            let line = serde_json::to_string(&Record::Event(event.clone()))?;
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
            w.flush()?;
        }

        let seq = event.seq;
        inner.events.push(event);
        Ok(seq)
    }

    /// Last assigned seq (0 before the first append).
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().map(|i| i.next_seq).unwrap_or(0)
    }

    /// Clone of all events appended so far.
    pub fn events(&self) -> Vec<Event> {
        self.inner
            .lock()
            .map(|i| i.events.clone())
            .unwrap_or_default()
    }

    /// Seal the session: write the footer record and refuse further appends.
    /// Idempotent — a second seal is a no-op.
    pub fn seal(
        &self,
        status: SessionStatus,
        result: impl Into<String>,
        error: impl Into<String>,
        outputs: Value,
        state: Value,
    ) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Internal("session log lock poisoned".into()))?;
        if inner.sealed {
            return Ok(());
        }
        inner.sealed = true;

        if let Some(w) = inner.writer.as_mut() {
            let footer = Record::Footer(FooterRecord {
                status,
                result: result.into(),
                error: error.into(),
                outputs,
                state,
                updated_at: Utc::now(),
            });
            let line = serde_json::to_string(&footer)?;
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
            w.flush()?;
        }
        Ok(())
    }

    /// Snapshot the live log into a `Session` value.
    pub fn snapshot(&self, status: SessionStatus) -> Session {
        Session {
            id: self.id.clone(),
            workflow_name: self.workflow_name.clone(),
            inputs: self.inputs.clone(),
            state: Value::Null,
            outputs: Value::Null,
            status,
            result: String::new(),
            error: String::new(),
            events: self.events(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// Load a session from disk, accepting both the JSONL record stream and the
/// legacy single-object JSON format.
///
/// Format detection: file extension first (`.json` ⇒ legacy), then a peek at
/// the first 256 bytes for a `"_type"` (JSONL) or `"events"` (legacy) key.
pub fn load_session(path: &Path) -> Result<Session> {
    let content = std::fs::read_to_string(path)?;

    let looks_legacy = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => true,
        Some("jsonl") => false,
        _ => {
            let head = clamp_utf8(&content, 256);
            !head.contains("\"_type\"") && head.contains("\"events\"")
        }
    };

    if looks_legacy {
        let session: Session = serde_json::from_str(&content)?;
        return Ok(session);
    }

    parse_jsonl(&content)
}

fn parse_jsonl(content: &str) -> Result<Session> {
    let mut session = Session::default();
    let mut saw_header = false;

    // Lines may be arbitrarily long; the whole file is already in memory so
    // there is no per-line scan limit to hit.
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(line)
            .map_err(|e| Error::parse(i + 1, format!("bad session record: {}", e)))?;
        match record {
            Record::Header(h) => {
                session.id = h.id;
                session.workflow_name = h.workflow_name;
                session.inputs = h.inputs;
                session.created_at = h.created_at;
                session.updated_at = h.created_at;
                saw_header = true;
            }
            Record::Event(e) => session.events.push(e),
            Record::Footer(f) => {
                session.status = f.status;
                session.result = f.result;
                session.error = f.error;
                session.outputs = f.outputs;
                session.state = f.state;
                session.updated_at = f.updated_at;
            }
        }
    }

    if !saw_header {
        return Err(Error::parse(1, "session file has no header record"));
    }
    // No footer means the run died mid-flight; status stays `running`.
    Ok(session)
}
