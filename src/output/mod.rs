//! Output message emission
//!
//! Extracted records and state checkpoints leave the process as
//! line-delimited JSON messages on a single sink (stdout in production).
//! Each message is flushed as it is written so a downstream consumer can
//! act on a STATE checkpoint even if this process dies mid-run.

use crate::error::Result;
use crate::types::Record;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Writes line-delimited JSON messages to a shared sink
#[derive(Clone)]
pub struct MessageWriter {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl MessageWriter {
    /// Writer emitting to stdout
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Writer emitting to an arbitrary sink
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Emit one extracted record for a stream
    pub fn write_record(&self, stream: &str, record: &Record) -> Result<()> {
        self.write_line(&json!({
            "type": "RECORD",
            "stream": stream,
            "time_extracted": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "record": record,
        }))
    }

    /// Emit a state checkpoint
    pub fn write_state(&self, state: &serde_json::Value) -> Result<()> {
        self.write_line(&json!({
            "type": "STATE",
            "value": state,
        }))
    }

    fn write_line(&self, message: &serde_json::Value) -> Result<()> {
        let mut sink = self.sink.lock().expect("output sink lock poisoned");
        serde_json::to_writer(&mut *sink, message)?;
        sink.write_all(b"\n")?;
        sink.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for MessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter").finish()
    }
}
