//! Operator queue for card/ledger divergences
//!
//! An [`Incident`] is written whenever the card moved money the ledger did
//! not record. Incidents are only ever appended; resolving one is a manual
//! operator task.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use carotte_common::StudentId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("cannot write incident queue: {0}")]
    Io(#[from] std::io::Error),

    #[error("incident queue contains an invalid record: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    TopUp,
    Purchase,
    BonusTransfer,
    InitialBalance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub kind: IncidentKind,
    pub student_id: StudentId,
    pub amount: Decimal,
    /// Counter value the card consumed for the mutation.
    pub card_counter: u16,
    pub terminal: String,
    pub detail: String,
    pub timestamp_ns: u64,
}

impl Incident {
    pub fn new(
        kind: IncidentKind,
        student_id: StudentId,
        amount: Decimal,
        card_counter: u16,
        terminal: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            kind,
            student_id,
            amount,
            card_counter,
            terminal: terminal.into(),
            detail: detail.into(),
            timestamp_ns,
        }
    }
}

pub trait OperatorQueue: Send + Sync {
    fn escalate(&self, incident: &Incident) -> Result<(), EscalationError>;

    /// Every incident recorded so far, oldest first.
    fn incidents(&self) -> Result<Vec<Incident>, EscalationError>;
}

/// Incidents appended to a JSON-lines file.
pub struct JsonlOperatorQueue {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlOperatorQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OperatorQueue for JsonlOperatorQueue {
    fn escalate(&self, incident: &Incident) -> Result<(), EscalationError> {
        let mut line = serde_json::to_string(incident)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn incidents(&self) -> Result<Vec<Incident>, EscalationError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut incidents = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            incidents.push(serde_json::from_str(&line)?);
        }
        Ok(incidents)
    }
}

/// In-process queue for tests and demo mode.
#[derive(Default)]
pub struct MemoryOperatorQueue {
    incidents: Mutex<Vec<Incident>>,
}

impl MemoryOperatorQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperatorQueue for MemoryOperatorQueue {
    fn escalate(&self, incident: &Incident) -> Result<(), EscalationError> {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(incident.clone());
        Ok(())
    }

    fn incidents(&self) -> Result<Vec<Incident>, EscalationError> {
        Ok(self
            .incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// Record the incident and log it. A queue failure is logged too: the
/// caller still reports the divergence.
pub(crate) fn raise(queue: &dyn OperatorQueue, incident: &Incident) {
    error!(
        kind = ?incident.kind,
        student = %incident.student_id,
        amount = %incident.amount,
        counter = incident.card_counter,
        detail = %incident.detail,
        "Card and ledger diverged, operator action required"
    );
    if let Err(e) = queue.escalate(incident) {
        error!(error = %e, student = %incident.student_id, "Failed to queue incident");
    }
}
