//! Append-only audit trail over executions.
//!
//! Entries are created Pending when an execution starts; the terminal
//! result is written exactly once, by whichever of complete/fail lands
//! first. Persistence beyond process lifetime is the embedder's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Terminal (or pending) result of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Pending,
    Success,
    Failed,
    RolledBack,
}

/// One audit record
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub agent_id: String,
    pub execution_id: Uuid,
    pub params: Value,
    pub result: AuditResult,
    pub attestation: Option<String>,
    pub signatures: Vec<String>,
    pub error: Option<String>,
    /// Set when an emergency stop interrupted this entry while pending
    pub note: Option<String>,
}

/// Filter for audit queries; empty filter matches everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub execution_id: Option<Uuid>,
    pub agent_id: Option<String>,
    pub result: Option<AuditResult>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub(crate) fn append_pending(
        &mut self,
        execution_id: Uuid,
        agent_id: &str,
        action: &str,
        params: Value,
        now: DateTime<Utc>,
    ) {
        self.entries.push(AuditEntry {
            id: Uuid::new_v4(),
            timestamp: now,
            action: action.to_string(),
            agent_id: agent_id.to_string(),
            execution_id,
            params,
            result: AuditResult::Pending,
            attestation: None,
            signatures: Vec::new(),
            error: None,
            note: None,
        });
    }

    /// Write the terminal result for an execution's pending entry.
    /// Returns false when no pending entry exists (already finalized or
    /// never started); the first writer wins.
    pub(crate) fn finalize(
        &mut self,
        execution_id: Uuid,
        result: AuditResult,
        attestation: Option<String>,
        error: Option<String>,
        signatures: Vec<String>,
    ) -> bool {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.execution_id == execution_id && e.result == AuditResult::Pending);

        match entry {
            Some(entry) => {
                entry.result = result;
                entry.attestation = attestation;
                entry.error = error;
                entry.signatures = signatures;
                true
            }
            None => {
                warn!(
                    "No pending audit entry for execution {} (result {:?} dropped)",
                    execution_id, result
                );
                false
            }
        }
    }

    /// Annotate every still-pending entry, e.g. when an emergency stop
    /// interrupts the system mid-flight.
    pub(crate) fn annotate_pending(&mut self, note: &str) -> usize {
        let mut annotated = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.result == AuditResult::Pending)
        {
            entry.note = Some(note.to_string());
            annotated += 1;
        }
        annotated
    }

    pub(crate) fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let matches = self.entries.iter().filter(|e| {
            filter
                .execution_id
                .map_or(true, |id| e.execution_id == id)
                && filter
                    .agent_id
                    .as_deref()
                    .map_or(true, |id| e.agent_id == id)
                && filter.result.map_or(true, |r| e.result == r)
                && filter.since.map_or(true, |since| e.timestamp >= since)
        });

        match filter.limit {
            // Limit keeps the newest entries, still in chronological order.
            Some(limit) => {
                let mut newest: Vec<AuditEntry> = matches.rev().take(limit).cloned().collect();
                newest.reverse();
                newest
            }
            None => matches.cloned().collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
