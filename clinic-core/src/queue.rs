//! Per-doctor daily waiting line
//!
//! Invariant: for one `(tenant, doctor, date)` the `Waiting` entries hold
//! positions exactly `1..=n`; every other entry has no position. Every
//! mutation on [`DoctorQueue`] re-sequences before returning.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ClinicError, Result};
use crate::impl_record;
use crate::record::RecordMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    #[default]
    Normal,
    Urgent,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    InConsultation,
    Completed,
    Skipped,
    Cancelled,
}

impl QueueStatus {
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        use QueueStatus::*;
        matches!(
            (self, next),
            (Waiting, InConsultation)
                | (Waiting, Completed)
                | (Waiting, Skipped)
                | (Waiting, Cancelled)
                | (InConsultation, Completed)
                | (Skipped, Waiting)
                | (Skipped, Cancelled)
        )
    }

    pub fn is_open(self) -> bool {
        matches!(self, QueueStatus::Waiting | QueueStatus::InConsultation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub tenant_id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub appointment_id: Option<String>,
    pub queue_date: NaiveDate,
    pub token_number: u32,
    pub position: Option<u32>,
    pub priority: QueuePriority,
    pub status: QueueStatus,
    pub checked_in_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub meta: RecordMeta,
}

impl_record!(QueueEntry, "queue_entries");

/// Arguments for a fresh queue entry
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    pub id: String,
    pub tenant_id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub appointment_id: Option<String>,
    pub queue_date: NaiveDate,
    pub priority: QueuePriority,
}

impl QueueEntry {
    fn set_status(&mut self, next: QueueStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                queue_entry_id = %self.id,
                from = ?self.status,
                to = ?next,
                "Rejected queue transition"
            );
            return Err(ClinicError::transition("queue entry", self.status, next));
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitingView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub estimated_wait_minutes: u32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QueueStats {
    pub waiting: usize,
    pub in_consultation: usize,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Mean of `called_at - checked_in_at` over served entries
    pub average_wait_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub doctor_id: String,
    pub date: NaiveDate,
    pub waiting: Vec<WaitingView>,
    pub in_consultation: Option<QueueEntry>,
    pub stats: QueueStats,
}

/// All entries of one doctor's queue for one day
#[derive(Debug, Clone)]
pub struct DoctorQueue {
    doctor_id: String,
    date: NaiveDate,
    entries: Vec<QueueEntry>,
    dirty: BTreeSet<String>,
}

impl DoctorQueue {
    pub fn new(doctor_id: impl Into<String>, date: NaiveDate, entries: Vec<QueueEntry>) -> Self {
        let doctor_id = doctor_id.into();
        let entries = entries
            .into_iter()
            .filter(|e| e.doctor_id == doctor_id && e.queue_date == date)
            .collect();
        Self {
            doctor_id,
            date,
            entries,
            dirty: BTreeSet::new(),
        }
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries modified since load, for persisting
    pub fn dirty_entries_mut(&mut self) -> impl Iterator<Item = &mut QueueEntry> {
        let dirty = &self.dirty;
        self.entries.iter_mut().filter(move |e| dirty.contains(&e.id))
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.dirty.contains(id)
    }

    /// Next token for the day; tokens are never reused
    pub fn next_token(&self) -> u32 {
        self.entries.iter().map(|e| e.token_number).max().unwrap_or(0) + 1
    }

    /// Waiting entries in line order
    pub fn waiting(&self) -> Vec<&QueueEntry> {
        self.waiting_order().into_iter().map(|i| &self.entries[i]).collect()
    }

    pub fn in_consultation(&self) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .find(|e| e.status == QueueStatus::InConsultation)
    }

    /// Add a new waiting entry, placed by priority; returns its position
    pub fn enqueue(&mut self, new: NewQueueEntry, now: DateTime<Utc>) -> Result<u32> {
        if new.doctor_id != self.doctor_id || new.queue_date != self.date {
            return Err(ClinicError::validation(
                "queue entry does not belong to this doctor's queue",
            ));
        }
        if self
            .entries
            .iter()
            .any(|e| e.patient_id == new.patient_id && e.status.is_open())
        {
            return Err(ClinicError::Conflict(format!(
                "patient {} is already in this queue",
                new.patient_id
            )));
        }

        let entry = QueueEntry {
            id: new.id.clone(),
            tenant_id: new.tenant_id,
            doctor_id: new.doctor_id,
            patient_id: new.patient_id,
            appointment_id: new.appointment_id,
            queue_date: new.queue_date,
            token_number: self.next_token(),
            position: None,
            priority: new.priority,
            status: QueueStatus::Waiting,
            checked_in_at: now,
            called_at: None,
            completed_at: None,
            meta: RecordMeta::new(now),
        };
        self.entries.push(entry);
        self.dirty.insert(new.id.clone());
        let idx = self.entries.len() - 1;
        self.place_by_priority(idx);
        self.position_of(&new.id)
    }

    /// Move the head of the line into consultation
    pub fn call_next(&mut self, now: DateTime<Utc>) -> Result<&QueueEntry> {
        if let Some(current) = self.in_consultation() {
            return Err(ClinicError::Conflict(format!(
                "token {} is still in consultation",
                current.token_number
            )));
        }
        let Some(&idx) = self.waiting_order().first() else {
            return Err(ClinicError::Conflict("no patients waiting".to_string()));
        };
        {
            let entry = &mut self.entries[idx];
            entry.set_status(QueueStatus::InConsultation)?;
            entry.called_at = Some(now);
        }
        self.dirty.insert(self.entries[idx].id.clone());
        self.resequence(self.waiting_order());
        Ok(&self.entries[idx])
    }

    pub fn complete(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let idx = self.index_of(id)?;
        {
            let entry = &mut self.entries[idx];
            entry.set_status(QueueStatus::Completed)?;
            if entry.called_at.is_none() {
                entry.called_at = Some(now);
            }
            entry.completed_at = Some(now);
        }
        self.dirty.insert(id.to_string());
        self.resequence(self.waiting_order());
        Ok(())
    }

    /// Step out of line; the token is kept for a later requeue
    pub fn skip(&mut self, id: &str) -> Result<()> {
        self.change_status(id, QueueStatus::Skipped)
    }

    pub fn cancel(&mut self, id: &str) -> Result<()> {
        self.change_status(id, QueueStatus::Cancelled)
    }

    /// Return a skipped entry to the line, placed by priority
    pub fn requeue(&mut self, id: &str) -> Result<u32> {
        let idx = self.index_of(id)?;
        self.entries[idx].set_status(QueueStatus::Waiting)?;
        self.dirty.insert(id.to_string());
        self.place_by_priority(idx);
        self.position_of(id)
    }

    /// Manually move a waiting entry; the target is clamped to `1..=n`
    pub fn move_to(&mut self, id: &str, position: u32) -> Result<u32> {
        let idx = self.index_of(id)?;
        self.ensure_waiting(idx)?;
        let mut order: Vec<usize> = self
            .waiting_order()
            .into_iter()
            .filter(|&i| i != idx)
            .collect();
        let target = (position.max(1) as usize - 1).min(order.len());
        order.insert(target, idx);
        self.resequence(order);
        self.position_of(id)
    }

    pub fn change_priority(&mut self, id: &str, priority: QueuePriority) -> Result<u32> {
        let idx = self.index_of(id)?;
        self.ensure_waiting(idx)?;
        if self.entries[idx].priority != priority {
            self.entries[idx].priority = priority;
            self.dirty.insert(id.to_string());
        }
        self.place_by_priority(idx);
        self.position_of(id)
    }

    /// Minutes until a waiting entry is expected to be called
    pub fn estimated_wait(
        &self,
        id: &str,
        avg_consultation_minutes: u32,
        now: DateTime<Utc>,
    ) -> Option<u32> {
        let entry = self.get(id)?;
        if entry.status != QueueStatus::Waiting {
            return None;
        }
        let position = entry.position?;
        let ahead = (position - 1) * avg_consultation_minutes;
        Some(ahead + self.remaining_consultation(avg_consultation_minutes, now))
    }

    fn remaining_consultation(&self, avg_consultation_minutes: u32, now: DateTime<Utc>) -> u32 {
        self.in_consultation()
            .and_then(|e| e.called_at)
            .map(|called| {
                let elapsed = (now - called).num_minutes().max(0) as u32;
                avg_consultation_minutes.saturating_sub(elapsed)
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        let mut waits = Vec::new();
        for entry in &self.entries {
            match entry.status {
                QueueStatus::Waiting => stats.waiting += 1,
                QueueStatus::InConsultation => stats.in_consultation += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Skipped => stats.skipped += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }
            if let Some(called) = entry.called_at {
                waits.push((called - entry.checked_in_at).num_minutes().max(0));
            }
        }
        if !waits.is_empty() {
            let total: i64 = waits.iter().sum();
            let count = waits.len() as i64;
            stats.average_wait_minutes = Some(((total + count / 2) / count) as u32);
        }
        stats
    }

    pub fn snapshot(&self, avg_consultation_minutes: u32, now: DateTime<Utc>) -> QueueSnapshot {
        let remaining = self.remaining_consultation(avg_consultation_minutes, now);
        let waiting = self
            .waiting()
            .into_iter()
            .map(|e| WaitingView {
                estimated_wait_minutes: (e.position.unwrap_or(1) - 1) * avg_consultation_minutes
                    + remaining,
                entry: e.clone(),
            })
            .collect();
        QueueSnapshot {
            doctor_id: self.doctor_id.clone(),
            date: self.date,
            waiting,
            in_consultation: self.in_consultation().cloned(),
            stats: self.stats(),
        }
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ClinicError::not_found("queue_entries", id))
    }

    fn position_of(&self, id: &str) -> Result<u32> {
        self.get(id)
            .and_then(|e| e.position)
            .ok_or_else(|| ClinicError::Storage(format!("queue entry {} lost its position", id)))
    }

    fn ensure_waiting(&self, idx: usize) -> Result<()> {
        let entry = &self.entries[idx];
        if entry.status != QueueStatus::Waiting {
            return Err(ClinicError::Conflict(format!(
                "queue entry {} is not waiting",
                entry.id
            )));
        }
        Ok(())
    }

    fn change_status(&mut self, id: &str, next: QueueStatus) -> Result<()> {
        let idx = self.index_of(id)?;
        self.entries[idx].set_status(next)?;
        self.dirty.insert(id.to_string());
        self.resequence(self.waiting_order());
        Ok(())
    }

    /// Indices of waiting entries by current position, ties broken by token
    fn waiting_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == QueueStatus::Waiting)
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| {
            let e = &self.entries[i];
            (e.position.unwrap_or(u32::MAX), e.token_number)
        });
        order
    }

    /// Re-insert `idx` behind the last waiting entry of equal or higher priority
    fn place_by_priority(&mut self, idx: usize) {
        let priority = self.entries[idx].priority;
        let mut order: Vec<usize> = self
            .waiting_order()
            .into_iter()
            .filter(|&i| i != idx)
            .collect();
        let insert_at = order
            .iter()
            .rposition(|&i| self.entries[i].priority >= priority)
            .map(|p| p + 1)
            .unwrap_or(0);
        order.insert(insert_at, idx);
        self.resequence(order);
    }

    /// Assign positions `1..=n` along `order` and clear all others
    fn resequence(&mut self, order: Vec<usize>) {
        let mut assigned = vec![None; self.entries.len()];
        for (pos, &i) in order.iter().enumerate() {
            assigned[i] = Some(pos as u32 + 1);
        }
        for (i, entry) in self.entries.iter_mut().enumerate() {
            let target = if entry.status == QueueStatus::Waiting {
                assigned[i]
            } else {
                None
            };
            if entry.position != target {
                entry.position = target;
                self.dirty.insert(entry.id.clone());
            }
        }
    }
}
