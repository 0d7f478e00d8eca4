//! Terminus-side accumulator of pending add/delete/modify handles. Composes a
//! `pldmPDRRepositoryChgEvent`, falling back to `refreshEntireRepository` when
//! the pending set would overflow either its own capacity or the caller's MTU.

use heapless::Vec as HVec;

use crate::config::MAX_ENTRIES_PER_RECORD;
use crate::error::{PdrError, PdrResult};
use crate::event::{ChangeRecord, Event, Format, Operation};

/// Accumulates pending change handles across at most three change records
/// (delete, add, modify), each bounded to `MAX_ENTRIES_PER_RECORD`.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    deleted: HVec<u32, MAX_ENTRIES_PER_RECORD>,
    added: HVec<u32, MAX_ENTRIES_PER_RECORD>,
    modified: HVec<u32, MAX_ENTRIES_PER_RECORD>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        ChangeTracker { deleted: HVec::new(), added: HVec::new(), modified: HVec::new() }
    }

    pub fn record_delete(&mut self, entry: u32) -> PdrResult<()> {
        self.deleted.push(entry).map_err(|_| PdrError::Full)
    }

    pub fn record_add(&mut self, entry: u32) -> PdrResult<()> {
        self.added.push(entry).map_err(|_| PdrError::Full)
    }

    pub fn record_modify(&mut self, entry: u32) -> PdrResult<()> {
        self.modified.push(entry).map_err(|_| PdrError::Full)
    }

    pub fn clear(&mut self) {
        self.deleted.clear();
        self.added.clear();
        self.modified.clear();
    }

    fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty() && self.modified.is_empty()
    }

    fn to_record(op: Operation, entries: &HVec<u32, MAX_ENTRIES_PER_RECORD>) -> ChangeRecord {
        let mut record = ChangeRecord::new(op);
        record.entries = entries.clone();
        record
    }

    /// Compose an event in canonical (delete, add, modify) order, skipping
    /// any-empty records. If `max_size > 0` and the encoded event would exceed
    /// it, fall back to `refreshEntireRepository` rather than emit a
    /// potentially-truncated delta.
    pub fn build_event(&self, format: Format, max_size: usize) -> Event {
        if self.is_empty() {
            return Event::refresh_entire_repository();
        }

        let mut event = Event { format_raw: format as u8, records: HVec::new() };
        if !self.deleted.is_empty() {
            let _ = event.records.push(Self::to_record(Operation::RecordsDeleted, &self.deleted));
        }
        if !self.added.is_empty() {
            let _ = event.records.push(Self::to_record(Operation::RecordsAdded, &self.added));
        }
        if !self.modified.is_empty() {
            let _ = event.records.push(Self::to_record(Operation::RecordsModified, &self.modified));
        }

        if max_size > 0 && event.encoded_len() > max_size {
            return Event::refresh_entire_repository();
        }
        event
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_yields_refresh_entire_repository() {
        let tracker = ChangeTracker::new();
        let event = tracker.build_event(Format::FormatIsPdrHandles, 0);
        assert_eq!(event.format(), Some(Format::RefreshEntireRepository));
        assert!(event.records.is_empty());
    }

    #[test]
    fn canonical_order_is_delete_add_modify() {
        let mut tracker = ChangeTracker::new();
        tracker.record_modify(3).unwrap();
        tracker.record_add(2).unwrap();
        tracker.record_delete(1).unwrap();
        let event = tracker.build_event(Format::FormatIsPdrHandles, 0);
        assert_eq!(event.records.len(), 3);
        assert_eq!(event.records[0].operation(), Some(Operation::RecordsDeleted));
        assert_eq!(event.records[1].operation(), Some(Operation::RecordsAdded));
        assert_eq!(event.records[2].operation(), Some(Operation::RecordsModified));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn record_full_record_fails_full() {
        let mut tracker = ChangeTracker::new();
        for i in 0..MAX_ENTRIES_PER_RECORD as u32 {
            tracker.record_add(i).unwrap();
        }
        assert_eq!(tracker.record_add(999), Err(PdrError::Full));
    }

    #[test]
    fn oversized_event_falls_back_to_refresh_entire_repository() {
        let mut tracker = ChangeTracker::new();
        for i in 0..MAX_ENTRIES_PER_RECORD as u32 {
            tracker.record_add(i).unwrap();
        }
        // 2 (event header) + 2 (record header) + 16*4 (entries) = 68 bytes; cap at
        // a smaller MTU to force the size fallback.
        let event = tracker.build_event(Format::FormatIsPdrHandles, 16);
        assert_eq!(event.format(), Some(Format::RefreshEntireRepository));
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut tracker = ChangeTracker::new();
        tracker.record_add(1).unwrap();
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
