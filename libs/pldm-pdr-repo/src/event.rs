//! `pldmPDRRepositoryChgEvent` wire codec (DSP0248 §16.14): encode, decode, and
//! the structural validation rules that apply to both directions.

use heapless::Vec as HVec;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::config::{MAX_ENTRIES_PER_RECORD, MAX_RECORDS_PER_EVENT};
use crate::error::{PdrError, PdrResult};

/// What a change record's entries mean for the records it lists.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Operation {
    RefreshAllRecords = 0,
    RecordsDeleted = 1,
    RecordsAdded = 2,
    RecordsModified = 3,
}

/// What an event's entries are, as a whole.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Format {
    RefreshEntireRepository = 0,
    FormatIsPdrTypes = 1,
    FormatIsPdrHandles = 2,
}

/// One `{operation, entries}` record inside an event.
#[derive(Debug, Clone, Default)]
pub struct ChangeRecord {
    pub operation_raw: u8,
    pub entries: HVec<u32, MAX_ENTRIES_PER_RECORD>,
}

impl ChangeRecord {
    pub fn new(operation: Operation) -> Self {
        ChangeRecord { operation_raw: operation as u8, entries: HVec::new() }
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::from_u8(self.operation_raw)
    }
}

/// A full `pldmPDRRepositoryChgEvent`.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub format_raw: u8,
    pub records: HVec<ChangeRecord, MAX_RECORDS_PER_EVENT>,
}

impl Event {
    pub fn format(&self) -> Option<Format> {
        Format::from_u8(self.format_raw)
    }

    /// The `refreshEntireRepository`, no-records event.
    pub fn refresh_entire_repository() -> Self {
        Event { format_raw: Format::RefreshEntireRepository as u8, records: HVec::new() }
    }

    /// Structural validation, applied identically before encode and after decode.
    pub fn validate(&self) -> PdrResult<()> {
        let format = self.format().ok_or(PdrError::Malformed)?;

        // format=refreshEntireRepository implies numRecords=0.
        if format == Format::RefreshEntireRepository && !self.records.is_empty() {
            return Err(PdrError::Malformed);
        }

        // Total records <= 4 (enforced structurally by HVec's capacity, but a
        // decoded event could claim more in its header byte than it carries).
        if self.records.len() > MAX_RECORDS_PER_EVENT {
            return Err(PdrError::Malformed);
        }

        let mut last_op: Option<u8> = None;
        for record in self.records.iter() {
            let op = record.operation().ok_or(PdrError::Malformed)?;

            // formatIsPDRHandles forbids any record from using refreshAllRecords.
            if format == Format::FormatIsPdrHandles && op == Operation::RefreshAllRecords {
                return Err(PdrError::Malformed);
            }

            // Each record's numEntries <= 16 and operation code <= recordsModified.
            if record.entries.len() > MAX_ENTRIES_PER_RECORD || record.operation_raw > Operation::RecordsModified as u8
            {
                return Err(PdrError::Malformed);
            }

            // Records are in non-decreasing operation order.
            if let Some(prev) = last_op {
                if record.operation_raw < prev {
                    return Err(PdrError::Malformed);
                }
            }
            last_op = Some(record.operation_raw);
        }

        // A single format applies per event; mixing types and handles is
        // impossible by construction since `format_raw` is one field, not one
        // per record, so there is nothing further to check here.
        Ok(())
    }

    /// Encoded size in bytes: `2 + sum(2 + 4*numEntries)`.
    pub fn encoded_len(&self) -> usize {
        2 + self.records.iter().map(|r| 2 + 4 * r.entries.len()).sum::<usize>()
    }

    /// Validate, then serialize into `out`. Fails on validation error or if `out`
    /// is too small.
    pub fn encode_into(&self, out: &mut [u8]) -> PdrResult<usize> {
        self.validate()?;
        let len = self.encoded_len();
        if out.len() < len {
            return Err(PdrError::InvalidLength);
        }
        out[0] = self.format_raw;
        out[1] = self.records.len() as u8;
        let mut pos = 2;
        for record in self.records.iter() {
            out[pos] = record.operation_raw;
            out[pos + 1] = record.entries.len() as u8;
            pos += 2;
            for entry in record.entries.iter() {
                out[pos..pos + 4].copy_from_slice(&entry.to_le_bytes());
                pos += 4;
            }
        }
        Ok(len)
    }

    /// Bounds-safe parse, then validate.
    pub fn decode(bytes: &[u8]) -> PdrResult<Self> {
        if bytes.len() < 2 {
            return Err(PdrError::InvalidLength);
        }
        let format_raw = bytes[0];
        let num_records = bytes[1] as usize;
        let mut records = HVec::new();
        let mut pos = 2usize;
        for _ in 0..num_records {
            if pos + 2 > bytes.len() {
                return Err(PdrError::InvalidLength);
            }
            let operation_raw = bytes[pos];
            let num_entries = bytes[pos + 1] as usize;
            pos += 2;
            let mut entries = HVec::new();
            for _ in 0..num_entries {
                if pos + 4 > bytes.len() {
                    return Err(PdrError::InvalidLength);
                }
                let v = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
                entries.push(v).map_err(|_| PdrError::Malformed)?;
                pos += 4;
            }
            records.push(ChangeRecord { operation_raw, entries }).map_err(|_| PdrError::Malformed)?;
        }
        let event = Event { format_raw, records };
        event.validate()?;
        Ok(event)
    }
}
