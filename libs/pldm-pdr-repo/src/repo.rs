//! The local PDR repository: a zero-copy, fixed-capacity, handle-indexed blob
//! store with tombstone deletion, a cached CRC32 signature, a multi-chunk
//! `GetPDR` read protocol, and a `RunInitAgent` rebuild hook.
//!
//! Mirrors the shape of `services/pddb/src/backend/fastspace.rs`: a fixed-size
//! array of small metadata records (there: `PhysPage`; here: `IndexEntry`) sits
//! beside a separately-owned byte buffer, and mutation is tracked so an
//! expensive aggregate (there: nothing cached; here: the CRC32 signature) is
//! only recomputed on demand.

use bitflags::bitflags;
use heapless::Vec as HVec;
use num_derive::{FromPrimitive, ToPrimitive};

use crate::config::{CHUNK_SIZE, COMMON_HEADER_LEN, DEFAULT_BLOB_CAPACITY, DEFAULT_MAX_RECORDS};
use crate::crc32;
use crate::error::{PdrError, PdrResult};
use crate::header::CommonHeader;
use crate::wire::TransferFlag;

bitflags! {
    /// Per-entry metadata flags. Only one bit defined today; the rest are spare,
    /// the way `PhysPage` in `services/pddb` reserves unused bitfield ranges.
    pub struct EntryFlags: u8 {
        const TOMBSTONE = 0b0000_0001;
    }
}

/// Per-record metadata kept outside the blob.
#[derive(Debug, Copy, Clone)]
pub struct IndexEntry {
    pub record_handle: u32,
    pub offset: usize,
    pub size: usize,
    pub pdr_type: u8,
    pub flags: EntryFlags,
}

impl IndexEntry {
    fn is_live(&self) -> bool {
        !self.flags.contains(EntryFlags::TOMBSTONE)
    }
}

/// Repository lifecycle state, as surfaced by `GetPDRRepositoryInfo`.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum RepoState {
    Available = 0,
    UpdateInProgress = 1,
    Failed = 2,
}

/// Cached aggregates returned by `GetPDRRepositoryInfo`.
#[derive(Debug, Copy, Clone)]
pub struct RepoInfo {
    pub state: RepoState,
    pub record_count: u32,
    pub repository_size: u32,
    pub largest_record_size: u32,
    /// Opaque PLDM timestamp104 fields. This subsystem has no clock source of its
    /// own (no transport/host glue is implemented here), so these stay zeroed
    /// unless an integrator calls `set_update_timestamp`.
    pub update_timestamp: [u8; 13],
    pub oem_update_timestamp: [u8; 13],
    pub data_transfer_handle_timeout: u8,
}

impl Default for RepoInfo {
    fn default() -> Self {
        RepoInfo {
            state: RepoState::Available,
            record_count: 0,
            repository_size: 0,
            largest_record_size: 0,
            update_timestamp: [0u8; 13],
            oem_update_timestamp: [0u8; 13],
            data_transfer_handle_timeout: 0,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct SignatureCache {
    value: u32,
    valid: bool,
}

impl Default for SignatureCache {
    fn default() -> Self {
        SignatureCache { value: 0, valid: false }
    }
}

/// The record bytes and continuation metadata for one `GetPDR` chunk.
#[derive(Debug)]
pub struct GetPdrResult<'a> {
    pub payload: &'a [u8],
    pub transfer_flag: TransferFlag,
    pub next_data_transfer_handle: u32,
    pub next_record_handle: u32,
}

/// A `FindPDR` query. `pdr_type` is the only filter implemented today; richer
/// filters (entity type, container ID) would need a PDR schema interpreter
/// and are left as an extension point rather than guessed at.
#[derive(Debug, Copy, Clone)]
pub struct FindPdrQuery {
    pub pdr_type: u8,
    /// 0 means "from the beginning".
    pub start_handle: u32,
}

/// A `FindPDR` match: the full record (header included) and the next matching
/// handle, if any, so the caller can continue iterating.
#[derive(Debug)]
pub struct FindResult<'a> {
    pub record: &'a [u8],
    pub handle: u32,
    pub next_handle: u32,
}

enum Blob<'a, const CAP: usize> {
    Owned([u8; CAP]),
    External(&'a mut [u8]),
}

impl<'a, const CAP: usize> Blob<'a, CAP> {
    fn capacity(&self) -> usize {
        match self {
            Blob::Owned(_) => CAP,
            Blob::External(s) => s.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Blob::Owned(a) => &a[..],
            Blob::External(s) => s,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Blob::Owned(a) => &mut a[..],
            Blob::External(s) => s,
        }
    }
}

/// The local PDR repository. `MAXREC` bounds the index; `CAP` bounds an owned
/// blob (ignored when the blob is externally provided via `init_external`).
pub struct PdrRepository<'a, const MAXREC: usize = DEFAULT_MAX_RECORDS, const CAP: usize = DEFAULT_BLOB_CAPACITY> {
    blob: Blob<'a, CAP>,
    blob_used: usize,
    index: HVec<IndexEntry, MAXREC>,
    info: RepoInfo,
    signature: SignatureCache,
    next_record_handle: u32,
}

impl<'a, const MAXREC: usize, const CAP: usize> PdrRepository<'a, MAXREC, CAP> {
    /// Build a repository that owns its own `CAP`-byte blob.
    pub fn new() -> Self {
        PdrRepository {
            blob: Blob::Owned([0u8; CAP]),
            blob_used: 0,
            index: HVec::new(),
            info: RepoInfo::default(),
            signature: SignatureCache::default(),
            next_record_handle: 1,
        }
    }

    /// Build a repository bound to an externally-owned buffer, e.g. a pre-packed
    /// static image produced by a code-generation pipeline. The repository does
    /// not assume the buffer is empty; call `index_record` to register any
    /// records already present before serving requests.
    pub fn new_external(buffer: &'a mut [u8]) -> Self {
        PdrRepository {
            blob: Blob::External(buffer),
            blob_used: 0,
            index: HVec::new(),
            info: RepoInfo::default(),
            signature: SignatureCache::default(),
            next_record_handle: 1,
        }
    }

    /// Set the repository's update timestamp, for integrators with a clock source.
    pub fn set_update_timestamp(&mut self, timestamp: [u8; 13]) {
        self.info.update_timestamp = timestamp;
    }

    /// Current allocator cursor. Exposed so the manager can implement the
    /// forced-handle insertion protocol: save this, force a handle, insert,
    /// then restore it so the repository's own allocation sequence is
    /// undisturbed.
    pub fn next_handle(&self) -> u32 {
        self.next_record_handle
    }

    /// Overwrite the allocator cursor, returning the previous value so the
    /// caller can restore it afterwards.
    pub fn set_next_handle(&mut self, handle: u32) -> u32 {
        core::mem::replace(&mut self.next_record_handle, handle)
    }

    /// Append a new record, allocating a fresh handle.
    pub fn add_record(&mut self, pdr_type: u8, body: &[u8]) -> PdrResult<u32> {
        if self.index.len() == self.index.capacity() {
            return Err(PdrError::Full);
        }
        let size = COMMON_HEADER_LEN + body.len();
        if self.blob_used + size > self.blob.capacity() {
            return Err(PdrError::NoSpace);
        }
        let handle = self.next_record_handle;
        let header = CommonHeader {
            record_handle: handle,
            header_version: CommonHeader::HEADER_VERSION,
            pdr_type,
            record_change_number: 0,
            data_length: body.len() as u16,
        };
        let offset = self.blob_used;
        {
            let dst = &mut self.blob.as_mut_slice()[offset..offset + size];
            header.write_into(&mut dst[..COMMON_HEADER_LEN])?;
            dst[COMMON_HEADER_LEN..].copy_from_slice(body);
        }
        self.index
            .push(IndexEntry { record_handle: handle, offset, size, pdr_type, flags: EntryFlags::empty() })
            .map_err(|_| PdrError::Full)?;
        self.blob_used += size;
        self.next_record_handle = self.next_record_handle.wrapping_add(1);
        self.signature.valid = false;
        self.recompute_info();
        Ok(handle)
    }

    /// Zero-copy registration of a record already present in the blob at
    /// `offset`, used by code-generated/static-image initialization.
    pub fn index_record(&mut self, offset: usize) -> PdrResult<()> {
        if self.index.len() == self.index.capacity() {
            return Err(PdrError::Full);
        }
        let tail = self.blob.as_slice().get(offset..).ok_or(PdrError::InvalidLength)?;
        let header = CommonHeader::parse(tail)?;
        let size = header.total_size();
        if offset + size > self.blob.capacity() {
            return Err(PdrError::InvalidLength);
        }
        self.index
            .push(IndexEntry {
                record_handle: header.record_handle,
                offset,
                size,
                pdr_type: header.pdr_type,
                flags: EntryFlags::empty(),
            })
            .map_err(|_| PdrError::Full)?;
        if offset + size > self.blob_used {
            self.blob_used = offset + size;
        }
        if header.record_handle >= self.next_record_handle {
            self.next_record_handle = header.record_handle.wrapping_add(1);
        }
        self.signature.valid = false;
        self.recompute_info();
        Ok(())
    }

    /// O(1) tombstone deletion. The blob bytes are left untouched until a rebuild.
    pub fn remove_record(&mut self, handle: u32) -> PdrResult<()> {
        let pos = self.live_position(handle).ok_or(PdrError::NotFound)?;
        self.index[pos].flags.insert(EntryFlags::TOMBSTONE);
        self.signature.valid = false;
        self.recompute_info();
        Ok(())
    }

    pub fn get_repository_info(&self) -> RepoInfo {
        self.info
    }

    /// Recompute the CRC32 signature if invalidated by a mutation, then return it.
    pub fn get_signature(&mut self) -> u32 {
        if !self.signature.valid {
            self.signature.value = crc32::checksum(&self.blob.as_slice()[..self.blob_used]);
            self.signature.valid = true;
        }
        self.signature.value
    }

    /// Multi-chunk read. `record_handle == 0` selects the first live record;
    /// `data_transfer_handle` is the byte offset inside the record to resume at.
    pub fn get_pdr(&self, record_handle: u32, data_transfer_handle: u32) -> PdrResult<GetPdrResult<'_>> {
        let pos = self.resolve_handle(record_handle)?;
        let entry = self.index[pos];
        let offset = data_transfer_handle as usize;
        if offset >= entry.size {
            return Err(PdrError::InvalidOffset);
        }
        let remaining = entry.size - offset;
        let chunk = remaining.min(CHUNK_SIZE);
        let payload = &self.blob.as_slice()[entry.offset + offset..entry.offset + offset + chunk];
        let is_first = offset == 0;
        let is_last = offset + chunk == entry.size;
        let transfer_flag = match (is_first, is_last) {
            (true, true) => TransferFlag::StartAndEnd,
            (true, false) => TransferFlag::Start,
            (false, true) => TransferFlag::End,
            (false, false) => TransferFlag::Middle,
        };
        let next_data_transfer_handle = if is_last { 0 } else { (offset + chunk) as u32 };
        let next_record_handle =
            if is_last { self.next_live_after(pos).map(|p| self.index[p].record_handle).unwrap_or(0) } else { 0 };
        Ok(GetPdrResult { payload, transfer_flag, next_data_transfer_handle, next_record_handle })
    }

    /// Scan forward from (but not including) `query.start_handle`, skipping
    /// tombstones, for the first entry whose `pdr_type` matches.
    pub fn find_pdr(&self, query: FindPdrQuery) -> PdrResult<FindResult<'_>> {
        let begin = if query.start_handle == 0 {
            0
        } else {
            self.live_position(query.start_handle).ok_or(PdrError::NotFound)? + 1
        };
        let mut found: Option<usize> = None;
        for (i, e) in self.index.iter().enumerate().skip(begin) {
            if e.is_live() && e.pdr_type == query.pdr_type {
                found = Some(i);
                break;
            }
        }
        let pos = found.ok_or(PdrError::NotFound)?;
        let entry = self.index[pos];
        let next_handle = self
            .index
            .iter()
            .enumerate()
            .skip(pos + 1)
            .find(|(_, e)| e.is_live() && e.pdr_type == query.pdr_type)
            .map(|(_, e)| e.record_handle)
            .unwrap_or(0);
        Ok(FindResult {
            record: &self.blob.as_slice()[entry.offset..entry.offset + entry.size],
            handle: entry.record_handle,
            next_handle,
        })
    }

    /// Reset all storage and invoke `populate` to repopulate the repository via
    /// `add_record`/`index_record`. Restores `Available` state on success.
    pub fn run_init_agent(
        &mut self,
        populate: impl FnOnce(&mut Self) -> PdrResult<()>,
    ) -> PdrResult<()> {
        self.info.state = RepoState::UpdateInProgress;
        self.blob_used = 0;
        self.index.clear();
        self.next_record_handle = 1;
        self.signature.valid = false;
        match populate(self) {
            Ok(()) => {
                self.recompute_info();
                self.info.state = RepoState::Available;
                Ok(())
            }
            Err(e) => {
                self.info.state = RepoState::Failed;
                log::warn!("run_init_agent: populate callback failed: {e}");
                Err(e)
            }
        }
    }

    fn live_position(&self, handle: u32) -> Option<usize> {
        self.index.iter().position(|e| e.is_live() && e.record_handle == handle)
    }

    fn next_live_after(&self, pos: usize) -> Option<usize> {
        self.index.iter().enumerate().skip(pos + 1).find(|(_, e)| e.is_live()).map(|(i, _)| i)
    }

    /// `handle == 0` means "first live record"; otherwise resolve to its position.
    fn resolve_handle(&self, handle: u32) -> PdrResult<usize> {
        if handle == 0 {
            self.index.iter().position(|e| e.is_live()).ok_or(PdrError::NotFound)
        } else {
            self.live_position(handle).ok_or(PdrError::NotFound)
        }
    }

    fn recompute_info(&mut self) {
        let mut count = 0u32;
        let mut size = 0u32;
        let mut largest = 0u32;
        for e in self.index.iter().filter(|e| e.is_live()) {
            count += 1;
            size += e.size as u32;
            largest = largest.max(e.size as u32);
        }
        self.info.record_count = count;
        self.info.repository_size = size;
        self.info.largest_record_size = largest;
    }
}

impl<'a, const MAXREC: usize, const CAP: usize> Default for PdrRepository<'a, MAXREC, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Repo = PdrRepository<'static, 64, 8192>;

    #[test]
    fn add_then_get_pdr_returns_exact_bytes() {
        let mut repo = Repo::new();
        let handle = repo.add_record(1, &[0xAA, 0xBB]).unwrap();
        assert_eq!(handle, 1);
        let r = repo.get_pdr(0, 0).unwrap();
        assert_eq!(r.payload, &[0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x00, 0xAA, 0xBB]);
        assert_eq!(r.transfer_flag, TransferFlag::StartAndEnd);
        assert_eq!(r.next_record_handle, 0);
        assert_eq!(r.next_data_transfer_handle, 0);
        let info = repo.get_repository_info();
        assert_eq!(info.record_count, 1);
        assert_eq!(info.repository_size, 12);
        assert_eq!(info.largest_record_size, 12);
    }

    #[test]
    fn multi_part_fetch_reassembles_across_chunks() {
        let mut repo = Repo::new();
        let body = [0u8; 200];
        let handle = repo.add_record(1, &body).unwrap();
        assert_eq!(handle, 1);
        let first = repo.get_pdr(1, 0).unwrap();
        assert_eq!(first.payload.len(), 128);
        assert_eq!(first.transfer_flag, TransferFlag::Start);
        assert_eq!(first.next_data_transfer_handle, 128);

        let second = repo.get_pdr(1, 128).unwrap();
        assert_eq!(second.payload.len(), 82);
        assert_eq!(second.transfer_flag, TransferFlag::End);
        assert_eq!(second.next_data_transfer_handle, 0);
        assert_eq!(second.next_record_handle, 0);
    }

    #[test]
    fn exactly_128_bytes_is_start_and_end() {
        let mut repo = Repo::new();
        repo.add_record(1, &[0u8; 118]).unwrap(); // header(10) + 118 = 128
        let r = repo.get_pdr(1, 0).unwrap();
        assert_eq!(r.transfer_flag, TransferFlag::StartAndEnd);
        assert_eq!(r.payload.len(), 128);
    }

    #[test]
    fn one_twenty_nine_bytes_splits_128_then_1() {
        let mut repo = Repo::new();
        repo.add_record(1, &[0u8; 119]).unwrap(); // header(10) + 119 = 129
        let first = repo.get_pdr(1, 0).unwrap();
        assert_eq!(first.payload.len(), 128);
        assert_eq!(first.transfer_flag, TransferFlag::Start);
        let second = repo.get_pdr(1, 128).unwrap();
        assert_eq!(second.payload.len(), 1);
        assert_eq!(second.transfer_flag, TransferFlag::End);
    }

    #[test]
    fn tombstoning_a_record_invalidates_cached_signature() {
        let mut repo = Repo::new();
        repo.add_record(1, &[0x01]).unwrap();
        repo.add_record(1, &[0x02]).unwrap();
        let s0 = repo.get_signature();
        repo.remove_record(1).unwrap();
        assert_eq!(repo.get_repository_info().record_count, 1);
        let s1 = repo.get_signature();
        assert_ne!(s0, s1);
        // idempotent signature read
        assert_eq!(s1, repo.get_signature());
    }

    #[test]
    fn remove_record_is_idempotent_and_fails_second_time() {
        let mut repo = Repo::new();
        repo.add_record(1, &[]).unwrap();
        repo.remove_record(1).unwrap();
        assert_eq!(repo.remove_record(1), Err(PdrError::NotFound));
    }

    #[test]
    fn get_pdr_at_exact_size_is_invalid_offset() {
        let mut repo = Repo::new();
        repo.add_record(1, &[0xAA]).unwrap();
        let entry_size = 11u32; // 10 header + 1 body
        assert_eq!(repo.get_pdr(1, entry_size), Err(PdrError::InvalidOffset));
    }

    #[test]
    fn adding_past_max_records_fails_full_with_no_partial_state() {
        let mut repo: PdrRepository<'static, 2, 8192> = PdrRepository::new();
        repo.add_record(1, &[]).unwrap();
        repo.add_record(1, &[]).unwrap();
        let before = repo.get_repository_info();
        assert_eq!(repo.add_record(1, &[]), Err(PdrError::Full));
        assert_eq!(repo.get_repository_info().record_count, before.record_count);
    }

    #[test]
    fn add_record_too_big_fails_no_space() {
        let mut repo: PdrRepository<'static, 64, 16> = PdrRepository::new();
        assert_eq!(repo.add_record(1, &[0u8; 32]), Err(PdrError::NoSpace));
    }

    #[test]
    fn find_pdr_scans_by_type_and_reports_next_match() {
        let mut repo = Repo::new();
        repo.add_record(1, &[]).unwrap(); // handle 1
        repo.add_record(2, &[]).unwrap(); // handle 2
        repo.add_record(1, &[]).unwrap(); // handle 3
        let r = repo.find_pdr(FindPdrQuery { pdr_type: 1, start_handle: 0 }).unwrap();
        assert_eq!(r.handle, 1);
        assert_eq!(r.next_handle, 3);
        let r2 = repo.find_pdr(FindPdrQuery { pdr_type: 1, start_handle: 1 }).unwrap();
        assert_eq!(r2.handle, 3);
        assert_eq!(r2.next_handle, 0);
    }

    #[test]
    fn find_pdr_on_tombstoned_start_handle_fails_not_found() {
        let mut repo = Repo::new();
        repo.add_record(1, &[]).unwrap();
        repo.add_record(1, &[]).unwrap();
        repo.remove_record(1).unwrap();
        assert_eq!(repo.find_pdr(FindPdrQuery { pdr_type: 1, start_handle: 1 }), Err(PdrError::NotFound));
    }

    #[test]
    fn run_init_agent_rebuilds_via_populate_callback() {
        let mut repo = Repo::new();
        repo.add_record(1, &[0xFF]).unwrap();
        repo.run_init_agent(|r| {
            r.add_record(2, &[0x01, 0x02])?;
            Ok(())
        })
        .unwrap();
        let info = repo.get_repository_info();
        assert_eq!(info.state, RepoState::Available);
        assert_eq!(info.record_count, 1);
        let r = repo.get_pdr(0, 0).unwrap();
        assert_eq!(r.payload[5], 2); // pdr_type byte of the rebuilt record
    }

    #[test]
    fn run_init_agent_failure_marks_failed_state() {
        let mut repo = Repo::new();
        assert!(repo.run_init_agent(|_| Err(PdrError::Malformed)).is_err());
        assert_eq!(repo.get_repository_info().state, RepoState::Failed);
    }

    #[test]
    fn new_external_binds_caller_buffer() {
        let mut buf = [0u8; 256];
        let mut repo: PdrRepository<'_, 8, 256> = PdrRepository::new_external(&mut buf);
        let h = repo.add_record(3, &[9, 9]).unwrap();
        assert_eq!(h, 1);
    }

    #[test]
    fn index_record_replays_a_prepacked_image() {
        let mut buf = [0u8; 64];
        CommonHeader { record_handle: 7, header_version: 1, pdr_type: 5, record_change_number: 0, data_length: 2 }
            .write_into(&mut buf[0..10])
            .unwrap();
        buf[10] = 0xAB;
        buf[11] = 0xCD;
        let mut repo: PdrRepository<'_, 8, 64> = PdrRepository::new_external(&mut buf);
        repo.index_record(0).unwrap();
        assert_eq!(repo.next_handle(), 8);
        let r = repo.get_pdr(7, 0).unwrap();
        assert_eq!(r.payload[10], 0xAB);
    }

    #[test]
    fn index_record_rejects_offset_past_capacity_without_panicking() {
        let mut buf = [0u8; 64];
        let mut repo: PdrRepository<'_, 8, 64> = PdrRepository::new_external(&mut buf);
        assert_eq!(repo.index_record(1000), Err(PdrError::InvalidLength));
    }

    #[test]
    fn forced_handle_insertion_save_restore_roundtrip() {
        let mut repo = Repo::new();
        let saved = repo.set_next_handle(0x10001);
        let h = repo.add_record(1, &[]).unwrap();
        assert_eq!(h, 0x10001);
        repo.set_next_handle(saved);
        let h2 = repo.add_record(1, &[]).unwrap();
        assert_eq!(h2, 1);
    }
}
