//! Multi-terminus manager: discovery, handle remapping into disjoint ranges,
//! the per-terminus sync state machine, and origin lookup for a consolidated
//! handle.

use heapless::Vec as HVec;
use pldm_pdr_repo::{FindPdrQuery, PdrError, PdrRepository, PdrResult};

use crate::config::{MAX_HANDLE_MAP_ENTRIES, MAX_TERMINI, REASSEMBLY_BUF_LEN};
use crate::fetcher;
use crate::transport::Transport;

/// Per-terminus lifecycle state: `Unused -> Discovered -> Syncing -> {Synced,
/// Error}`, with `Synced -> Stale -> Syncing` on a detected remote change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TerminusState {
    Unused,
    Discovered,
    Syncing,
    Synced,
    Stale,
    Error,
}

/// One `{remoteHandle, localHandle}` mapping entry.
#[derive(Debug, Copy, Clone)]
pub struct HandleMapEntry {
    pub remote_handle: u32,
    pub local_handle: u32,
}

/// Per-terminus scratch area for reassembling a multi-part `GetPDR` response.
#[derive(Debug)]
pub struct FetchContext {
    pub reassembly_buf: [u8; REASSEMBLY_BUF_LEN],
    pub reassembly_len: usize,
    pub next_record_handle: u32,
    pub records_fetched: u32,
    pub retries: u32,
}

impl Default for FetchContext {
    fn default() -> Self {
        FetchContext {
            reassembly_buf: [0u8; REASSEMBLY_BUF_LEN],
            reassembly_len: 0,
            next_record_handle: 0,
            records_fetched: 0,
            retries: 0,
        }
    }
}

/// One registered remote endpoint and everything the manager tracks about it.
pub struct Terminus {
    pub state: TerminusState,
    pub eid: u8,
    pub terminus_id: u8,
    pub terminus_handle: u16,
    pub remote_record_count: u32,
    pub remote_repo_size: u32,
    pub last_signature: u32,
    pub local_handle_seq: u32,
    pub local_record_count: u32,
    pub fetch_ctx: FetchContext,
    pub handle_map: HVec<HandleMapEntry, MAX_HANDLE_MAP_ENTRIES>,
}

impl Terminus {
    pub(crate) fn unused() -> Self {
        Terminus {
            state: TerminusState::Unused,
            eid: 0,
            terminus_id: 0,
            terminus_handle: 0,
            remote_record_count: 0,
            remote_repo_size: 0,
            last_signature: 0,
            local_handle_seq: 1,
            local_record_count: 0,
            fetch_ctx: FetchContext::default(),
            handle_map: HVec::new(),
        }
    }

    fn local_for_remote(&self, remote_handle: u32) -> Option<u32> {
        self.handle_map.iter().find(|e| e.remote_handle == remote_handle).map(|e| e.local_handle)
    }

    fn forget_remote(&mut self, remote_handle: u32) -> Option<u32> {
        if let Some(pos) = self.handle_map.iter().position(|e| e.remote_handle == remote_handle) {
            let local = self.handle_map[pos].local_handle;
            self.handle_map.swap_remove(pos);
            Some(local)
        } else {
            None
        }
    }
}

/// `remap(terminusIndex, seq) = ((terminusIndex+1) << 16) | (seq & 0xFFFF)`.
/// Partitions the 32-bit handle space into up to `MAX_TERMINI` disjoint
/// `0x1_0000`-wide ranges.
pub fn remap(terminus_index: usize, seq: u32) -> u32 {
    (((terminus_index as u32) + 1) << 16) | (seq & 0xFFFF)
}

/// Recover a consolidated handle's owning terminus slot index.
pub fn terminus_index_of(handle: u32) -> Option<usize> {
    let slot = (handle >> 16).checked_sub(1)?;
    Some(slot as usize)
}

/// Owns the consolidated repository and the per-terminus state machine.
pub struct Manager<'a, const MAXREC: usize, const CAP: usize> {
    pub repo: PdrRepository<'a, MAXREC, CAP>,
    termini: [Terminus; MAX_TERMINI],
}

impl<'a, const MAXREC: usize, const CAP: usize> Manager<'a, MAXREC, CAP> {
    pub fn new(repo: PdrRepository<'a, MAXREC, CAP>) -> Self {
        Manager { repo, termini: core::array::from_fn(|_| Terminus::unused()) }
    }

    fn slot_of(&self, eid: u8) -> Option<usize> {
        self.termini.iter().position(|t| t.state != TerminusState::Unused && t.eid == eid)
    }

    /// Read-only state accessor for host-side status reporting.
    pub fn terminus_state(&self, eid: u8) -> Option<TerminusState> {
        self.slot_of(eid).map(|i| self.termini[i].state)
    }

    pub fn terminus_count_in_state(&self, state: TerminusState) -> usize {
        self.termini.iter().filter(|t| t.state == state).count()
    }

    /// Register a new terminus into the first `Unused` slot.
    pub fn add_terminus(&mut self, eid: u8, terminus_handle: u16, terminus_id: u8) -> PdrResult<()> {
        if self.slot_of(eid).is_some() {
            return Err(PdrError::Malformed);
        }
        let slot = self.termini.iter().position(|t| t.state == TerminusState::Unused).ok_or(PdrError::Full)?;
        self.termini[slot] = Terminus::unused();
        self.termini[slot].eid = eid;
        self.termini[slot].terminus_handle = terminus_handle;
        self.termini[slot].terminus_id = terminus_id;
        self.termini[slot].state = TerminusState::Discovered;
        Ok(())
    }

    /// Purge every consolidated record owned by `eid` and return the slot to
    /// `Unused`.
    pub fn remove_terminus(&mut self, eid: u8) -> PdrResult<()> {
        let slot = self.slot_of(eid).ok_or(PdrError::NotFound)?;
        self.purge_slot(slot);
        self.termini[slot] = Terminus::unused();
        Ok(())
    }

    fn purge_slot(&mut self, slot: usize) {
        let mut handles: HVec<u32, MAX_HANDLE_MAP_ENTRIES> = HVec::new();
        for e in self.termini[slot].handle_map.iter() {
            let _ = handles.push(e.local_handle);
        }
        for h in handles {
            let _ = self.repo.remove_record(h);
        }
        self.termini[slot].handle_map.clear();
        self.termini[slot].local_record_count = 0;
    }

    /// Insert a freshly-fetched record into the consolidated repository with a
    /// manager-chosen handle: save the repository's allocator cursor, force it
    /// to `handle`, insert, then restore the cursor so the repository's own
    /// allocator is undisturbed.
    pub(crate) fn insert_remapped(&mut self, handle: u32, pdr_type: u8, body: &[u8]) -> PdrResult<u32> {
        let saved = self.repo.set_next_handle(handle);
        let result = self.repo.add_record(pdr_type, body);
        self.repo.set_next_handle(saved);
        result
    }

    /// Full discover-and-fetch sync for one terminus. On a fast path (already
    /// synced, signature unchanged since last time), this performs no mutation.
    pub fn sync_terminus(&mut self, transport: &mut impl Transport, eid: u8) -> PdrResult<()> {
        let slot = self.slot_of(eid).ok_or(PdrError::NotFound)?;
        let old_sig = self.termini[slot].last_signature;
        let was_synced =
            matches!(self.termini[slot].state, TerminusState::Synced | TerminusState::Stale);
        self.termini[slot].state = TerminusState::Syncing;

        if let Err(e) = fetcher::fetch_repo_info(transport, &mut self.termini[slot]) {
            self.termini[slot].state = TerminusState::Error;
            return Err(e);
        }

        if was_synced && old_sig != 0 && self.termini[slot].last_signature == old_sig {
            self.termini[slot].state = TerminusState::Synced;
            return Ok(());
        }

        self.purge_slot(slot);
        self.termini[slot].local_handle_seq = 1;
        self.termini[slot].fetch_ctx.next_record_handle = 0;
        self.termini[slot].fetch_ctx.records_fetched = 0;
        self.termini[slot].fetch_ctx.retries = 0;

        let remote_count = self.termini[slot].remote_record_count;
        for _ in 0..remote_count {
            if let Err(e) = fetcher::fetch_one_pdr(transport, &mut self.termini[slot]) {
                self.termini[slot].state = TerminusState::Error;
                return Err(e);
            }
            let reassembly_len = self.termini[slot].fetch_ctx.reassembly_len;
            if reassembly_len < 10 {
                self.termini[slot].state = TerminusState::Error;
                return Err(PdrError::InvalidLength);
            }
            let header = pldm_pdr_repo::CommonHeader::parse(
                &self.termini[slot].fetch_ctx.reassembly_buf[..reassembly_len],
            )?;
            let seq = self.termini[slot].local_handle_seq;
            self.termini[slot].local_handle_seq += 1;
            let remapped = remap(slot, seq);
            let body = {
                let buf = &self.termini[slot].fetch_ctx.reassembly_buf;
                let mut tmp = [0u8; REASSEMBLY_BUF_LEN];
                tmp[..reassembly_len - 10].copy_from_slice(&buf[10..reassembly_len]);
                tmp
            };
            let body_len = reassembly_len - 10;
            match self.insert_remapped(remapped, header.pdr_type, &body[..body_len]) {
                Ok(_) => {}
                Err(e) => {
                    self.termini[slot].state = TerminusState::Error;
                    return Err(e);
                }
            }
            self.termini[slot].local_record_count += 1;
            if self.termini[slot]
                .handle_map
                .push(HandleMapEntry { remote_handle: header.record_handle, local_handle: remapped })
                .is_err()
            {
                self.termini[slot].state = TerminusState::Error;
                return Err(PdrError::Full);
            }

            if self.termini[slot].fetch_ctx.next_record_handle == 0 {
                break;
            }
        }

        self.termini[slot].state = TerminusState::Synced;
        Ok(())
    }

    /// Sync every terminus currently `Discovered` or `Stale`. Succeeds only if
    /// every sync succeeds.
    pub fn sync_all(&mut self, transport: &mut impl Transport) -> PdrResult<()> {
        let mut eids: HVec<u8, MAX_TERMINI> = HVec::new();
        for t in self.termini.iter().filter(|t| matches!(t.state, TerminusState::Discovered | TerminusState::Stale)) {
            let _ = eids.push(t.eid);
        }
        for eid in eids {
            self.sync_terminus(transport, eid)?;
        }
        Ok(())
    }

    /// Re-fetch repository info/signature only; transition `Synced` -> `Stale`
    /// if the signature moved. Returns whether a change was detected.
    pub fn check_for_changes(&mut self, transport: &mut impl Transport, eid: u8) -> PdrResult<bool> {
        let slot = self.slot_of(eid).ok_or(PdrError::NotFound)?;
        let old_sig = self.termini[slot].last_signature;
        fetcher::fetch_repo_info(transport, &mut self.termini[slot])?;
        let changed = old_sig == 0 || self.termini[slot].last_signature != old_sig;
        if changed && self.termini[slot].state == TerminusState::Synced {
            self.termini[slot].state = TerminusState::Stale;
        }
        Ok(changed)
    }

    /// Recover the owning terminus's eid for a consolidated handle.
    pub fn lookup_origin(&self, handle: u32) -> PdrResult<u8> {
        let slot = terminus_index_of(handle).ok_or(PdrError::NotFound)?;
        let terminus = self.termini.get(slot).ok_or(PdrError::NotFound)?;
        if terminus.state == TerminusState::Unused {
            return Err(PdrError::NotFound);
        }
        Ok(terminus.eid)
    }

    pub(crate) fn slot_mut(&mut self, eid: u8) -> PdrResult<usize> {
        self.slot_of(eid).ok_or(PdrError::NotFound)
    }

    pub(crate) fn terminus_at(&self, slot: usize) -> &Terminus {
        &self.termini[slot]
    }

    pub(crate) fn terminus_at_mut(&mut self, slot: usize) -> &mut Terminus {
        &mut self.termini[slot]
    }

    pub(crate) fn local_for_remote(&self, slot: usize, remote_handle: u32) -> Option<u32> {
        self.termini[slot].local_for_remote(remote_handle)
    }

    pub(crate) fn forget_remote(&mut self, slot: usize, remote_handle: u32) -> Option<u32> {
        self.termini[slot].forget_remote(remote_handle)
    }

    pub(crate) fn slot_index(&self, eid: u8) -> Option<usize> {
        self.slot_of(eid)
    }
}

/// Type-filter `FindPDR`, re-exported here purely so callers of the manager
/// crate don't also need to import `pldm-pdr-repo` directly for a simple
/// pass-through query.
pub fn find_pdr_query(pdr_type: u8, start_handle: u32) -> FindPdrQuery {
    FindPdrQuery { pdr_type, start_handle }
}

#[cfg(test)]
mod tests {
    use pldm_pdr_repo::PdrRepository;

    use super::*;
    use crate::transport::Transport;

    type Mgr = Manager<'static, 64, 8192>;

    /// A transport whose responses are scripted call-by-call; panics on an
    /// unscripted call so a test's assumed command sequence is self-checking.
    struct ScriptedTransport<'a> {
        steps: &'a [Option<&'a [u8]>],
        idx: usize,
    }

    impl<'a> Transport for ScriptedTransport<'a> {
        fn send_recv(&mut self, _eid: u8, _command: u8, _request: &[u8], response: &mut [u8]) -> PdrResult<usize> {
            let step = self.steps.get(self.idx).expect("unscripted transport call");
            self.idx += 1;
            match step {
                Some(bytes) => {
                    response[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                None => Err(PdrError::TransportError(0x01)),
            }
        }
    }

    fn header_bytes(record_handle: u32, pdr_type: u8, data_length: u16) -> [u8; 10] {
        let mut out = [0u8; 10];
        out[0..4].copy_from_slice(&record_handle.to_le_bytes());
        out[4] = 1;
        out[5] = pdr_type;
        out[6..8].copy_from_slice(&0u16.to_le_bytes());
        out[8..10].copy_from_slice(&data_length.to_le_bytes());
        out
    }

    fn get_pdr_response(header: &[u8; 10], body: &[u8], next_record_handle: u32, buf: &mut [u8]) -> usize {
        let data_len = header.len() + body.len();
        buf[0] = 0x00;
        buf[1..5].copy_from_slice(&next_record_handle.to_le_bytes());
        buf[5..9].copy_from_slice(&0u32.to_le_bytes());
        buf[9] = 0x05; // startAndEnd
        buf[10..12].copy_from_slice(&(data_len as u16).to_le_bytes());
        buf[12..12 + 10].copy_from_slice(header);
        buf[12 + 10..12 + data_len].copy_from_slice(body);
        12 + data_len
    }

    fn repository_info_response(record_count: u32, repository_size: u32, buf: &mut [u8]) {
        buf[0] = 0x00;
        buf[1] = 0;
        buf[28..32].copy_from_slice(&record_count.to_le_bytes());
        buf[32..36].copy_from_slice(&repository_size.to_le_bytes());
        buf[36..40].copy_from_slice(&0u32.to_le_bytes());
        buf[40] = 0;
    }

    #[test]
    fn remap_partitions_are_disjoint_across_termini() {
        for i in 0..MAX_TERMINI {
            for j in 0..MAX_TERMINI {
                if i == j {
                    continue;
                }
                for s in [1u32, 2, 0xFFFF] {
                    assert_ne!(remap(i, s), remap(j, s));
                    // Ranges don't overlap at all: terminus i's whole range sits
                    // below terminus j's whole range when i < j.
                    let (lo, hi) = (remap(i, 0), remap(i, 0xFFFF));
                    assert!(remap(j, s) < lo || remap(j, s) > hi || i == j);
                }
            }
        }
    }

    #[test]
    fn terminus_index_of_recovers_remap_slot() {
        for i in 0..MAX_TERMINI {
            let handle = remap(i, 42);
            assert_eq!(terminus_index_of(handle), Some(i));
        }
        assert_eq!(terminus_index_of(0), None); // handle 0 is the reserved wildcard
    }

    #[test]
    fn add_terminus_rejects_duplicate_eid() {
        let mut mgr: Mgr = Manager::new(PdrRepository::new());
        mgr.add_terminus(5, 0x10, 1).unwrap();
        assert!(mgr.add_terminus(5, 0x20, 2).is_err());
    }

    #[test]
    fn add_terminus_fails_full_once_all_slots_are_taken() {
        let mut mgr: Mgr = Manager::new(PdrRepository::new());
        for eid in 0..MAX_TERMINI as u8 {
            mgr.add_terminus(eid, 0, 0).unwrap();
        }
        assert_eq!(mgr.add_terminus(MAX_TERMINI as u8, 0, 0), Err(PdrError::Full));
    }

    #[test]
    fn remove_terminus_purges_consolidated_records_and_frees_the_slot() {
        let mut mgr: Mgr = Manager::new(PdrRepository::new());
        mgr.add_terminus(5, 0, 0).unwrap();
        let slot = mgr.slot_index(5).unwrap();
        let h = mgr.insert_remapped(remap(slot, 1), 7, &[0xAA]).unwrap();
        mgr.terminus_at_mut(slot).handle_map.push(HandleMapEntry { remote_handle: 1, local_handle: h }).unwrap();

        mgr.remove_terminus(5).unwrap();

        assert_eq!(mgr.terminus_state(5), None);
        assert_eq!(mgr.repo.get_repository_info().record_count, 0);
        // Slot is free for reuse.
        mgr.add_terminus(5, 0, 0).unwrap();
    }

    #[test]
    fn sync_terminus_full_fetch_populates_repo_and_handle_map() {
        let mut mgr: Mgr = Manager::new(PdrRepository::new());
        mgr.add_terminus(5, 0, 0).unwrap();

        let mut info_buf = [0u8; 41];
        repository_info_response(2, 22, &mut info_buf);

        let h1 = header_bytes(10, 7, 1);
        let mut r1 = [0u8; 64];
        let r1_len = get_pdr_response(&h1, &[0xAA], 20, &mut r1);

        let h2 = header_bytes(20, 7, 1);
        let mut r2 = [0u8; 64];
        let r2_len = get_pdr_response(&h2, &[0xBB], 0, &mut r2);

        // GetPDRRepositoryInfo, GetPDRRepositorySignature (fails -> pseudo-sig),
        // then two fetch_one_pdr calls.
        let steps: [Option<&[u8]>; 4] = [Some(&info_buf), None, Some(&r1[..r1_len]), Some(&r2[..r2_len])];
        let mut transport = ScriptedTransport { steps: &steps, idx: 0 };

        mgr.sync_terminus(&mut transport, 5).unwrap();

        let slot = mgr.slot_index(5).unwrap();
        assert_eq!(mgr.terminus_state(5), Some(TerminusState::Synced));
        assert_eq!(mgr.terminus_at(slot).local_record_count, 2);
        assert_eq!(mgr.local_for_remote(slot, 10), Some(remap(slot, 1)));
        assert_eq!(mgr.local_for_remote(slot, 20), Some(remap(slot, 2)));
        assert_eq!(mgr.repo.get_repository_info().record_count, 2);
    }

    #[test]
    fn sync_terminus_surfaces_a_full_handle_map_instead_of_orphaning_the_mapping() {
        // A `Manager` whose consolidated repository holds more records than
        // `MAX_HANDLE_MAP_ENTRIES` can map: a terminus that actually has that
        // many live records must fail the mapping, not silently orphan it.
        type BigMgr = Manager<'static, 128, 16384>;
        let mut mgr: BigMgr = Manager::new(PdrRepository::new());
        mgr.add_terminus(5, 0, 0).unwrap();

        let remote_count = MAX_HANDLE_MAP_ENTRIES as u32 + 1;
        let mut info_buf = [0u8; 41];
        repository_info_response(remote_count, remote_count * 11, &mut info_buf);

        let mut responses: Vec<Vec<u8>> = Vec::new();
        for i in 0..remote_count {
            let header = header_bytes(100 + i, 7, 1);
            let next = if i + 1 < remote_count { 999 } else { 0 };
            let mut buf = vec![0u8; 64];
            let len = get_pdr_response(&header, &[0xAA], next, &mut buf);
            buf.truncate(len);
            responses.push(buf);
        }

        let mut steps: Vec<Option<&[u8]>> = Vec::new();
        steps.push(Some(&info_buf[..]));
        steps.push(None); // signature command unsupported -> pseudo-signature
        for r in &responses {
            steps.push(Some(r.as_slice()));
        }
        let mut transport = ScriptedTransport { steps: &steps, idx: 0 };

        assert_eq!(mgr.sync_terminus(&mut transport, 5), Err(PdrError::Full));
        assert_eq!(mgr.terminus_state(5), Some(TerminusState::Error));
    }

    #[test]
    fn sync_terminus_fast_path_is_a_noop_when_signature_is_unchanged() {
        let mut mgr: Mgr = Manager::new(PdrRepository::new());
        mgr.add_terminus(5, 0, 0).unwrap();
        let slot = mgr.slot_index(5).unwrap();
        {
            let t = mgr.terminus_at_mut(slot);
            t.state = TerminusState::Synced;
            t.last_signature = 0xABCD;
        }

        let mut info_buf = [0u8; 41];
        repository_info_response(0, 0, &mut info_buf);
        let mut sig_buf = [0u8; 5];
        sig_buf[0] = 0x00;
        sig_buf[1..5].copy_from_slice(&0xABCDu32.to_le_bytes());
        let steps: [Option<&[u8]>; 2] = [Some(&info_buf), Some(&sig_buf)];
        let mut transport = ScriptedTransport { steps: &steps, idx: 0 };

        mgr.sync_terminus(&mut transport, 5).unwrap();

        assert_eq!(mgr.terminus_state(5), Some(TerminusState::Synced));
        assert_eq!(mgr.repo.get_repository_info().record_count, 0);
    }

    #[test]
    fn check_for_changes_transitions_synced_to_stale_on_signature_change() {
        let mut mgr: Mgr = Manager::new(PdrRepository::new());
        mgr.add_terminus(5, 0, 0).unwrap();
        let slot = mgr.slot_index(5).unwrap();
        {
            let t = mgr.terminus_at_mut(slot);
            t.state = TerminusState::Synced;
            t.last_signature = 0x1111;
        }

        let mut info_buf = [0u8; 41];
        repository_info_response(0, 0, &mut info_buf);
        let mut sig_buf = [0u8; 5];
        sig_buf[0] = 0x00;
        sig_buf[1..5].copy_from_slice(&0x2222u32.to_le_bytes());
        let steps: [Option<&[u8]>; 2] = [Some(&info_buf), Some(&sig_buf)];
        let mut transport = ScriptedTransport { steps: &steps, idx: 0 };

        let changed = mgr.check_for_changes(&mut transport, 5).unwrap();
        assert!(changed);
        assert_eq!(mgr.terminus_state(5), Some(TerminusState::Stale));
    }

    #[test]
    fn lookup_origin_resolves_eid_and_rejects_unused_slots() {
        let mut mgr: Mgr = Manager::new(PdrRepository::new());
        mgr.add_terminus(5, 0, 0).unwrap();
        let slot = mgr.slot_index(5).unwrap();
        assert_eq!(mgr.lookup_origin(remap(slot, 1)), Ok(5));
        // Slot 7 was never registered.
        assert_eq!(mgr.lookup_origin(remap(MAX_TERMINI - 1, 1)), Err(PdrError::NotFound));
    }
}
