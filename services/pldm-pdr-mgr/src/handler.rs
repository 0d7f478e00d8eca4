//! `pldmPDRRepositoryChgEvent` application: decode+validate, delegate
//! whole-repository formats to a full resync, and apply `formatIsPDRHandles`
//! events one change record at a time — falling back to a full resync the
//! moment any sub-operation fails, so a partial delta never leaves the
//! consolidated repository inconsistent with the remote.

use pldm_pdr_repo::event::{Event, Format, Operation};
use pldm_pdr_repo::{CommonHeader, PdrError, PdrResult};

use crate::config::REASSEMBLY_BUF_LEN;
use crate::fetcher;
use crate::manager::{remap, HandleMapEntry, Manager, Terminus};
use crate::transport::Transport;

/// Entry point: decode `wire_bytes` as a change event from `eid` and apply it
/// against `mgr`.
pub fn handle_event<const MAXREC: usize, const CAP: usize>(
    mgr: &mut Manager<'_, MAXREC, CAP>,
    transport: &mut impl Transport,
    eid: u8,
    wire_bytes: &[u8],
) -> PdrResult<()> {
    let event = Event::decode(wire_bytes)?;

    match event.format().ok_or(PdrError::Malformed)? {
        Format::RefreshEntireRepository | Format::FormatIsPdrTypes => {
            return mgr.sync_terminus(transport, eid);
        }
        Format::FormatIsPdrHandles => {}
    }

    let slot = mgr.slot_mut(eid)?;
    if apply_incremental(mgr, transport, slot, &event).is_err() {
        log::debug!("eid {}: incremental apply failed, falling back to full resync", eid);
        return mgr.sync_terminus(transport, eid);
    }
    Ok(())
}

fn apply_incremental<const MAXREC: usize, const CAP: usize>(
    mgr: &mut Manager<'_, MAXREC, CAP>,
    transport: &mut impl Transport,
    slot: usize,
    event: &Event,
) -> PdrResult<()> {
    for record in event.records.iter() {
        let op = record.operation().ok_or(PdrError::Malformed)?;
        match op {
            Operation::RecordsDeleted => apply_delete(mgr, slot, &record.entries)?,
            Operation::RecordsAdded => apply_add(mgr, transport, slot, &record.entries)?,
            Operation::RecordsModified => apply_modify(mgr, transport, slot, &record.entries)?,
            // Caught by Event::validate's formatIsPDRHandles/refreshAllRecords
            // check, but the handler doesn't trust that every caller ran
            // validation first.
            Operation::RefreshAllRecords => return Err(PdrError::Malformed),
        }
    }
    Ok(())
}

fn apply_delete<const MAXREC: usize, const CAP: usize>(
    mgr: &mut Manager<'_, MAXREC, CAP>,
    slot: usize,
    remote_handles: &[u32],
) -> PdrResult<()> {
    for &remote in remote_handles {
        let Some(local) = mgr.forget_remote(slot, remote) else {
            continue; // unknown remote handle: already applied, idempotent
        };
        mgr.repo.remove_record(local)?;
        let t = mgr.terminus_at_mut(slot);
        t.local_record_count = t.local_record_count.saturating_sub(1);
    }
    Ok(())
}

fn apply_add<const MAXREC: usize, const CAP: usize>(
    mgr: &mut Manager<'_, MAXREC, CAP>,
    transport: &mut impl Transport,
    slot: usize,
    remote_handles: &[u32],
) -> PdrResult<()> {
    for &remote in remote_handles {
        fetcher::fetch_by_handle(transport, mgr.terminus_at_mut(slot), remote)?;
        let (pdr_type, record_handle, body, body_len) = extract_record(mgr.terminus_at(slot))?;

        let seq = mgr.terminus_at(slot).local_handle_seq;
        mgr.terminus_at_mut(slot).local_handle_seq += 1;
        let remapped = remap(slot, seq);

        let local = mgr.insert_remapped(remapped, pdr_type, &body[..body_len])?;
        let t = mgr.terminus_at_mut(slot);
        t.local_record_count += 1;
        t.handle_map
            .push(HandleMapEntry { remote_handle: record_handle, local_handle: local })
            .map_err(|_| PdrError::Full)?;
    }
    Ok(())
}

fn apply_modify<const MAXREC: usize, const CAP: usize>(
    mgr: &mut Manager<'_, MAXREC, CAP>,
    transport: &mut impl Transport,
    slot: usize,
    remote_handles: &[u32],
) -> PdrResult<()> {
    for &remote in remote_handles {
        let Some(local) = mgr.local_for_remote(slot, remote) else {
            continue; // unknown remote handle: nothing local to modify
        };
        if let Err(e) = modify_one(mgr, transport, slot, remote, local) {
            mgr.forget_remote(slot, remote);
            let t = mgr.terminus_at_mut(slot);
            t.local_record_count = t.local_record_count.saturating_sub(1);
            return Err(e);
        }
    }
    Ok(())
}

/// Remove the old body, refetch it, and re-insert under the *same* local
/// handle so the existing mapping (and anything the host cached by handle)
/// stays valid.
fn modify_one<const MAXREC: usize, const CAP: usize>(
    mgr: &mut Manager<'_, MAXREC, CAP>,
    transport: &mut impl Transport,
    slot: usize,
    remote: u32,
    local: u32,
) -> PdrResult<()> {
    mgr.repo.remove_record(local)?;
    fetcher::fetch_by_handle(transport, mgr.terminus_at_mut(slot), remote)?;
    let (pdr_type, _record_handle, body, body_len) = extract_record(mgr.terminus_at(slot))?;
    mgr.insert_remapped(local, pdr_type, &body[..body_len])?;
    Ok(())
}

/// Pull `(pdrType, recordHandle, body, bodyLen)` out of a terminus's
/// reassembled `fetch_ctx` buffer. The body is copied into a stack scratch
/// buffer so callers can drop their borrow of `terminus` before touching
/// `mgr.repo`.
fn extract_record(terminus: &Terminus) -> PdrResult<(u8, u32, [u8; REASSEMBLY_BUF_LEN], usize)> {
    let len = terminus.fetch_ctx.reassembly_len;
    if len < 10 {
        return Err(PdrError::InvalidLength);
    }
    let header = CommonHeader::parse(&terminus.fetch_ctx.reassembly_buf[..len])?;
    let mut body = [0u8; REASSEMBLY_BUF_LEN];
    body[..len - 10].copy_from_slice(&terminus.fetch_ctx.reassembly_buf[10..len]);
    Ok((header.pdr_type, header.record_handle, body, len - 10))
}
