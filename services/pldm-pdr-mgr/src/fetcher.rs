//! Issues `GetPDRRepositoryInfo`, `GetPDRRepositorySignature`, and `GetPDR`
//! (with multi-part reassembly) against one terminus's `FetchContext` over a
//! `Transport`.

use pldm_pdr_repo::wire::{
    self, Command, CompletionCode, GetPdrRequest, TransferFlag, TransferOpFlag,
};
use pldm_pdr_repo::{CommonHeader, PdrError, PdrResult};

use crate::config::REASSEMBLY_BUF_LEN;
use crate::manager::Terminus;
use crate::transport::Transport;

/// `GetPDRRepositoryInfo` + `GetPDRRepositorySignature`. Populates
/// `remote_record_count`, `remote_repo_size`, and `last_signature`. If the
/// terminus doesn't implement the signature command, synthesizes a pseudo-
/// signature so change-detection still degrades gracefully (this is a
/// heuristic, not a real collision-resistant signature).
pub fn fetch_repo_info(transport: &mut impl Transport, terminus: &mut Terminus) -> PdrResult<()> {
    let mut resp = [0u8; wire::REPOSITORY_INFO_RESPONSE_LEN];
    let n = transport.send_recv(terminus.eid, Command::GetPdrRepositoryInfo as u8, &[], &mut resp)?;
    if n < wire::REPOSITORY_INFO_RESPONSE_LEN {
        return Err(PdrError::InvalidLength);
    }
    let info = wire::decode_repository_info_response(&resp[..n])?;
    if info.completion_code != CompletionCode::Success as u8 {
        log::warn!("fetch_repo_info: eid {} returned cc {:#04x}", terminus.eid, info.completion_code);
        return Err(PdrError::TransportError(info.completion_code));
    }
    terminus.remote_record_count = info.record_count;
    terminus.remote_repo_size = info.repository_size;

    let mut sig_resp = [0u8; wire::SIGNATURE_RESPONSE_LEN];
    let got_signature = match transport.send_recv(terminus.eid, Command::GetPdrRepositorySignature as u8, &[], &mut sig_resp)
    {
        Ok(n2) if n2 >= wire::SIGNATURE_RESPONSE_LEN => match wire::decode_signature_response(&sig_resp[..n2]) {
            Ok((cc, sig)) if cc == CompletionCode::Success as u8 => Some(sig),
            _ => None,
        },
        _ => None,
    };
    terminus.last_signature = got_signature.unwrap_or_else(|| pseudo_signature(terminus));
    Ok(())
}

fn pseudo_signature(terminus: &Terminus) -> u32 {
    terminus.remote_record_count ^ (terminus.remote_repo_size << 16)
}

/// Fetch one complete record (header + body) into `terminus.fetch_ctx`'s
/// reassembly buffer, following `ctx.next_record_handle`.
pub fn fetch_one_pdr(transport: &mut impl Transport, terminus: &mut Terminus) -> PdrResult<()> {
    terminus.fetch_ctx.reassembly_len = 0;
    let mut request = GetPdrRequest {
        record_handle: terminus.fetch_ctx.next_record_handle,
        data_transfer_handle: 0,
        transfer_op_flag: TransferOpFlag::GetFirstPart,
        request_count: pldm_pdr_repo::CHUNK_SIZE as u16,
        record_change_number: 0,
    };

    loop {
        let mut req_buf = [0u8; wire::GET_PDR_REQUEST_LEN];
        wire::encode_get_pdr_request(&request, &mut req_buf)?;

        let mut resp_buf = [0u8; wire::GET_PDR_RESPONSE_HEADER_LEN + pldm_pdr_repo::CHUNK_SIZE];
        let n = transport.send_recv(terminus.eid, Command::GetPdr as u8, &req_buf, &mut resp_buf)?;
        let resp = wire::decode_get_pdr_response(&resp_buf[..n])?;
        if resp.completion_code != CompletionCode::Success as u8 {
            log::warn!("fetch_one_pdr: eid {} returned cc {:#04x}", terminus.eid, resp.completion_code);
            return Err(PdrError::TransportError(resp.completion_code));
        }

        let new_len = terminus.fetch_ctx.reassembly_len + resp.data.len();
        if new_len > REASSEMBLY_BUF_LEN {
            return Err(PdrError::Full);
        }
        terminus.fetch_ctx.reassembly_buf[terminus.fetch_ctx.reassembly_len..new_len].copy_from_slice(resp.data);
        terminus.fetch_ctx.reassembly_len = new_len;

        match resp.transfer_flag {
            TransferFlag::End | TransferFlag::StartAndEnd => {
                terminus.fetch_ctx.next_record_handle = resp.next_record_handle;
                terminus.fetch_ctx.records_fetched += 1;
                return Ok(());
            }
            TransferFlag::Start | TransferFlag::Middle => {
                request.data_transfer_handle = resp.next_data_transfer_handle;
                request.transfer_op_flag = TransferOpFlag::GetNextPart;
            }
        }
    }
}

/// Fetch a specific remote record by handle, leaving header+body in
/// `terminus.fetch_ctx.reassembly_buf[..reassembly_len]`.
pub fn fetch_by_handle(transport: &mut impl Transport, terminus: &mut Terminus, remote_handle: u32) -> PdrResult<()> {
    terminus.fetch_ctx.next_record_handle = remote_handle;
    fetch_one_pdr(transport, terminus)
}

/// Parse the common header out of a terminus's reassembled record. Callers must
/// check `reassembly_len >= 10` first (the header's own size) before calling
/// this, since it's used both mid-sync and by the change-event handler's
/// `recordsAdded`/`recordsModified` handling.
pub fn reassembled_header(terminus: &Terminus) -> PdrResult<CommonHeader> {
    CommonHeader::parse(&terminus.fetch_ctx.reassembly_buf[..terminus.fetch_ctx.reassembly_len])
}
