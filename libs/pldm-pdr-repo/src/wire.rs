//! Wire layouts for the five PLDM Platform Monitoring & Control commands this
//! subsystem serves (as a responder) and issues (as a fetcher). Every decode
//! function checks its input length before indexing; none of them panic on
//! truncated or malformed bytes.

use num_derive::{FromPrimitive, ToPrimitive};

use crate::error::{PdrError, PdrResult};
use crate::repo::{GetPdrResult, RepoInfo};

/// PLDM type byte carried by the transport envelope for every command below.
pub const PLDM_TYPE_PLATFORM: u8 = 0x02;

/// Command codes for the five PLDM Platform M&C commands this subsystem speaks.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    GetPdrRepositoryInfo = 0x50,
    GetPdr = 0x51,
    FindPdr = 0x52,
    GetPdrRepositorySignature = 0x53,
    RunInitAgent = 0x58,
}

/// Completion codes surfaced by the core.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CompletionCode {
    Success = 0x00,
    Error = 0x01,
    InvalidData = 0x02,
    InvalidLength = 0x03,
    Unsupported = 0x04,
    InvalidRecordHandle = 0x05,
}

impl From<PdrError> for CompletionCode {
    fn from(e: PdrError) -> Self {
        match e {
            PdrError::NotFound => CompletionCode::InvalidRecordHandle,
            PdrError::Full | PdrError::NoSpace => CompletionCode::Error,
            PdrError::InvalidOffset => CompletionCode::InvalidData,
            PdrError::InvalidLength => CompletionCode::InvalidLength,
            PdrError::Malformed => CompletionCode::InvalidData,
            PdrError::TransportError(_) => CompletionCode::Error,
            PdrError::Unsupported => CompletionCode::Unsupported,
        }
    }
}

/// `transferFlag` values for multi-part `GetPDR` reads.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum TransferFlag {
    Start = 0x00,
    Middle = 0x01,
    End = 0x04,
    StartAndEnd = 0x05,
}

/// `transferOpFlag` values a requester sends to drive a multi-part read.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum TransferOpFlag {
    GetNextPart = 0x00,
    GetFirstPart = 0x01,
}

fn u32_at(bytes: &[u8], off: usize) -> PdrResult<u32> {
    bytes.get(off..off + 4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]])).ok_or(PdrError::InvalidLength)
}

fn u16_at(bytes: &[u8], off: usize) -> PdrResult<u16> {
    bytes.get(off..off + 2).map(|s| u16::from_le_bytes([s[0], s[1]])).ok_or(PdrError::InvalidLength)
}

fn u8_at(bytes: &[u8], off: usize) -> PdrResult<u8> {
    bytes.get(off).copied().ok_or(PdrError::InvalidLength)
}

// ---- GetPDRRepositoryInfo (0x50) ----------------------------------------

/// Length of a `GetPDRRepositoryInfo` response: cc+state+updTs+oemTs+recCount+repoSize+largest+timeout.
pub const REPOSITORY_INFO_RESPONSE_LEN: usize = 1 + 1 + 13 + 13 + 4 + 4 + 4 + 1;

pub fn encode_repository_info_response(info: &RepoInfo, out: &mut [u8]) -> PdrResult<usize> {
    if out.len() < REPOSITORY_INFO_RESPONSE_LEN {
        return Err(PdrError::InvalidLength);
    }
    out[0] = CompletionCode::Success as u8;
    out[1] = info.state as u8;
    out[2..15].copy_from_slice(&info.update_timestamp);
    out[15..28].copy_from_slice(&info.oem_update_timestamp);
    out[28..32].copy_from_slice(&info.record_count.to_le_bytes());
    out[32..36].copy_from_slice(&info.repository_size.to_le_bytes());
    out[36..40].copy_from_slice(&info.largest_record_size.to_le_bytes());
    out[40] = info.data_transfer_handle_timeout;
    Ok(REPOSITORY_INFO_RESPONSE_LEN)
}

/// Parsed `GetPDRRepositoryInfo` response, as consumed by the fetcher.
#[derive(Debug, Copy, Clone)]
pub struct RepositoryInfoResponse {
    pub completion_code: u8,
    pub record_count: u32,
    pub repository_size: u32,
    pub largest_record_size: u32,
}

pub fn decode_repository_info_response(bytes: &[u8]) -> PdrResult<RepositoryInfoResponse> {
    if bytes.len() < REPOSITORY_INFO_RESPONSE_LEN {
        return Err(PdrError::InvalidLength);
    }
    Ok(RepositoryInfoResponse {
        completion_code: bytes[0],
        record_count: u32_at(bytes, 28)?,
        repository_size: u32_at(bytes, 32)?,
        largest_record_size: u32_at(bytes, 36)?,
    })
}

// ---- GetPDR (0x51) -------------------------------------------------------

/// A `GetPDR` request as sent by a requester.
#[derive(Debug, Copy, Clone)]
pub struct GetPdrRequest {
    pub record_handle: u32,
    pub data_transfer_handle: u32,
    pub transfer_op_flag: TransferOpFlag,
    pub request_count: u16,
    pub record_change_number: u16,
}

pub const GET_PDR_REQUEST_LEN: usize = 4 + 4 + 1 + 2 + 2;

pub fn encode_get_pdr_request(req: &GetPdrRequest, out: &mut [u8]) -> PdrResult<usize> {
    if out.len() < GET_PDR_REQUEST_LEN {
        return Err(PdrError::InvalidLength);
    }
    out[0..4].copy_from_slice(&req.record_handle.to_le_bytes());
    out[4..8].copy_from_slice(&req.data_transfer_handle.to_le_bytes());
    out[8] = req.transfer_op_flag as u8;
    out[9..11].copy_from_slice(&req.request_count.to_le_bytes());
    out[11..13].copy_from_slice(&req.record_change_number.to_le_bytes());
    Ok(GET_PDR_REQUEST_LEN)
}

pub fn decode_get_pdr_request(bytes: &[u8]) -> PdrResult<GetPdrRequest> {
    if bytes.len() < GET_PDR_REQUEST_LEN {
        return Err(PdrError::InvalidLength);
    }
    let op_byte = u8_at(bytes, 8)?;
    let transfer_op_flag = match op_byte {
        0x00 => TransferOpFlag::GetNextPart,
        0x01 => TransferOpFlag::GetFirstPart,
        _ => return Err(PdrError::Malformed),
    };
    Ok(GetPdrRequest {
        record_handle: u32_at(bytes, 0)?,
        data_transfer_handle: u32_at(bytes, 4)?,
        transfer_op_flag,
        request_count: u16_at(bytes, 9)?,
        record_change_number: u16_at(bytes, 11)?,
    })
}

/// Minimum length of a `GetPDR` response header, before the variable-length data.
pub const GET_PDR_RESPONSE_HEADER_LEN: usize = 1 + 4 + 4 + 1 + 2;

pub fn encode_get_pdr_response(result: &GetPdrResult, out: &mut [u8]) -> PdrResult<usize> {
    let total = GET_PDR_RESPONSE_HEADER_LEN + result.payload.len();
    if out.len() < total {
        return Err(PdrError::InvalidLength);
    }
    out[0] = CompletionCode::Success as u8;
    out[1..5].copy_from_slice(&result.next_record_handle.to_le_bytes());
    out[5..9].copy_from_slice(&result.next_data_transfer_handle.to_le_bytes());
    out[9] = result.transfer_flag as u8;
    out[10..12].copy_from_slice(&(result.payload.len() as u16).to_le_bytes());
    out[12..total].copy_from_slice(result.payload);
    Ok(total)
}

/// Parsed `GetPDR` response, borrowing its `data` straight out of the transport
/// buffer the fetcher handed in.
#[derive(Debug)]
pub struct GetPdrResponse<'a> {
    pub completion_code: u8,
    pub next_record_handle: u32,
    pub next_data_transfer_handle: u32,
    pub transfer_flag: TransferFlag,
    pub response_count: u16,
    pub data: &'a [u8],
}

pub fn decode_get_pdr_response(bytes: &[u8]) -> PdrResult<GetPdrResponse<'_>> {
    if bytes.len() < GET_PDR_RESPONSE_HEADER_LEN {
        return Err(PdrError::InvalidLength);
    }
    let completion_code = bytes[0];
    let response_count = u16_at(bytes, 10)?;
    let data = bytes
        .get(GET_PDR_RESPONSE_HEADER_LEN..GET_PDR_RESPONSE_HEADER_LEN + response_count as usize)
        .ok_or(PdrError::InvalidLength)?;
    let flag_byte = u8_at(bytes, 9)?;
    let transfer_flag = match flag_byte {
        0x00 => TransferFlag::Start,
        0x01 => TransferFlag::Middle,
        0x04 => TransferFlag::End,
        0x05 => TransferFlag::StartAndEnd,
        _ => return Err(PdrError::Malformed),
    };
    Ok(GetPdrResponse {
        completion_code,
        next_record_handle: u32_at(bytes, 1)?,
        next_data_transfer_handle: u32_at(bytes, 5)?,
        transfer_flag,
        response_count,
        data,
    })
}

// ---- FindPDR (0x52) -------------------------------------------------------

/// Locally-defined `FindPDR` request: a type code and a continuation handle.
/// Richer filters (entity type, container ID, state sets) would need a PDR
/// schema interpreter and aren't implemented here.
#[derive(Debug, Copy, Clone)]
pub struct FindPdrRequest {
    pub pdr_type: u8,
    pub start_handle: u32,
}

pub const FIND_PDR_REQUEST_LEN: usize = 1 + 4;

pub fn encode_find_pdr_request(req: &FindPdrRequest, out: &mut [u8]) -> PdrResult<usize> {
    if out.len() < FIND_PDR_REQUEST_LEN {
        return Err(PdrError::InvalidLength);
    }
    out[0] = req.pdr_type;
    out[1..5].copy_from_slice(&req.start_handle.to_le_bytes());
    Ok(FIND_PDR_REQUEST_LEN)
}

pub fn decode_find_pdr_request(bytes: &[u8]) -> PdrResult<FindPdrRequest> {
    if bytes.len() < FIND_PDR_REQUEST_LEN {
        return Err(PdrError::InvalidLength);
    }
    Ok(FindPdrRequest { pdr_type: bytes[0], start_handle: u32_at(bytes, 1)? })
}

pub const FIND_PDR_RESPONSE_HEADER_LEN: usize = 1 + 4 + 4 + 2;

pub fn encode_find_pdr_response(handle: u32, next_handle: u32, record: &[u8], out: &mut [u8]) -> PdrResult<usize> {
    let total = FIND_PDR_RESPONSE_HEADER_LEN + record.len();
    if out.len() < total {
        return Err(PdrError::InvalidLength);
    }
    out[0] = CompletionCode::Success as u8;
    out[1..5].copy_from_slice(&handle.to_le_bytes());
    out[5..9].copy_from_slice(&next_handle.to_le_bytes());
    out[9..11].copy_from_slice(&(record.len() as u16).to_le_bytes());
    out[11..total].copy_from_slice(record);
    Ok(total)
}

// ---- GetPDRRepositorySignature (0x53) ------------------------------------

pub const SIGNATURE_RESPONSE_LEN: usize = 1 + 4;

pub fn encode_signature_response(signature: u32, out: &mut [u8]) -> PdrResult<usize> {
    if out.len() < SIGNATURE_RESPONSE_LEN {
        return Err(PdrError::InvalidLength);
    }
    out[0] = CompletionCode::Success as u8;
    out[1..5].copy_from_slice(&signature.to_le_bytes());
    Ok(SIGNATURE_RESPONSE_LEN)
}

pub fn decode_signature_response(bytes: &[u8]) -> PdrResult<(u8, u32)> {
    if bytes.len() < SIGNATURE_RESPONSE_LEN {
        return Err(PdrError::InvalidLength);
    }
    Ok((bytes[0], u32_at(bytes, 1)?))
}

// ---- RunInitAgent (0x58) --------------------------------------------------

pub fn encode_run_init_agent_response(cc: CompletionCode, out: &mut [u8]) -> PdrResult<usize> {
    if out.is_empty() {
        return Err(PdrError::InvalidLength);
    }
    out[0] = cc as u8;
    Ok(1)
}
