//! The transport capability the manager and fetcher are built against. Modeled
//! as an abstract blocking send-recv — the MCTP/PLDM framing below this trait,
//! and any host threading/queueing glue above it, are the integrator's
//! concern.

use pldm_pdr_repo::PdrError;

/// A blocking request/response transaction to one PLDM endpoint.
///
/// Implementations perform exactly one `pldmType = 0x02` (Platform Monitoring &
/// Control) request and fill `response` with the reply. They return the number
/// of bytes written into `response`, or a `PdrError::TransportError` carrying
/// whatever completion code (if any) the peer actually returned.
pub trait Transport {
    fn send_recv(&mut self, eid: u8, command: u8, request: &[u8], response: &mut [u8]) -> Result<usize, PdrError>;
}
