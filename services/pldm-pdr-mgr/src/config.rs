//! Compile-time capacities for the manager side, alongside the repository's own
//! `config.rs` in `pldm-pdr-repo`.

/// Maximum number of simultaneously-registered termini.
pub const MAX_TERMINI: usize = 8;

/// Per-terminus scratch area for reassembling a multi-part `GetPDR` response.
pub const REASSEMBLY_BUF_LEN: usize = 256;

/// Upper bound on local records tracked per terminus (mirrors the repository's
/// own `DEFAULT_MAX_RECORDS`, since every consolidated record from a terminus
/// needs exactly one handle-map entry).
pub const MAX_HANDLE_MAP_ENTRIES: usize = pldm_pdr_repo::DEFAULT_MAX_RECORDS;
