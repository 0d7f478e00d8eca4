//! Compile-time capacities. Kept as plain consts next to the structures that use
//! them, the way `services/pddb` keeps `PAGE_SIZE` / `FASTSPACE_PAGES` etc.

/// Size of the fixed blob buffer when the repository owns its own storage.
#[cfg(not(feature = "small-repo"))]
pub const DEFAULT_BLOB_CAPACITY: usize = 8192;
#[cfg(feature = "small-repo")]
pub const DEFAULT_BLOB_CAPACITY: usize = 1024;

/// Maximum number of index entries (live + tombstoned) a repository can hold.
#[cfg(not(feature = "small-repo"))]
pub const DEFAULT_MAX_RECORDS: usize = 64;
#[cfg(feature = "small-repo")]
pub const DEFAULT_MAX_RECORDS: usize = 16;

/// Maximum payload bytes returned by a single `GetPDR` chunk.
pub const CHUNK_SIZE: usize = 128;

/// Size in bytes of the PDR common header shared by every record.
pub const COMMON_HEADER_LEN: usize = 10;

/// Maximum entries packed into a single change record.
pub const MAX_ENTRIES_PER_RECORD: usize = 16;

/// Maximum records packed into a single change event.
pub const MAX_RECORDS_PER_EVENT: usize = 4;

/// Default transport MTU used when a caller doesn't specify one for `buildEvent`.
pub const DEFAULT_MTU: usize = 64;
