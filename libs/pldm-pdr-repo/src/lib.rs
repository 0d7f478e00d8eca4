//! Firmware-side PLDM (DSP0248) Platform Descriptor Record repository.
//!
//! This crate implements the parts of the PDR repository subsystem that
//! never need a transport: the local blob-backed record store, the
//! `pldmPDRRepositoryChgEvent` wire codec, the terminus-side change
//! tracker, and the wire layouts for the five PLDM Platform M&C
//! commands this subsystem speaks. The multi-terminus manager and the
//! terminus fetcher (both of which need a transport capability) live in
//! the `pldm-pdr-mgr` service crate.
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod crc32;
pub mod error;
pub mod event;
pub mod header;
pub mod repo;
pub mod tracker;
pub mod wire;

pub use config::*;
pub use error::{PdrError, PdrResult};
pub use header::CommonHeader;
pub use repo::{FindPdrQuery, FindResult, GetPdrResult, PdrRepository, RepoInfo, RepoState};
