//! Disk-backed fetch cache.
//!
//! Entries are content-addressed by the SHA-256 of the request URL and stored
//! as a `<key>.bin` body plus a `<key>.mime` content-type record. Entries never
//! expire; only an explicit purge removes them.

pub mod hash;
pub mod store;

pub use crate::Error;

pub use hash::{compute_cache_key, compute_host_key};
pub use store::{DiskCache, write_atomic};
