//! Filesystem and network I/O: the storage seam and the archive fetcher.

mod fetch;
mod storage;

pub use fetch::{extract_archive, fetch_archive, split_archive_url};
pub use storage::{LocalStorage, Storage};
