//! Process-side collaborators: oracle feed ingestion, local HTTP driver, snapshots.

pub mod feed;
pub mod http;
pub mod storage;
