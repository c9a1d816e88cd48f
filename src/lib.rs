//! Content-addressed media storage engine core for a CDN.
//!
//! Persists immutable binary assets on a shared POSIX filesystem and
//! exposes deposit-by-content-equality, lookup, on-demand proportional
//! scaling, and filesystem integrity checking. See [`engine::CdnData`] for
//! the entry point.

pub mod codec;
pub mod config;
pub mod content_type;
pub mod engine;
pub mod error;
pub mod fsck;
pub mod lock;
pub mod logging;
pub mod naming;
pub mod replicator;
pub mod resource;
pub mod store;
mod util;
pub mod upload;
pub mod variant;

pub use codec::{FakeCodec, HeaderProbeCodec, ImageCodec};
pub use config::{EngineConfig, LogConfig};
pub use content_type::ContentType;
pub use engine::CdnData;
pub use error::{CdnError, Result};
pub use fsck::{FsckIssue, RepairSet, Severity};
pub use lock::DirectoryLock;
pub use naming::ResourceId;
pub use replicator::{Csync2Replicator, RecordingReplicator, Replicator};
pub use resource::Resource;
pub use store::Store;
pub use upload::{UploadHandle, Uploads};
pub use variant::Variant;
