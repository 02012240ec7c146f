//! Durable, time-indexed JSON log shipping.
//!
//! A [`Storer`] appends JSON entries to an intermediate file and atomically
//! renames it into an immutable destination file whose name encodes the
//! time range it covers. A [`Fetcher`] answers `[begin, end)` queries by
//! reading only the files whose range overlaps. [`follow`] delivers the
//! writer's pending entries and then every newly accepted one.

mod clock;
pub mod config;
mod entry;
mod error;
mod fetcher;
pub mod follow;
mod index;
mod lock;
pub mod naming;
mod ring;
mod rotation;
pub mod server;
mod service;
mod stats;
mod storer;

pub use clock::{Clock, ManualClock, ReplayClock, SharedClock, SystemClock};
pub use config::{Discovery, FetcherConfig, PubSubConfig, StorerConfig};
pub use entry::Entry;
pub use error::{
    EmptyBuffer, FetchError, FetchResult, FollowError, FollowResult, StorerError, StorerResult,
};
pub use fetcher::Fetcher;
pub use follow::{Broadcaster, FollowRequest, FollowSource, Snapshot, follow, follow_stream};
pub use index::{IndexedFile, Query, TimeIndex};
pub use lock::WriterLock;
pub use naming::{DateFormat, Span};
pub use ring::RingBuffer;
pub use rotation::{
    FileStatus, ReplaySummary, RotateReason, Rotated, RotationSettings, WriteRotation, Written,
};
pub use service::StorerService;
pub use stats::{CurrentFileStats, Rejections, Stats};
pub use storer::{
    AdminCommand, AdminReply, AgeTimer, Input, Publish, PushOutcome, Rejection, Storer,
};
