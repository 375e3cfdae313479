//! Server-authoritative state replication over unreliable datagrams.
//!
//! The server partitions moving objects into a zone grid, retains a short
//! per-zone history, and fans bounded frame batches out to per-client
//! listeners. Each listener filters by its client's zone window, computes
//! bit-packed deltas against per-object baselines, splits them into
//! MTU-sized datagrams, and advances the baselines through a
//! double-acknowledgement protocol. The client side mirrors the table and
//! converges on the authoritative object set under loss.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod bits;
pub mod clock;
pub mod collector;
pub mod error;
pub mod idindex;
pub mod listener;
pub mod math;
pub mod object;
pub mod protocol;
pub mod receiver;
pub mod settings;
pub mod stats;
pub mod wire;
pub mod writer;
pub mod zone;

pub mod prelude {
    pub use crate::collector::StateCollector;
    pub use crate::error::{ProtocolError, ProtocolResult};
    pub use crate::listener::{NetworkStateListener, StateListener};
    pub use crate::math::{Aabb, Quat, Vec3};
    pub use crate::protocol::ObjectProtocol;
    pub use crate::receiver::StateReceiver;
    pub use crate::settings::ReplicationSettings;
    pub use crate::stats::ReplicationStats;
    pub use crate::wire::message::{Message, MessageSink};
    pub use crate::zone::{ZoneGrid, ZoneKey, ZoneManager};
}
