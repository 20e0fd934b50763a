//! spillbuf: a two-tier spillable key/value buffer.
//!
//! A bounded in-memory staging area backed by a bounded on-disk spill
//! area, coordinated by a single background worker that migrates entries
//! from memory to disk. Intended as a local cache/buffer fronting larger
//! storage or network transport.
//!
//! # Architecture
//!
//! ```text
//!  callers ---- put / get / remove / resize ----+
//!                                               v
//!                  +---------------------------------+
//!                  |          SpillBuffer            |
//!                  |                                 |
//!                  |  +---------------------------+  |
//!                  |  | memory tier               |  |
//!                  |  | mutex + condvar, budgeted |  |
//!                  |  +-------------+-------------+  |
//!                  |                | spill worker   |
//!                  |                v                |
//!                  |  +---------------------------+  |
//!                  |  | disk tier                 |  |
//!                  |  | mutex + condvar, budgeted |  |
//!                  |  +-------------+-------------+  |
//!                  +----------------|----------------+
//!                                   v
//!                        spill directory (one file
//!                        per completed entry)
//! ```
//!
//! Both tiers keep insertion order. A full memory tier admits new entries
//! by evicting the oldest entry whose spill has completed; a full disk
//! tier either pops its oldest completed entries through a caller-supplied
//! [`EvictionHook`] or blocks until an external [`SpillBuffer::remove`]
//! makes room. Spill files are scratch: nothing survives the buffer.
//!
//! Lock order is memory first, then disk, everywhere.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use spillbuf::SpillBuffer;
//!
//! let buffer: SpillBuffer<Vec<u8>> = SpillBuffer::new(1024, 4096, None)?;
//! buffer.put(b"chunk".to_vec(), Bytes::from_static(b"payload"))?;
//! assert_eq!(buffer.get(&b"chunk".to_vec())?.as_ref(), b"payload");
//! buffer.remove(&b"chunk".to_vec())?;
//! # Ok::<(), spillbuf::BufferError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod buffer;
mod capacity;
mod disk;
mod error;
mod key;
mod memory;
mod memory_store;
mod metrics;
mod spill;
mod worker;

pub use buffer::{EvictionHook, SpillBuffer};
pub use error::{BufferError, BufferResult};
pub use key::{BufferKey, TaggedKey};
pub use memory_store::MemoryStore;
pub use metrics::MetricsSnapshot;
