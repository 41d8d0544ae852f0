//! Conference-room booking core: rooms, reservations with overlap-free
//! commits, a write-ahead log for durability, and best-effort
//! notifications after each booking.

pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod runtime;
pub mod validation;
pub mod wal;

pub use config::Config;
pub use engine::{ConflictKind, Engine, EngineError};
pub use runtime::Runtime;
