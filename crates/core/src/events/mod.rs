//! Structured engine events.
//!
//! The engine does not render anything itself; it emits typed events that
//! an observer (server, TUI, tests) consumes. Events flow through a
//! cheaply-cloneable `EventHandle` into a writer task that persists them.

mod handle;
mod sqlite;
mod store;
mod types;
mod writer;

pub use handle::{EventEnvelope, EventHandle};
pub use sqlite::SqliteEventLog;
pub use store::{DownloadEntry, DownloadHistory, EventError, EventFilter, EventStore};
pub use types::{EngineEvent, EventRecord};
pub use writer::{create_event_system, EventWriter};
