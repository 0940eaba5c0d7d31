//! Call/acknowledge engine.
//!
//! A call is an event emitted with a single-shot acknowledgement channel.
//! Every call ends in exactly one outcome: the acknowledged value, a
//! timeout, a transport failure, or the remote handler's error marker.

pub mod call_table;
pub mod engine;
pub mod pending_call;

pub use call_table::CallTable;
pub use engine::{acknowledge, call, register_call_handler};
pub use pending_call::{CallId, CallOutcome, CallState, PendingCall};
