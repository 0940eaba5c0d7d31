//! Per-connection event dispatch.

pub mod dispatcher;
pub mod handler;

pub use dispatcher::EventDispatcher;
pub use handler::{CallFn, EventFn, Handler};
