//! Module build scheduling.
//!
//! Handlers react to one event each and return the events they cause. The
//! [`Dispatcher`] drains those, serializing work per module, and the
//! [`Poller`] reconciles whatever the message bus missed.

mod batches;
mod components;
mod context;
mod dispatch;
mod events;
mod gating;
mod modules;
mod poller;
mod repos;
mod tags;

pub use context::{Context, HandlerError};
pub use dispatch::Dispatcher;
pub use events::{BuildChange, Event, RawMessage};
pub use modules::{UNSATISFIABLE_REASON, cancel_module, retire_module};
pub use poller::{PollReport, Poller};
