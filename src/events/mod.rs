//! Lifecycle Events Module
//!
//! - [`event`]: Event types and the two concrete event shapes
//! - [`dispatcher`]: Synchronous publish/subscribe bus

pub mod dispatcher;
pub mod event;

pub use dispatcher::{EventCallback, EventDispatcher};
pub use event::{ActionEvent, Event, EventType, WorkflowEvent};
