//! Orchestration: the session, the driver abstraction, and driver events.

pub mod config;
pub mod driver;
pub mod events;
pub mod session;

pub use config::{DriverConfig, ModelPair};
pub use driver::{
    ChatBackend, Driver, DriverFactory, DriverOutput, HistoryReset, ToolCallRecord,
    ToolLoopDriver, ToolLoopDriverFactory,
};
pub use events::{
    CompositeEventHandler, DriverEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
};
pub use session::{Session, SystemPromptSource};
