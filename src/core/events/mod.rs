//! Data-channel event protocol and the inbound stream processor.

pub mod messages;
mod processor;

pub use messages::{ClientEvent, ServerEvent, SessionConfig, ToolDef};
pub use processor::{EventStreamProcessor, ProcessedEvent, SpeechActivity};
