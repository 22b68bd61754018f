pub mod config;
pub mod error;
pub mod event_log;
pub mod fragment;
pub mod lines;
pub mod protocol;

pub use config::TracecastConfig;
pub use error::TracecastError;
pub use event_log::EventLog;
pub use fragment::{parse_fragments, FragmentParser, DEFAULT_EVENTS_FIELD};
pub use lines::LineSplitter;
pub use protocol::{ClientMessage, ControlSignal, ServerMessage};
