pub mod hub;
pub mod runner;
pub mod sessions;
pub mod tailer;
