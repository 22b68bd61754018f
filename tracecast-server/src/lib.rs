pub mod http;
pub mod service;
pub mod subsystems;
pub mod ws;
