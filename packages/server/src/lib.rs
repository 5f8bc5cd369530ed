// Order-desk messaging broker - core library
//
// Receives WhatsApp webhook events, runs the conversation and ticket
// printing as background jobs, and guards outbound messaging with a
// circuit breaker.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
