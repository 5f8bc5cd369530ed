// HTTP routes
pub mod health;
pub mod metrics;
pub mod webhook;

pub use health::*;
pub use metrics::*;
pub use webhook::*;
