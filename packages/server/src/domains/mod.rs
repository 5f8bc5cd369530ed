// Business domains
pub mod messaging;
pub mod orders;
pub mod printing;
