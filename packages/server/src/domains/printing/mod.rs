pub mod handler;
pub mod jobs;
pub mod notifications;
pub mod retry;
pub mod ticket;

pub use handler::{register_printing_jobs, PrintTicketHandler};
pub use jobs::PrintTicketJob;
pub use notifications::{notify_print_failure, PrintFailureNotice};
pub use retry::{decide_next_action, NextAction};
pub use ticket::{Ticket, TicketContent, TICKET_WIDTH};
