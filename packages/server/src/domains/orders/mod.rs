pub mod models;
pub mod store;

pub use models::{Customer, Order, OrderLine, StaffMember, StaffRole};
pub use store::{PgOrderStore, PgStaffDirectory};
