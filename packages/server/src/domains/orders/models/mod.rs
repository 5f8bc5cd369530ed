pub mod customer;
pub mod order;
pub mod staff;

pub use customer::Customer;
pub use order::{Order, OrderLine};
pub use staff::{StaffMember, StaffRole};
