pub mod allocation;
pub mod rent_status;
