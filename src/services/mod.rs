pub mod booking;
pub mod gateway;
pub mod identity;
pub mod reconciliation;
pub mod reporting;
