//! Business services. Handlers stay thin and call into these.
pub mod commerce;
pub mod orders;
pub mod payments;
pub mod reviews;
pub mod users;
