pub mod clock;
pub mod error;
pub mod reminders;
pub mod repository;
pub mod store;
