pub mod event;
pub mod failure;
pub mod period;
pub mod repository;
pub mod signature;
pub mod types;
