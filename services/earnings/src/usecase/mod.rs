pub mod aggregate;
pub mod process;
pub mod reconcile;
pub mod recovery;
pub mod webhook_check;
