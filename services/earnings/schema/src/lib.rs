//! sea-orm entities for the earnings service.
//!
//! `worker_payouts` and `outbox_events` are owned by this service.
//! `workers` and `job_instances` are owned by other services sharing the
//! database and are only read here.

pub mod job_instances;
pub mod outbox_events;
pub mod worker_payouts;
pub mod workers;
