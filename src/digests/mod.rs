//! The digest pipeline: per-target record buffering, delay-window scheduling
//! and exactly-once-ish delivery coordination.
//!
//! Producers append records to a [`store::DigestStore`]; the
//! [`scheduler::DigestScheduler`] periodically sweeps ready targets onto a
//! work queue; the [`deliver::DeliveryCoordinator`] claims each target
//! exclusively, builds the digest and resolves the claim. Claims are leases,
//! not locks forever: a crashed worker's claim is reclaimed by maintenance,
//! which trades rare redelivery for never silently losing records.

pub mod builder;
pub mod deliver;
pub mod error;
pub mod memory;
pub mod scheduler;
pub mod store;

pub use builder::build_digest;
pub use deliver::{DeliveryCoordinator, Target, TargetResolutionError, TargetResolver};
pub use error::{DeliveryError, StoreError};
pub use memory::InMemoryDigestStore;
pub use scheduler::DigestScheduler;
pub use store::{ClaimToken, DigestStore, ScheduleEntry};
