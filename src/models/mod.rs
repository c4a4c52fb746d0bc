//! This module contains the data models for the Herald engine.

pub mod digest;
pub mod monitor;
pub mod record;
pub mod target;

pub use digest::{Digest, DigestGroup};
pub use record::Record;
pub use target::TargetKey;
