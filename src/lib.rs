// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! changelog-core: domain model and binary codec for the replication changelog.
//!
//! Everything in this crate is pure. Storage, recovery and the background
//! maintenance live in `changelog-persistence`.

pub mod codec;
pub mod error;
pub mod record;
pub mod size_unit;
pub mod state;
pub mod types;

pub use error::{CodecError, CorruptReason, CorruptStateError, Result};
pub use record::ChangeRecord;
pub use size_unit::{ByteSize, SizeUnit, SizeUnitError};
pub use state::ChangelogState;
pub use types::{Csn, Dn, GenerationId, ServerId};

#[cfg(test)]
pub mod tests;
