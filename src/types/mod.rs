// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod csn;
pub mod dn;
pub mod id;

pub use csn::Csn;
pub use dn::Dn;
pub use id::{GenerationId, ServerId};
