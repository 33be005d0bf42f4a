// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Binary codec between the domain model and key-value bytes.
//!
//! Pure functions only; nothing here touches storage.

pub mod csn;
pub mod record;
pub mod state;

pub use csn::{decode_csn_key, encode_csn_key, CSN_KEY_LEN};
pub use record::{decode_record_value, encode_record_value};
pub use state::{
    decode_all, decode_entry, domain_prefix, encode_generation_entry, encode_offline_entry,
    encode_replica_entry, DecodedState, StateEntry, StateKey, StateRecord, KIND_GENERATION,
    KIND_OFFLINE, KIND_REPLICA,
};
