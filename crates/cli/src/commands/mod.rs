// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod dump;
pub mod inspect;
pub mod purge;
pub mod verify;

use anyhow::Context;
use changelog_core::Csn;
use changelog_persistence::{AccessMode, ChangelogConfig, ChangelogDb};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;

/// Opens an existing changelog next to whichever server owns it. Refuses to
/// create one, and never touches the owner's runtime sentinel.
pub(crate) fn open(dir: &Path, access: AccessMode) -> anyhow::Result<ChangelogDb> {
    anyhow::ensure!(
        dir.join("data.mdb").is_file(),
        "No changelog found in {}",
        dir.display()
    );
    let config = ChangelogConfig {
        access,
        ..ChangelogConfig::at(dir)
    };
    ChangelogDb::open(config)
        .with_context(|| format!("Failed to open changelog in {}", dir.display()))
}

pub(crate) fn new_table<T: ToString>(header: &[T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(ToString::to_string));
    table
}

/// Wall-clock time encoded in a CSN, RFC 3339 with milliseconds.
pub(crate) fn csn_time(csn: &Csn) -> String {
    chrono::DateTime::from_timestamp_millis(csn.timestamp_ms() as i64)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}
