//! Sales-pipeline core: stage vocabulary, stage-change state machine and the
//! write-through sync layer behind an editable contact board.
//!
//! Contacts move Lead → Presentation → Conversion. A `PipelineBoard` holds the
//! active working set for one (category, phase), applies edits locally at
//! once and persists them through a `RecordStore` with per-field debounced,
//! coalesced writes.

pub mod activity;
pub mod board;
pub mod db;
pub mod error;
mod migrations;
pub mod pipeline;
pub mod presets;
pub mod stages;
pub mod store;
pub mod sync;
pub mod types;
pub mod util;
pub mod view;

#[cfg(test)]
mod test_support;

pub use activity::ActivityKind;
pub use board::{PipelineBoard, StageChangeOutcome};
pub use error::{PipelineError, SyncNotice};
pub use pipeline::{SideEffectInput, SideEffectKind, ViewEffect};
pub use stages::StageVocabulary;
pub use store::{
    ContactPatch, MemoryRecordStore, NewContact, RecordStore, SqliteRecordStore, StoreError,
};
pub use sync::WriteOutcome;
pub use types::{load_config, Config, Contact, ContactField, FieldValue, Phase};

/// Install the `env_logger` backend for the `log` facade.
///
/// Defaults to `info`; `RUST_LOG` overrides. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
