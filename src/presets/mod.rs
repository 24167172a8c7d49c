//! Pipeline presets: the stage vocabulary as data.
//!
//! Which labels exist per phase, which ones hand a contact to the next phase
//! and which ones need operator input are preset-driven, so a label rename is
//! a preset change rather than a code change.

pub mod embedded;
pub mod loader;
pub mod schema;

pub use loader::{available_presets, load_custom_preset, load_preset, validate_preset};
pub use schema::PipelinePreset;
