//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Phase;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Contact not found: {0}")]
    NotFound(String),
}

/// A row from the `stage_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStageChange {
    pub contact_id: String,
    pub from_phase: Phase,
    pub from_stage: String,
    pub to_phase: Phase,
    pub to_stage: String,
    pub note: Option<String>,
    pub changed_at: String,
}
