//! Core domain types shared across the pipeline, sync layer and record stores.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Default quiescence window before a debounced field write is persisted.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Embedded preset used when the config names none.
pub const DEFAULT_PIPELINE_PRESET: &str = "sales-pipeline";

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One of the three sequential pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Phase {
    Lead = 1,
    Presentation = 2,
    Conversion = 3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Lead, Phase::Presentation, Phase::Conversion];

    pub fn number(self) -> i64 {
        self as i64
    }

    /// Stable lowercase key ("lead", "presentation", "conversion").
    pub fn key(self) -> &'static str {
        match self {
            Phase::Lead => "lead",
            Phase::Presentation => "presentation",
            Phase::Conversion => "conversion",
        }
    }

    pub(crate) fn index(self) -> usize {
        (self as usize) - 1
    }
}

impl TryFrom<i64> for Phase {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Lead),
            2 => Ok(Phase::Presentation),
            3 => Ok(Phase::Conversion),
            other => Err(format!("Invalid pipeline phase: {}", other)),
        }
    }
}

impl From<Phase> for i64 {
    fn from(phase: Phase) -> Self {
        phase.number()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.key())
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// How a field's raw input is normalized and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Optional free text; blank becomes null.
    Text,
    /// Required text; blank stays an empty string.
    RequiredText,
    /// Nullable number parsed leniently from free text.
    Amount,
    /// Non-negative integer counter.
    Count,
    /// Nullable RFC 3339 timestamp.
    Timestamp,
    /// Pipeline stage label. Only written through the state machine.
    Stage,
    /// Pipeline phase number. Only written through the state machine.
    Phase,
}

/// Every persisted, patchable column of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    BusinessName,
    ContactName,
    MobileNumber,
    Email,
    Link,
    DemoLink,
    OutputLink,
    LeadSource,
    AssignedTo,
    Notes,
    DemoInstructions,
    Value,
    Deposit,
    ContactCount,
    LastContactedAt,
    SalesStage,
    CurrentPhase,
}

impl ContactField {
    pub const ALL: [ContactField; 17] = [
        ContactField::BusinessName,
        ContactField::ContactName,
        ContactField::MobileNumber,
        ContactField::Email,
        ContactField::Link,
        ContactField::DemoLink,
        ContactField::OutputLink,
        ContactField::LeadSource,
        ContactField::AssignedTo,
        ContactField::Notes,
        ContactField::DemoInstructions,
        ContactField::Value,
        ContactField::Deposit,
        ContactField::ContactCount,
        ContactField::LastContactedAt,
        ContactField::SalesStage,
        ContactField::CurrentPhase,
    ];

    /// Column name in the `contacts` table.
    pub fn column(self) -> &'static str {
        match self {
            ContactField::BusinessName => "business_name",
            ContactField::ContactName => "contact_name",
            ContactField::MobileNumber => "mobile_number",
            ContactField::Email => "email",
            ContactField::Link => "link",
            ContactField::DemoLink => "demo_link",
            ContactField::OutputLink => "output_link",
            ContactField::LeadSource => "lead_source",
            ContactField::AssignedTo => "assigned_to",
            ContactField::Notes => "notes",
            ContactField::DemoInstructions => "demo_instructions",
            ContactField::Value => "value",
            ContactField::Deposit => "deposit",
            ContactField::ContactCount => "contact_count",
            ContactField::LastContactedAt => "last_contacted_at",
            ContactField::SalesStage => "sales_stage",
            ContactField::CurrentPhase => "current_phase",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            ContactField::BusinessName => FieldKind::RequiredText,
            ContactField::Value | ContactField::Deposit => FieldKind::Amount,
            ContactField::ContactCount => FieldKind::Count,
            ContactField::LastContactedAt => FieldKind::Timestamp,
            ContactField::SalesStage => FieldKind::Stage,
            ContactField::CurrentPhase => FieldKind::Phase,
            _ => FieldKind::Text,
        }
    }

    /// Fields compared by duplicate detection.
    pub fn is_identity(self) -> bool {
        matches!(
            self,
            ContactField::BusinessName
                | ContactField::Link
                | ContactField::Email
                | ContactField::MobileNumber
        )
    }

    /// Pipeline position fields. These change only through a stage change.
    pub fn is_guarded(self) -> bool {
        matches!(self.kind(), FieldKind::Stage | FieldKind::Phase)
    }
}

impl FromStr for ContactField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContactField::ALL
            .iter()
            .copied()
            .find(|f| f.column() == s)
            .ok_or_else(|| PipelineError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for ContactField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// A single field value as edited in a table cell or written to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn from_opt_text(value: Option<&str>) -> Self {
        value.map_or(FieldValue::Null, |v| FieldValue::Text(v.to_string()))
    }

    pub fn from_opt_number(value: Option<f64>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Number)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A contact moving through the sales pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub category_id: String,
    pub current_phase: Phase,
    pub sales_stage: String,
    pub business_name: String,
    pub contact_name: Option<String>,
    pub mobile_number: Option<String>,
    pub email: Option<String>,
    pub link: Option<String>,
    pub demo_link: Option<String>,
    pub output_link: Option<String>,
    pub lead_source: Option<String>,
    pub assigned_to: Option<String>,
    pub notes: Option<String>,
    pub demo_instructions: Option<String>,
    pub value: Option<f64>,
    pub deposit: Option<f64>,
    pub contact_count: i64,
    pub last_contacted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Contact {
    /// Read a field as a `FieldValue`.
    pub fn get(&self, field: ContactField) -> FieldValue {
        match field {
            ContactField::BusinessName => FieldValue::Text(self.business_name.clone()),
            ContactField::ContactName => FieldValue::from_opt_text(self.contact_name.as_deref()),
            ContactField::MobileNumber => FieldValue::from_opt_text(self.mobile_number.as_deref()),
            ContactField::Email => FieldValue::from_opt_text(self.email.as_deref()),
            ContactField::Link => FieldValue::from_opt_text(self.link.as_deref()),
            ContactField::DemoLink => FieldValue::from_opt_text(self.demo_link.as_deref()),
            ContactField::OutputLink => FieldValue::from_opt_text(self.output_link.as_deref()),
            ContactField::LeadSource => FieldValue::from_opt_text(self.lead_source.as_deref()),
            ContactField::AssignedTo => FieldValue::from_opt_text(self.assigned_to.as_deref()),
            ContactField::Notes => FieldValue::from_opt_text(self.notes.as_deref()),
            ContactField::DemoInstructions => {
                FieldValue::from_opt_text(self.demo_instructions.as_deref())
            }
            ContactField::Value => FieldValue::from_opt_number(self.value),
            ContactField::Deposit => FieldValue::from_opt_number(self.deposit),
            ContactField::ContactCount => FieldValue::Integer(self.contact_count),
            ContactField::LastContactedAt => {
                FieldValue::from_opt_text(self.last_contacted_at.as_deref())
            }
            ContactField::SalesStage => FieldValue::Text(self.sales_stage.clone()),
            ContactField::CurrentPhase => FieldValue::Integer(self.current_phase.number()),
        }
    }

    /// Assign an already-normalized value to a field.
    ///
    /// Rejects values whose type does not fit the field; the record is left
    /// untouched on error.
    pub fn set(&mut self, field: ContactField, value: &FieldValue) -> Result<(), PipelineError> {
        let mismatch = |expected: &'static str| PipelineError::TypeMismatch { field, expected };
        match field.kind() {
            FieldKind::Text => {
                let text = match value {
                    FieldValue::Null => None,
                    FieldValue::Text(s) => Some(s.clone()),
                    _ => return Err(mismatch("text or null")),
                };
                let slot = self
                    .text_slot(field)
                    .ok_or_else(|| mismatch("known text field"))?;
                *slot = text;
            }
            FieldKind::RequiredText => match value {
                FieldValue::Null => self.business_name.clear(),
                FieldValue::Text(s) => self.business_name = s.clone(),
                _ => return Err(mismatch("text")),
            },
            FieldKind::Amount => {
                let amount = match value {
                    FieldValue::Null => None,
                    FieldValue::Number(n) => Some(*n),
                    FieldValue::Integer(i) => Some(*i as f64),
                    FieldValue::Text(_) => return Err(mismatch("number or null")),
                };
                if field == ContactField::Value {
                    self.value = amount;
                } else {
                    self.deposit = amount;
                }
            }
            FieldKind::Count => match value {
                FieldValue::Integer(i) if *i >= 0 => self.contact_count = *i,
                _ => return Err(mismatch("non-negative integer")),
            },
            FieldKind::Timestamp => match value {
                FieldValue::Null => self.last_contacted_at = None,
                FieldValue::Text(s) => self.last_contacted_at = Some(s.clone()),
                _ => return Err(mismatch("timestamp or null")),
            },
            FieldKind::Stage => match value {
                FieldValue::Text(s) => self.sales_stage = s.clone(),
                _ => return Err(mismatch("stage label")),
            },
            FieldKind::Phase => match value {
                FieldValue::Integer(i) => {
                    self.current_phase = Phase::try_from(*i).map_err(|_| mismatch("phase 1-3"))?
                }
                _ => return Err(mismatch("phase 1-3")),
            },
        }
        Ok(())
    }

    /// Storage for an optional text field; `None` for every other kind.
    fn text_slot(&mut self, field: ContactField) -> Option<&mut Option<String>> {
        let slot = match field {
            ContactField::ContactName => &mut self.contact_name,
            ContactField::MobileNumber => &mut self.mobile_number,
            ContactField::Email => &mut self.email,
            ContactField::Link => &mut self.link,
            ContactField::DemoLink => &mut self.demo_link,
            ContactField::OutputLink => &mut self.output_link,
            ContactField::LeadSource => &mut self.lead_source,
            ContactField::AssignedTo => &mut self.assigned_to,
            ContactField::DemoInstructions => &mut self.demo_instructions,
            ContactField::Notes => &mut self.notes,
            _ => return None,
        };
        Some(slot)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// User configuration, read from `~/.salesdesk/config.json`.
///
/// Every field has a default so a missing or partial file still yields a
/// working setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite file backing the record store. Defaults to `~/.salesdesk/salesdesk.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    /// Quiescence window for debounced cell edits.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Embedded pipeline preset id.
    #[serde(default = "default_pipeline_preset")]
    pub pipeline_preset: String,
    /// Custom preset file. Takes precedence over `pipeline_preset` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_preset_path: Option<String>,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_pipeline_preset() -> String {
    DEFAULT_PIPELINE_PRESET.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            pipeline_preset: default_pipeline_preset(),
            custom_preset_path: None,
        }
    }
}

impl Config {
    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }

    /// Resolve the stage vocabulary this config selects.
    pub fn load_vocabulary(&self) -> Result<crate::stages::StageVocabulary, PipelineError> {
        let preset = match self.custom_preset_path {
            Some(ref path) => crate::presets::load_custom_preset(std::path::Path::new(path)),
            None => crate::presets::load_preset(&self.pipeline_preset),
        }
        .map_err(PipelineError::Preset)?;
        crate::stages::StageVocabulary::from_preset(&preset).map_err(PipelineError::Preset)
    }

    /// Resolve the database path, falling back to `~/.salesdesk/salesdesk.db`.
    pub fn database_path(&self) -> Result<PathBuf, String> {
        match self.database_path {
            Some(ref path) => Ok(PathBuf::from(path)),
            None => Ok(salesdesk_dir()?.join("salesdesk.db")),
        }
    }
}

/// `~/.salesdesk`
pub fn salesdesk_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".salesdesk"))
}

/// Load the config from `~/.salesdesk/config.json`, or defaults when absent.
pub fn load_config() -> Result<Config, String> {
    let config_path = salesdesk_dir()?.join("config.json");
    if !config_path.exists() {
        log::info!("No config at {}, using defaults", config_path.display());
        return Ok(Config::default());
    }
    load_config_from(&config_path)
}

/// Load a config file from an explicit path.
pub fn load_config_from(path: &std::path::Path) -> Result<Config, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
    if config.debounce_ms == 0 {
        return Err("debounceMs must be greater than zero".to_string());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_contact;

    #[test]
    fn test_phase_serde_as_number() {
        let json = serde_json::to_string(&Phase::Presentation).unwrap();
        assert_eq!(json, "2");
        let phase: Phase = serde_json::from_str("3").unwrap();
        assert_eq!(phase, Phase::Conversion);
        assert!(serde_json::from_str::<Phase>("4").is_err());
    }

    #[test]
    fn test_field_from_column_name() {
        assert_eq!("notes".parse::<ContactField>().unwrap(), ContactField::Notes);
        assert_eq!(
            "last_contacted_at".parse::<ContactField>().unwrap(),
            ContactField::LastContactedAt
        );
        assert!(matches!(
            "password".parse::<ContactField>(),
            Err(PipelineError::UnknownField(_))
        ));
    }

    #[test]
    fn test_field_value_untagged_json() {
        let v: FieldValue = serde_json::from_str("null").unwrap();
        assert_eq!(v, FieldValue::Null);
        let v: FieldValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, FieldValue::Integer(3));
        let v: FieldValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(v, FieldValue::Number(2.5));
        let v: FieldValue = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(v, FieldValue::text("x"));
    }

    #[test]
    fn test_contact_set_and_get() {
        let mut contact = sample_contact();
        contact
            .set(ContactField::Email, &FieldValue::text("a@b.co"))
            .unwrap();
        contact
            .set(ContactField::Value, &FieldValue::Integer(1200))
            .unwrap();
        assert_eq!(contact.email.as_deref(), Some("a@b.co"));
        assert_eq!(contact.get(ContactField::Value), FieldValue::Number(1200.0));

        contact.set(ContactField::Email, &FieldValue::Null).unwrap();
        assert_eq!(contact.email, None);
    }

    #[test]
    fn test_contact_set_rejects_mismatch_without_mutation() {
        let mut contact = sample_contact();
        let err = contact
            .set(ContactField::ContactCount, &FieldValue::Integer(-1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
        assert_eq!(contact.contact_count, 0);

        assert!(contact
            .set(ContactField::CurrentPhase, &FieldValue::Integer(7))
            .is_err());
        assert_eq!(contact.current_phase, Phase::Lead);
    }

    #[test]
    fn test_text_fields_each_own_their_slot() {
        let mut contact = sample_contact();
        let text_fields: Vec<ContactField> = ContactField::ALL
            .into_iter()
            .filter(|f| f.kind() == FieldKind::Text)
            .collect();
        for field in &text_fields {
            contact
                .set(*field, &FieldValue::text(field.column()))
                .unwrap();
        }
        for field in &text_fields {
            assert_eq!(contact.get(*field), FieldValue::text(field.column()));
        }
        assert!(contact.text_slot(ContactField::Notes).is_some());
        assert!(contact.text_slot(ContactField::Value).is_none());
        assert!(contact.text_slot(ContactField::SalesStage).is_none());
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: Config = serde_json::from_str("{\"debounceMs\": 250}").unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.pipeline_preset, "sales-pipeline");
        assert!(config.custom_preset_path.is_none());
    }

    #[test]
    fn test_load_config_from_rejects_zero_debounce() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{\"debounceMs\": 0}").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.contains("debounceMs"));
    }

    #[test]
    fn test_config_loads_default_vocabulary() {
        let vocab = Config::default().load_vocabulary().expect("vocabulary");
        assert_eq!(vocab.initial_stage(Phase::Lead), "Lead");
    }
}
