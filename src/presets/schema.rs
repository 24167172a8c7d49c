use serde::{Deserialize, Serialize};

use crate::pipeline::SideEffectKind;

/// A pipeline preset defining the per-phase stage vocabulary and the
/// stages that trigger transitions, archival, or side-effect capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelinePreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Exactly one entry per phase, in phase order.
    pub phases: Vec<PresetPhase>,
    #[serde(default)]
    pub transitions: Vec<PresetTransition>,
    /// Terminal labels hidden from active views wherever they appear.
    #[serde(default)]
    pub archived_stages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<PresetSideEffect>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetPhase {
    pub phase: i64,
    pub key: String,
    pub label: String,
    pub initial_stage: String,
    /// Presentation order.
    pub stages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetTransition {
    pub stage: String,
    pub target_phase: i64,
    /// Defaults to the target phase's initial stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetSideEffect {
    pub stage: String,
    pub kind: SideEffectKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sales_preset_deserializes() {
        let json = include_str!("../../presets/sales-pipeline.json");
        let preset: PipelinePreset = serde_json::from_str(json).expect("preset should parse");
        assert_eq!(preset.id, "sales-pipeline");
        assert_eq!(preset.phases.len(), 3);
        assert_eq!(preset.phases[0].initial_stage, "Lead");
        assert_eq!(preset.transitions.len(), 2);
        assert_eq!(preset.archived_stages.len(), 4);
        assert_eq!(preset.side_effects.len(), 4);
        assert!(preset.transitions.iter().all(|t| t.entry_stage.is_none()));
    }

    #[test]
    fn test_legacy_preset_uses_older_labels() {
        let json = include_str!("../../presets/sales-pipeline-legacy.json");
        let preset: PipelinePreset = serde_json::from_str(json).expect("preset should parse");
        assert!(preset.transitions.iter().any(|t| t.stage == "Demo Approved"));
        assert_eq!(preset.phases[2].initial_stage, "Deposit Paid");
    }

    #[test]
    fn test_side_effect_kind_wire_names() {
        let json = r#"{"stage": "Closed Won", "kind": "payment"}"#;
        let effect: PresetSideEffect = serde_json::from_str(json).unwrap();
        assert_eq!(effect.kind, SideEffectKind::Payment);
    }
}
