//! Stage vocabulary: which labels are legal in which phase.
//!
//! Built once from a validated `PipelinePreset` and shared read-only by the
//! state machine, the active view and the board. All lookups are pure.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::pipeline::SideEffectKind;
use crate::presets::{validate_preset, PipelinePreset};
use crate::types::{Contact, Phase};

/// Where a trigger stage sends the contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub target_phase: Phase,
    pub entry_stage: String,
}

#[derive(Debug, Clone)]
struct PhaseStages {
    initial_stage: String,
    stages: Vec<String>,
}

/// A stored contact whose stage is not legal for its phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMismatch {
    pub contact_id: String,
    pub phase: Phase,
    pub stage: String,
    /// The phase whose vocabulary does contain the label, if any.
    pub belongs_to: Option<Phase>,
}

#[derive(Debug, Clone)]
pub struct StageVocabulary {
    preset_id: String,
    phases: Vec<PhaseStages>,
    transitions: HashMap<String, Transition>,
    archived: HashSet<String>,
    side_effects: HashMap<String, SideEffectKind>,
}

impl StageVocabulary {
    /// Build the vocabulary from a preset, validating it first.
    pub fn from_preset(preset: &PipelinePreset) -> Result<Self, String> {
        validate_preset(preset)?;

        let phases: Vec<PhaseStages> = preset
            .phases
            .iter()
            .map(|p| PhaseStages {
                initial_stage: p.initial_stage.clone(),
                stages: p.stages.clone(),
            })
            .collect();

        let mut transitions = HashMap::new();
        for t in &preset.transitions {
            let target_phase = Phase::try_from(t.target_phase)?;
            let entry_stage = t
                .entry_stage
                .clone()
                .unwrap_or_else(|| phases[target_phase.index()].initial_stage.clone());
            transitions.insert(
                t.stage.clone(),
                Transition {
                    target_phase,
                    entry_stage,
                },
            );
        }

        Ok(Self {
            preset_id: preset.id.clone(),
            phases,
            transitions,
            archived: preset.archived_stages.iter().cloned().collect(),
            side_effects: preset
                .side_effects
                .iter()
                .map(|e| (e.stage.clone(), e.kind))
                .collect(),
        })
    }

    pub fn preset_id(&self) -> &str {
        &self.preset_id
    }

    /// Legal labels for a phase, in presentation order.
    pub fn stages_for_phase(&self, phase: Phase) -> &[String] {
        &self.phases[phase.index()].stages
    }

    /// Stage a contact holds when it enters the phase from creation.
    pub fn initial_stage(&self, phase: Phase) -> &str {
        &self.phases[phase.index()].initial_stage
    }

    pub fn contains(&self, phase: Phase, stage: &str) -> bool {
        self.stages_for_phase(phase).iter().any(|s| s == stage)
    }

    /// The phase whose vocabulary contains `stage`.
    pub fn phase_of(&self, stage: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| self.contains(*p, stage))
    }

    pub fn transition_for(&self, stage: &str) -> Option<&Transition> {
        self.transitions.get(stage)
    }

    pub fn is_archived(&self, stage: &str) -> bool {
        self.archived.contains(stage)
    }

    pub fn side_effect_for(&self, stage: &str) -> Option<SideEffectKind> {
        self.side_effects.get(stage).copied()
    }

    /// Whether a contact belongs to the active working set of `phase`.
    pub fn is_active_in(&self, contact: &Contact, phase: Phase) -> bool {
        contact.current_phase == phase && !self.is_archived(&contact.sales_stage)
    }

    /// Report contacts whose stored stage is not legal for their phase.
    ///
    /// Typically the result of switching presets (e.g. `Demo Approved` data
    /// under a vocabulary that spells it `Approved`).
    pub fn audit<'a>(&self, contacts: impl IntoIterator<Item = &'a Contact>) -> Vec<StageMismatch> {
        contacts
            .into_iter()
            .filter(|c| !self.contains(c.current_phase, &c.sales_stage))
            .map(|c| StageMismatch {
                contact_id: c.id.clone(),
                phase: c.current_phase,
                stage: c.sales_stage.clone(),
                belongs_to: self.phase_of(&c.sales_stage),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::load_preset;
    use crate::test_support::{sample_contact, vocabulary};

    #[test]
    fn test_stages_for_phase_in_order() {
        let vocab = vocabulary();
        assert_eq!(
            vocab.stages_for_phase(Phase::Lead),
            &["Lead", "Approached", "Not Interested", "Demo Stage"]
        );
        assert_eq!(vocab.initial_stage(Phase::Presentation), "Request Demo");
        assert_eq!(vocab.initial_stage(Phase::Conversion), "Negotiating");
    }

    #[test]
    fn test_transition_lookup() {
        let vocab = vocabulary();
        let t = vocab.transition_for("Demo Stage").expect("trigger");
        assert_eq!(t.target_phase, Phase::Presentation);
        assert_eq!(t.entry_stage, "Request Demo");

        let t = vocab.transition_for("Approved").expect("trigger");
        assert_eq!(t.target_phase, Phase::Conversion);
        assert_eq!(t.entry_stage, "Negotiating");

        assert!(vocab.transition_for("Approached").is_none());
        assert!(vocab.transition_for("Demo Approved").is_none());
    }

    #[test]
    fn test_archived_labels() {
        let vocab = vocabulary();
        for stage in ["Not Interested", "Rejected", "Closed Lost", "Completed"] {
            assert!(vocab.is_archived(stage), "{} should be archived", stage);
        }
        assert!(!vocab.is_archived("Closed Won"));
    }

    #[test]
    fn test_side_effect_gates() {
        let vocab = vocabulary();
        assert_eq!(vocab.side_effect_for("Request Demo"), Some(SideEffectKind::DemoRequest));
        assert_eq!(vocab.side_effect_for("Approved"), Some(SideEffectKind::Approval));
        assert_eq!(vocab.side_effect_for("Rejected"), Some(SideEffectKind::Rejection));
        assert_eq!(vocab.side_effect_for("Closed Won"), Some(SideEffectKind::Payment));
        assert_eq!(vocab.side_effect_for("Demo Stage"), None);
    }

    #[test]
    fn test_phase_sets_are_disjoint() {
        let vocab = vocabulary();
        for phase in Phase::ALL {
            for stage in vocab.stages_for_phase(phase) {
                assert_eq!(vocab.phase_of(stage), Some(phase));
            }
        }
    }

    #[test]
    fn test_legacy_vocabulary_triggers() {
        let preset = load_preset("sales-pipeline-legacy").unwrap();
        let vocab = StageVocabulary::from_preset(&preset).unwrap();
        let t = vocab.transition_for("Demo Approved").expect("legacy trigger");
        assert_eq!(t.entry_stage, "Deposit Paid");
        assert!(vocab.transition_for("Approved").is_none());
    }

    #[test]
    fn test_audit_flags_foreign_labels() {
        let vocab = vocabulary();
        let mut ok = sample_contact();
        ok.id = "ok".to_string();
        let mut legacy = sample_contact();
        legacy.id = "legacy".to_string();
        legacy.current_phase = Phase::Presentation;
        legacy.sales_stage = "Demo Approved".to_string();
        let mut misplaced = sample_contact();
        misplaced.id = "misplaced".to_string();
        misplaced.sales_stage = "Fully Paid".to_string();

        let report = vocab.audit([&ok, &legacy, &misplaced]);
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].contact_id, "legacy");
        assert_eq!(report[0].belongs_to, None);
        assert_eq!(report[1].belongs_to, Some(Phase::Conversion));
    }

    #[test]
    fn test_is_active_in() {
        let vocab = vocabulary();
        let mut contact = sample_contact();
        assert!(vocab.is_active_in(&contact, Phase::Lead));
        assert!(!vocab.is_active_in(&contact, Phase::Presentation));
        contact.sales_stage = "Not Interested".to_string();
        assert!(!vocab.is_active_in(&contact, Phase::Lead));
    }
}
