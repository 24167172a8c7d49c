use std::collections::HashSet;

use super::embedded;
use super::schema::PipelinePreset;
use crate::types::Phase;

/// Load an embedded preset by id.
pub fn load_preset(id: &str) -> Result<PipelinePreset, String> {
    if let Some(json) = embedded::get_embedded(id) {
        let preset: PipelinePreset = serde_json::from_str(json)
            .map_err(|e| format!("Failed to parse embedded preset '{}': {}", id, e))?;
        validate_preset(&preset)?;
        return Ok(preset);
    }
    Err(format!("Unknown pipeline preset: {}", id))
}

/// Load a custom preset from a file path.
pub fn load_custom_preset(path: &std::path::Path) -> Result<PipelinePreset, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read preset file: {}", e))?;
    let preset: PipelinePreset =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse preset: {}", e))?;
    validate_preset(&preset)?;
    Ok(preset)
}

/// Validate a preset describes a well-formed, forward-only pipeline.
pub fn validate_preset(preset: &PipelinePreset) -> Result<(), String> {
    if preset.id.is_empty() {
        return Err("Preset id is required".into());
    }
    if preset.phases.len() != Phase::ALL.len() {
        return Err(format!(
            "Preset must define {} phases, found {}",
            Phase::ALL.len(),
            preset.phases.len()
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for (expected, phase) in Phase::ALL.iter().zip(&preset.phases) {
        if phase.phase != expected.number() {
            return Err(format!(
                "Phases must be listed in order: expected {}, found {}",
                expected.number(),
                phase.phase
            ));
        }
        if phase.key != expected.key() {
            return Err(format!(
                "Phase {} must use key '{}', found '{}'",
                phase.phase,
                expected.key(),
                phase.key
            ));
        }
        if phase.stages.is_empty() {
            return Err(format!("Phase {} has no stages", phase.phase));
        }
        for stage in &phase.stages {
            if stage.trim().is_empty() {
                return Err(format!("Phase {} has a blank stage label", phase.phase));
            }
            // Disjoint sets: a label identifies its phase.
            if !seen.insert(stage.as_str()) {
                return Err(format!("Stage '{}' appears more than once", stage));
            }
        }
        if !phase.stages.contains(&phase.initial_stage) {
            return Err(format!(
                "Initial stage '{}' is not a stage of phase {}",
                phase.initial_stage, phase.phase
            ));
        }
    }

    let phase_of = |stage: &str| {
        preset
            .phases
            .iter()
            .find(|p| p.stages.iter().any(|s| s == stage))
            .map(|p| p.phase)
    };

    let mut triggers: HashSet<&str> = HashSet::new();
    for transition in &preset.transitions {
        let source = phase_of(&transition.stage).ok_or_else(|| {
            format!("Transition stage '{}' is not in any phase", transition.stage)
        })?;
        if !triggers.insert(transition.stage.as_str()) {
            return Err(format!("Stage '{}' has more than one transition", transition.stage));
        }
        let target = preset
            .phases
            .iter()
            .find(|p| p.phase == transition.target_phase)
            .ok_or_else(|| format!("Unknown target phase {}", transition.target_phase))?;
        if transition.target_phase <= source {
            return Err(format!(
                "Transition '{}' must move forward (phase {} -> {})",
                transition.stage, source, transition.target_phase
            ));
        }
        let entry = transition
            .entry_stage
            .as_ref()
            .unwrap_or(&target.initial_stage);
        if !target.stages.contains(entry) {
            return Err(format!(
                "Entry stage '{}' is not a stage of phase {}",
                entry, target.phase
            ));
        }
        if preset.archived_stages.contains(entry) {
            return Err(format!("Entry stage '{}' is archived", entry));
        }
    }

    for stage in &preset.archived_stages {
        if phase_of(stage).is_none() {
            return Err(format!("Archived stage '{}' is not in any phase", stage));
        }
        if triggers.contains(stage.as_str()) {
            return Err(format!("Stage '{}' cannot be both archived and a trigger", stage));
        }
    }

    let mut gated: HashSet<&str> = HashSet::new();
    for effect in &preset.side_effects {
        if phase_of(&effect.stage).is_none() {
            return Err(format!("Side-effect stage '{}' is not in any phase", effect.stage));
        }
        if !gated.insert(effect.stage.as_str()) {
            return Err(format!("Stage '{}' has more than one side effect", effect.stage));
        }
    }

    Ok(())
}

/// List all available embedded presets as (id, name, description).
pub fn available_presets() -> Vec<(String, String, String)> {
    embedded::list_embedded()
}
