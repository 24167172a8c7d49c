const SALES_PIPELINE_PRESET: &str = include_str!("../../presets/sales-pipeline.json");
const SALES_PIPELINE_LEGACY_PRESET: &str = include_str!("../../presets/sales-pipeline-legacy.json");

/// All embedded presets in display order.
const ALL_PRESETS: &[(&str, &str)] = &[
    ("sales-pipeline", SALES_PIPELINE_PRESET),
    ("sales-pipeline-legacy", SALES_PIPELINE_LEGACY_PRESET),
];

/// Look up an embedded preset by id.
pub fn get_embedded(id: &str) -> Option<&'static str> {
    ALL_PRESETS
        .iter()
        .find(|(preset_id, _)| *preset_id == id)
        .map(|(_, json)| *json)
}

/// List all embedded presets as (id, name, description).
pub fn list_embedded() -> Vec<(String, String, String)> {
    let mut result = Vec::new();
    for (id, json) in ALL_PRESETS {
        if let Ok(preset) = serde_json::from_str::<super::schema::PipelinePreset>(json) {
            result.push((preset.id, preset.name, preset.description));
        } else {
            result.push((id.to_string(), id.to_string(), String::new()));
        }
    }
    result
}
