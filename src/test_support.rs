//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::presets::load_preset;
use crate::stages::StageVocabulary;
use crate::types::{Contact, Phase};

pub(crate) fn vocabulary() -> StageVocabulary {
    let preset = load_preset("sales-pipeline").expect("embedded preset");
    StageVocabulary::from_preset(&preset).expect("valid vocabulary")
}

pub(crate) fn shared_vocabulary() -> Arc<StageVocabulary> {
    Arc::new(vocabulary())
}

pub(crate) fn sample_contact() -> Contact {
    Contact {
        id: "c1".to_string(),
        category_id: "cat".to_string(),
        current_phase: Phase::Lead,
        sales_stage: "Lead".to_string(),
        business_name: "Acme Bakery".to_string(),
        contact_name: None,
        mobile_number: None,
        email: None,
        link: None,
        demo_link: None,
        output_link: None,
        lead_source: None,
        assigned_to: None,
        notes: None,
        demo_instructions: None,
        value: None,
        deposit: None,
        contact_count: 0,
        last_contacted_at: None,
        created_at: "2026-01-01T00:00:00+00:00".to_string(),
        updated_at: "2026-01-01T00:00:00+00:00".to_string(),
    }
}

/// A contact sitting at `stage` in `phase`.
pub(crate) fn contact_at(id: &str, phase: Phase, stage: &str) -> Contact {
    Contact {
        id: id.to_string(),
        current_phase: phase,
        sales_stage: stage.to_string(),
        ..sample_contact()
    }
}
