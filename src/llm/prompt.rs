//! The diagnosis instruction sent with every photo.

/// Built-in prompt. The JSON shape here is the one `interpret` expects.
pub fn base_diagnosis_prompt() -> &'static str {
    r#"You are a botanist. Analyze the plant in this photo and answer with strictly valid JSON only (no markdown, no explanations), in exactly this shape:
{
  "species": "Common name of the plant",
  "scientific_name": "Latin binomial, or null if unsure",
  "family": "Botanical family, or null if unsure",
  "health_status": "One or two words, e.g. Healthy, Stressed, Diseased",
  "health_score": 85,
  "diagnosis": "Short visual summary of the plant's condition (max 150 characters)",
  "water_frequency": 7,
  "findings": {
    "leaf_condition": "What the leaves show",
    "detected_issues": ["pests, deficiencies or diseases seen"]
  },
  "care": {
    "light": "Recommended light",
    "humidity": "Recommended humidity",
    "soil": "Recommended soil",
    "fertilizer": "Recommended feeding"
  }
}
health_score is an integer from 1 (dying) to 100 (thriving). water_frequency is the number of days between waterings.
If the photo does not show a plant or is too blurry to judge, answer {"error": "reason"} instead."#
}

/// Builds the full prompt with optional custom context and optional base prompt override
pub fn build_diagnosis_prompt(custom_prompt: Option<&str>, base_prompt: Option<&str>) -> String {
    let base = base_prompt.unwrap_or_else(|| base_diagnosis_prompt());
    match custom_prompt {
        Some(context) => format!("Context: {}\n\n{}", context, base),
        None => base.to_string(),
    }
}
