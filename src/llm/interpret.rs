//! Turning the model's free-text answer into a [`Diagnosis`].

use serde_json::{Map, Value};

/// Outcome of one inference call.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnosis {
    Assessed(PlantAssessment),
    Failed { reason: String },
}

impl Diagnosis {
    pub fn failed(reason: impl Into<String>) -> Self {
        Diagnosis::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Diagnosis::Failed { .. })
    }
}

/// A successfully parsed answer. Fields the model omitted or got the type of
/// wrong are left at their defaults and listed in `missing_fields`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlantAssessment {
    pub species: String,
    pub scientific_name: Option<String>,
    pub family: Option<String>,
    pub health_status: String,
    pub health_score: Option<u8>,
    pub diagnosis: String,
    pub water_frequency_days: Option<u32>,
    pub findings: Map<String, Value>,
    pub care: Map<String, Value>,
    pub missing_fields: Vec<String>,
}

/// Keys every answer is expected to carry.
const REQUIRED_KEYS: &[&str] = &["species", "health_status", "diagnosis"];

/// Pull the JSON body out of a markdown code fence such as ` ```json `.
///
/// Text that already starts like JSON is returned trimmed, so backticks inside
/// string values survive. Prose before the opening fence or after the closing
/// one is dropped.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed.to_string();
    }

    let Some(open) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    // Skip the language tag, if any
    let after_open = &trimmed[open + 3..];
    let body_start = after_open
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after_open.len());
    let body = &after_open[body_start..];

    let body = match body.rfind("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}

/// Interpret raw model output.
pub fn interpret(text: &str) -> Diagnosis {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Diagnosis::failed("empty response from model");
    }

    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(value) => value,
        Err(e) => return Diagnosis::failed(format!("unparsable response: {}", e)),
    };

    let Value::Object(obj) = value else {
        return Diagnosis::failed("response is not a JSON object");
    };

    if let Some(error) = obj.get("error") {
        let reason = match error {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Null | Value::Bool(false) => String::new(),
            other => other.to_string(),
        };
        if !reason.is_empty() {
            return Diagnosis::failed(reason);
        }
    }

    Diagnosis::Assessed(assessment_from(&obj))
}

fn assessment_from(obj: &Map<String, Value>) -> PlantAssessment {
    let mut missing = Vec::new();

    let mut text = |key: &str| -> String {
        match obj.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => {
                if REQUIRED_KEYS.contains(&key) {
                    missing.push(key.to_string());
                }
                String::new()
            }
        }
    };
    let species = text("species");
    let health_status = text("health_status");
    let diagnosis = text("diagnosis");

    let health_score = match obj.get("health_score") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let score = number(v).filter(|n| (1.0..=100.0).contains(n)).map(|n| n.round() as u8);
            if score.is_none() {
                missing.push("health_score".to_string());
            }
            score
        }
    };

    let water_frequency_days = match obj.get("water_frequency") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let days = number(v).filter(|n| *n >= 0.0 && *n <= u32::MAX as f64).map(|n| n.round() as u32);
            if days.is_none() {
                missing.push("water_frequency".to_string());
            }
            days
        }
    };

    let mut object = |key: &str| -> Map<String, Value> {
        match obj.get(key) {
            Some(Value::Object(map)) => map.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(_) => {
                missing.push(key.to_string());
                Map::new()
            }
        }
    };
    let findings = object("findings");
    let care = object("care");

    PlantAssessment {
        species,
        scientific_name: optional_text(obj, "scientific_name"),
        family: optional_text(obj, "family"),
        health_status,
        health_score,
        diagnosis,
        water_frequency_days,
        findings,
        care,
        missing_fields: missing,
    }
}

fn optional_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers may arrive as JSON numbers or numeric strings ("7").
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONSTERA: &str =
        r#"{"species":"Monstera","health_status":"Healthy","diagnosis":"Looks great","water_frequency":7}"#;

    #[test]
    fn test_well_formed_answer() {
        let Diagnosis::Assessed(a) = interpret(MONSTERA) else {
            panic!("expected assessment");
        };
        assert_eq!(a.species, "Monstera");
        assert_eq!(a.health_status, "Healthy");
        assert_eq!(a.diagnosis, "Looks great");
        assert_eq!(a.water_frequency_days, Some(7));
        assert!(a.missing_fields.is_empty());
    }

    #[test]
    fn test_fenced_equals_unfenced() {
        let fenced = format!("```json\n{}\n```", MONSTERA);
        assert_eq!(interpret(&fenced), interpret(MONSTERA));

        let bare_fence = format!("```\n{}\n```  ", MONSTERA);
        assert_eq!(interpret(&bare_fence), interpret(MONSTERA));
    }

    #[test]
    fn test_fence_inside_prose() {
        let answer = format!("Here is the assessment:\n```json{}```\nLet me know!", MONSTERA);
        assert_eq!(strip_code_fences(&answer), MONSTERA);
        assert_eq!(interpret(&answer), interpret(MONSTERA));
    }

    #[test]
    fn test_backticks_inside_values_kept() {
        let answer = r#"{"species":"Fern","health_status":"Fair","diagnosis":"Run ```repot``` soon"}"#;
        assert_eq!(strip_code_fences(answer), answer);

        let fenced = format!("```json\n{}\n```", answer);
        assert_eq!(strip_code_fences(&fenced), answer);

        match interpret(&fenced) {
            Diagnosis::Assessed(a) => assert_eq!(a.diagnosis, "Run ```repot``` soon"),
            other => panic!("expected assessment, got {:?}", other),
        }
    }

    #[test]
    fn test_error_key_fails() {
        assert_eq!(
            interpret(r#"{"error":"No plant detected"}"#),
            Diagnosis::failed("No plant detected")
        );
    }

    #[test]
    fn test_unparsable_fails() {
        assert!(interpret("I think this is a ficus.").is_failed());
        assert!(interpret("").is_failed());
        assert!(interpret("```json\n```").is_failed());
        assert!(interpret("[1, 2, 3]").is_failed());
    }

    #[test]
    fn test_missing_keys_default() {
        let Diagnosis::Assessed(a) = interpret(r#"{"nombre_comun":"Pothos"}"#) else {
            panic!("expected assessment");
        };
        assert_eq!(a.species, "");
        assert_eq!(a.health_status, "");
        assert_eq!(a.health_score, None);
        assert!(a.findings.is_empty());
        assert_eq!(a.missing_fields, vec!["species", "health_status", "diagnosis"]);
    }

    #[test]
    fn test_mistyped_fields_flagged() {
        let Diagnosis::Assessed(a) = interpret(
            r#"{"species":"Ficus","health_status":"Stressed","diagnosis":"Dry soil",
                "health_score":250,"water_frequency":"3","findings":"yellow leaves","care":{"light":"bright"}}"#,
        ) else {
            panic!("expected assessment");
        };
        assert_eq!(a.health_score, None);
        assert_eq!(a.water_frequency_days, Some(3));
        assert!(a.findings.is_empty());
        assert_eq!(a.care.get("light"), Some(&Value::String("bright".to_string())));
        assert_eq!(a.missing_fields, vec!["health_score", "findings"]);
    }

    #[test]
    fn test_null_error_is_ignored() {
        let Diagnosis::Assessed(a) =
            interpret(r#"{"error":null,"species":"Aloe","health_status":"Good","diagnosis":"Fine","health_score":82.4}"#)
        else {
            panic!("expected assessment");
        };
        assert_eq!(a.health_score, Some(82));
    }
}
