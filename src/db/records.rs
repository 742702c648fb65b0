//! Row types for plants and their diagnosis history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::{Diagnosis, PlantAssessment};

pub const PLACEHOLDER_NAME: &str = "Undiagnosed plant";
pub const PLACEHOLDER_STATUS: &str = "Unknown";
pub const PLACEHOLDER_DIAGNOSIS: &str = "Diagnosis pending";
pub const UNIDENTIFIED_NAME: &str = "Unidentified plant";

/// A persisted plant with its current diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub scientific_name: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    pub health_status: String,
    #[serde(default)]
    pub health_score: Option<u8>,
    pub diagnosis: String,
    #[serde(default)]
    pub findings: Map<String, Value>,
    #[serde(default)]
    pub care: Map<String, Value>,
    #[serde(default)]
    pub water_frequency_days: Option<u32>,
    pub image_id: String,
    #[serde(default)]
    pub diagnosis_failed: bool,
    #[serde(default)]
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The diagnosis columns shared by plants and history rows; also the insert
/// payload for a new plant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPlant {
    pub name: String,
    pub scientific_name: Option<String>,
    pub family: Option<String>,
    pub health_status: String,
    pub health_score: Option<u8>,
    pub diagnosis: String,
    pub findings: Map<String, Value>,
    pub care: Map<String, Value>,
    pub water_frequency_days: Option<u32>,
    pub image_id: String,
    pub diagnosis_failed: bool,
    pub needs_review: bool,
}

impl NewPlant {
    /// Map a diagnosis onto the stored record shape. A failed diagnosis yields
    /// the placeholder record.
    pub fn from_diagnosis(image_id: &str, diagnosis: &Diagnosis) -> Self {
        match diagnosis {
            Diagnosis::Assessed(a) => Self::from_assessment(image_id, a),
            Diagnosis::Failed { .. } => Self::placeholder(image_id),
        }
    }

    pub fn placeholder(image_id: &str) -> Self {
        Self {
            name: PLACEHOLDER_NAME.to_string(),
            scientific_name: None,
            family: None,
            health_status: PLACEHOLDER_STATUS.to_string(),
            health_score: None,
            diagnosis: PLACEHOLDER_DIAGNOSIS.to_string(),
            findings: Map::new(),
            care: Map::new(),
            water_frequency_days: None,
            image_id: image_id.to_string(),
            diagnosis_failed: true,
            needs_review: false,
        }
    }

    fn from_assessment(image_id: &str, a: &PlantAssessment) -> Self {
        let name = if a.species.is_empty() {
            UNIDENTIFIED_NAME.to_string()
        } else {
            a.species.clone()
        };
        Self {
            name,
            scientific_name: a.scientific_name.clone(),
            family: a.family.clone(),
            health_status: a.health_status.clone(),
            health_score: a.health_score,
            diagnosis: a.diagnosis.clone(),
            findings: a.findings.clone(),
            care: a.care.clone(),
            water_frequency_days: a.water_frequency_days,
            image_id: image_id.to_string(),
            diagnosis_failed: false,
            needs_review: !a.missing_fields.is_empty(),
        }
    }

    /// History row payload for `plant_id`.
    pub fn to_event(&self, plant_id: &str) -> NewDiagnosisEvent {
        NewDiagnosisEvent {
            plant_id: plant_id.to_string(),
            image_id: self.image_id.clone(),
            health_status: self.health_status.clone(),
            health_score: self.health_score,
            diagnosis: self.diagnosis.clone(),
            findings: self.findings.clone(),
            care: self.care.clone(),
            diagnosis_failed: self.diagnosis_failed,
        }
    }
}

/// One historical diagnosis of a plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisEvent {
    pub id: String,
    pub plant_id: String,
    pub image_id: String,
    pub health_status: String,
    #[serde(default)]
    pub health_score: Option<u8>,
    pub diagnosis: String,
    #[serde(default)]
    pub findings: Map<String, Value>,
    #[serde(default)]
    pub care: Map<String, Value>,
    #[serde(default)]
    pub diagnosis_failed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDiagnosisEvent {
    pub plant_id: String,
    pub image_id: String,
    pub health_status: String,
    pub health_score: Option<u8>,
    pub diagnosis: String,
    pub findings: Map<String, Value>,
    pub care: Map<String, Value>,
    pub diagnosis_failed: bool,
}
