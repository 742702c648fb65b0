use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt::Write as _;

use crate::db::{DiagnosisEvent, PlantRecord, PlantStore};
use crate::drive::{image_url, DEFAULT_THUMBNAIL_SIZE};

/// Coarse health classification shown next to each plant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthBand {
    Critical,
    Fair,
    Good,
    Unknown,
}

impl HealthBand {
    pub fn from_score(score: Option<u8>) -> Self {
        match score {
            None => HealthBand::Unknown,
            Some(s) if s < 35 => HealthBand::Critical,
            Some(s) if s < 75 => HealthBand::Fair,
            Some(_) => HealthBand::Good,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthBand::Critical => "critical",
            HealthBand::Fair => "fair",
            HealthBand::Good => "good",
            HealthBand::Unknown => "unknown",
        }
    }
}

/// One row of the gallery
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub id: String,
    pub name: String,
    pub health_status: String,
    pub band: HealthBand,
    pub thumbnail_url: String,
    pub diagnosis_failed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&PlantRecord> for GalleryEntry {
    fn from(plant: &PlantRecord) -> Self {
        Self {
            id: plant.id.clone(),
            name: plant.name.clone(),
            health_status: plant.health_status.clone(),
            band: HealthBand::from_score(plant.health_score),
            thumbnail_url: image_url(&plant.image_id, DEFAULT_THUMBNAIL_SIZE),
            diagnosis_failed: plant.diagnosis_failed,
            created_at: plant.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub image_url: String,
    pub health_status: String,
    pub band: HealthBand,
    pub diagnosis: String,
    pub diagnosis_failed: bool,
    pub recorded_at: DateTime<Utc>,
}

/// A plant with its diagnosis history, newest first
#[derive(Debug, Clone)]
pub struct PlantDetail {
    pub plant: PlantRecord,
    pub timeline: Vec<TimelineEntry>,
}

/// Every stored plant, newest first.
pub fn load_gallery(db: &dyn PlantStore) -> Result<Vec<GalleryEntry>> {
    Ok(db.list_plants()?.iter().map(GalleryEntry::from).collect())
}

pub fn load_detail(db: &dyn PlantStore, plant_id: &str) -> Result<Option<PlantDetail>> {
    let Some(plant) = db.get_plant(plant_id)? else {
        return Ok(None);
    };
    let events = db.list_diagnoses(plant_id)?;
    let timeline = build_timeline(&plant, &events);
    Ok(Some(PlantDetail { plant, timeline }))
}

/// Events without an image are dropped. A plant with no usable history shows
/// its own current state as the only entry.
pub fn build_timeline(plant: &PlantRecord, events: &[DiagnosisEvent]) -> Vec<TimelineEntry> {
    let mut timeline: Vec<TimelineEntry> = events
        .iter()
        .filter(|e| !e.image_id.is_empty())
        .map(|e| TimelineEntry {
            image_url: image_url(&e.image_id, DEFAULT_THUMBNAIL_SIZE),
            health_status: e.health_status.clone(),
            band: HealthBand::from_score(e.health_score),
            diagnosis: e.diagnosis.clone(),
            diagnosis_failed: e.diagnosis_failed,
            recorded_at: e.created_at,
        })
        .collect();

    if timeline.is_empty() {
        timeline.push(TimelineEntry {
            image_url: image_url(&plant.image_id, DEFAULT_THUMBNAIL_SIZE),
            health_status: plant.health_status.clone(),
            band: HealthBand::from_score(plant.health_score),
            diagnosis: plant.diagnosis.clone(),
            diagnosis_failed: plant.diagnosis_failed,
            recorded_at: plant.created_at,
        });
    }

    timeline.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
    timeline
}

pub fn render_gallery(entries: &[GalleryEntry]) -> String {
    if entries.is_empty() {
        return "No plants yet. Add one with `plantcare submit IMAGE`.\n".to_string();
    }

    let mut out = String::new();
    for entry in entries {
        let status = if entry.diagnosis_failed {
            "diagnosis failed".to_string()
        } else {
            format!("{} ({})", entry.health_status, entry.band.label())
        };
        let _ = writeln!(
            out,
            "{}  {}  {}  {}\n    {}",
            entry.created_at.format("%Y-%m-%d"),
            entry.id,
            entry.name,
            status,
            entry.thumbnail_url
        );
    }
    out
}

pub fn render_detail(detail: &PlantDetail) -> String {
    let plant = &detail.plant;
    let mut out = String::new();

    let _ = writeln!(out, "{}", plant.name);
    if let Some(scientific) = &plant.scientific_name {
        let _ = writeln!(out, "  Scientific name: {}", scientific);
    }
    if let Some(family) = &plant.family {
        let _ = writeln!(out, "  Family: {}", family);
    }
    let score = plant
        .health_score
        .map(|s| format!("{}/100, ", s))
        .unwrap_or_default();
    let _ = writeln!(
        out,
        "  Health: {} ({}{})",
        plant.health_status,
        score,
        HealthBand::from_score(plant.health_score).label()
    );
    if let Some(days) = plant.water_frequency_days {
        let _ = writeln!(out, "  Water every {} days", days);
    }
    let _ = writeln!(out, "  Diagnosis: {}", plant.diagnosis);
    if plant.needs_review {
        let _ = writeln!(out, "  (some fields of this diagnosis were missing or malformed)");
    }

    write_section(&mut out, "Findings", &plant.findings);
    write_section(&mut out, "Care", &plant.care);

    let _ = writeln!(out, "\nHistory:");
    for entry in &detail.timeline {
        let state = if entry.diagnosis_failed {
            "diagnosis failed".to_string()
        } else {
            format!("{} ({})", entry.health_status, entry.band.label())
        };
        let _ = writeln!(
            out,
            "  {}  {}\n    {}\n    {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M"),
            state,
            entry.diagnosis,
            entry.image_url
        );
    }

    out
}

fn write_section(out: &mut String, title: &str, map: &Map<String, Value>) {
    if map.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{}:", title);
    for (key, value) in map {
        let _ = writeln!(out, "  {}: {}", key.replace('_', " "), display_value(value));
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
