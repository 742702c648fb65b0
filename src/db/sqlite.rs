//! SQLite backend implementation.

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::backend::PlantStore;
use super::records::{DiagnosisEvent, NewDiagnosisEvent, NewPlant, PlantRecord};
use super::schema::SCHEMA;

const PLANT_COLUMNS: &str = "id, name, scientific_name, family, health_status, health_score, \
     diagnosis, findings, care, water_frequency_days, image_id, diagnosis_failed, needs_review, \
     created_at, updated_at";

const DIAGNOSIS_COLUMNS: &str = "id, plant_id, image_id, health_status, health_score, diagnosis, \
     findings, care, diagnosis_failed, created_at";

pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }
}

impl PlantStore for SqliteDb {
    fn initialize(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn insert_plant(&self, plant: &NewPlant) -> Result<PlantRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO plants (
                id, name, scientific_name, family, health_status, health_score,
                diagnosis, findings, care, water_frequency_days, image_id,
                diagnosis_failed, needs_review, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                id,
                plant.name,
                plant.scientific_name,
                plant.family,
                plant.health_status,
                plant.health_score,
                plant.diagnosis,
                Value::Object(plant.findings.clone()).to_string(),
                Value::Object(plant.care.clone()).to_string(),
                plant.water_frequency_days,
                plant.image_id,
                plant.diagnosis_failed,
                plant.needs_review,
                now,
                now,
            ],
        )?;
        query_plant(&conn, &id)?.ok_or_else(|| anyhow!("Inserted plant {} not found", id))
    }

    fn get_plant(&self, id: &str) -> Result<Option<PlantRecord>> {
        let conn = self.conn()?;
        query_plant(&conn, id)
    }

    fn list_plants(&self) -> Result<Vec<PlantRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM plants ORDER BY created_at DESC, rowid DESC",
            PLANT_COLUMNS
        ))?;
        let plants = stmt
            .query_map([], plant_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(plants)
    }

    fn update_plant_state(&self, id: &str, state: &NewPlant) -> Result<PlantRecord> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE plants
            SET name = ?, scientific_name = ?, family = ?, health_status = ?, health_score = ?,
                diagnosis = ?, findings = ?, care = ?, water_frequency_days = ?, image_id = ?,
                diagnosis_failed = ?, needs_review = ?, updated_at = ?
            WHERE id = ?
            "#,
            rusqlite::params![
                state.name,
                state.scientific_name,
                state.family,
                state.health_status,
                state.health_score,
                state.diagnosis,
                Value::Object(state.findings.clone()).to_string(),
                Value::Object(state.care.clone()).to_string(),
                state.water_frequency_days,
                state.image_id,
                state.diagnosis_failed,
                state.needs_review,
                timestamp(Utc::now()),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("Plant {} not found", id));
        }
        query_plant(&conn, id)?.ok_or_else(|| anyhow!("Plant {} not found", id))
    }

    fn delete_plant(&self, id: &str) -> Result<bool> {
        let changed = self.conn()?.execute("DELETE FROM plants WHERE id = ?", [id])?;
        Ok(changed > 0)
    }

    fn insert_diagnosis(&self, event: &NewDiagnosisEvent) -> Result<DiagnosisEvent> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO plant_diagnoses (
                id, plant_id, image_id, health_status, health_score, diagnosis,
                findings, care, diagnosis_failed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                id,
                event.plant_id,
                event.image_id,
                event.health_status,
                event.health_score,
                event.diagnosis,
                Value::Object(event.findings.clone()).to_string(),
                Value::Object(event.care.clone()).to_string(),
                event.diagnosis_failed,
                timestamp(Utc::now()),
            ],
        )?;
        let event = conn.query_row(
            &format!("SELECT {} FROM plant_diagnoses WHERE id = ?", DIAGNOSIS_COLUMNS),
            [&id],
            diagnosis_from_row,
        )?;
        Ok(event)
    }

    fn list_diagnoses(&self, plant_id: &str) -> Result<Vec<DiagnosisEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM plant_diagnoses WHERE plant_id = ? ORDER BY created_at DESC, rowid DESC",
            DIAGNOSIS_COLUMNS
        ))?;
        let events = stmt
            .query_map([plant_id], diagnosis_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

fn query_plant(conn: &Connection, id: &str) -> Result<Option<PlantRecord>> {
    let plant = conn
        .query_row(
            &format!("SELECT {} FROM plants WHERE id = ?", PLANT_COLUMNS),
            [id],
            plant_from_row,
        )
        .optional()?;
    Ok(plant)
}

fn plant_from_row(row: &Row<'_>) -> rusqlite::Result<PlantRecord> {
    Ok(PlantRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        scientific_name: row.get(2)?,
        family: row.get(3)?,
        health_status: row.get(4)?,
        health_score: row.get(5)?,
        diagnosis: row.get(6)?,
        findings: json_object(row, 7)?,
        care: json_object(row, 8)?,
        water_frequency_days: row.get(9)?,
        image_id: row.get(10)?,
        diagnosis_failed: row.get(11)?,
        needs_review: row.get(12)?,
        created_at: parse_timestamp(row, 13)?,
        updated_at: parse_timestamp(row, 14)?,
    })
}

fn diagnosis_from_row(row: &Row<'_>) -> rusqlite::Result<DiagnosisEvent> {
    Ok(DiagnosisEvent {
        id: row.get(0)?,
        plant_id: row.get(1)?,
        image_id: row.get(2)?,
        health_status: row.get(3)?,
        health_score: row.get(4)?,
        diagnosis: row.get(5)?,
        findings: json_object(row, 6)?,
        care: json_object(row, 7)?,
        diagnosis_failed: row.get(8)?,
        created_at: parse_timestamp(row, 9)?,
    })
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Corrupt JSON columns read back as empty objects rather than failing the row.
fn json_object(row: &Row<'_>, idx: usize) -> rusqlite::Result<Map<String, Value>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text
        .and_then(|t| serde_json::from_str::<Value>(&t).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default())
}
