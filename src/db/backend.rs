//! Storage abstraction shared by the local SQLite file and the hosted
//! PostgREST tables.

use anyhow::Result;

use super::records::{DiagnosisEvent, NewDiagnosisEvent, NewPlant, PlantRecord};

/// Row-level operations on the `plants` and `plant_diagnoses` tables.
///
/// No operation spans both tables transactionally.
pub trait PlantStore: Send + Sync {
    /// Create tables if the backend owns its schema
    fn initialize(&self) -> Result<()>;

    /// Insert a plant; the store assigns id and timestamps
    fn insert_plant(&self, plant: &NewPlant) -> Result<PlantRecord>;

    fn get_plant(&self, id: &str) -> Result<Option<PlantRecord>>;

    /// All plants, newest first
    fn list_plants(&self) -> Result<Vec<PlantRecord>>;

    /// Overwrite the diagnosis columns of a plant with a newer diagnosis
    fn update_plant_state(&self, id: &str, state: &NewPlant) -> Result<PlantRecord>;

    /// Returns false when no such plant existed
    fn delete_plant(&self, id: &str) -> Result<bool>;

    fn insert_diagnosis(&self, event: &NewDiagnosisEvent) -> Result<DiagnosisEvent>;

    /// History of a plant, newest first
    fn list_diagnoses(&self, plant_id: &str) -> Result<Vec<DiagnosisEvent>>;
}
