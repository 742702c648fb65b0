//! Hosted PostgREST backend (the REST interface Supabase exposes for its
//! Postgres tables).
//!
//! The tables are expected to exist already with the columns of
//! [`PlantRecord`] and [`DiagnosisEvent`]; ids and timestamps are column
//! defaults on the server.

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use super::backend::PlantStore;
use super::records::{DiagnosisEvent, NewDiagnosisEvent, NewPlant, PlantRecord};

const PLANTS: &str = "plants";
const DIAGNOSES: &str = "plant_diagnoses";

pub struct RestDb {
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl RestDb {
    /// `base_url` is the project URL; `/rest/v1` is appended.
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: format!("{}/rest/v1", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    fn request(&self, method: &str, table: &str) -> ureq::Request {
        ureq::AgentBuilder::new()
            .timeout(self.timeout)
            .build()
            .request(method, &format!("{}/{}", self.base_url, table))
            .set("apikey", &self.api_key)
            .set("Authorization", &format!("Bearer {}", self.api_key))
    }

    fn send<T: DeserializeOwned>(&self, request: ureq::Request, body: Option<&impl Serialize>) -> Result<T> {
        let result = match body {
            Some(body) => request
                .set("Content-Type", "application/json")
                .set("Prefer", "return=representation")
                .send_json(body),
            None => request.call(),
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(anyhow!("Store returned HTTP {}: {}", code, detail.trim()));
            }
            Err(e) => return Err(anyhow!("Store request failed: {}", e)),
        };

        response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse store response: {}", e))
    }

    fn single<T>(rows: Vec<T>, what: &str) -> Result<T> {
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("Store returned no {} row", what))
    }
}

impl PlantStore for RestDb {
    fn initialize(&self) -> Result<()> {
        // Schema is managed on the hosted side; just check the table answers.
        let _: Vec<serde_json::Value> = self.send(
            self.request("GET", PLANTS).query("select", "id").query("limit", "1"),
            None::<&()>,
        )?;
        Ok(())
    }

    fn insert_plant(&self, plant: &NewPlant) -> Result<PlantRecord> {
        let rows: Vec<PlantRecord> = self.send(self.request("POST", PLANTS), Some(&[plant]))?;
        Self::single(rows, "plant")
    }

    fn get_plant(&self, id: &str) -> Result<Option<PlantRecord>> {
        let rows: Vec<PlantRecord> = self.send(
            self.request("GET", PLANTS)
                .query("select", "*")
                .query("id", &format!("eq.{}", id)),
            None::<&()>,
        )?;
        Ok(rows.into_iter().next())
    }

    fn list_plants(&self) -> Result<Vec<PlantRecord>> {
        self.send(
            self.request("GET", PLANTS)
                .query("select", "*")
                .query("order", "created_at.desc"),
            None::<&()>,
        )
    }

    fn update_plant_state(&self, id: &str, state: &NewPlant) -> Result<PlantRecord> {
        let mut payload = serde_json::to_value(state)?;
        payload["updated_at"] = json!(chrono::Utc::now());
        let rows: Vec<PlantRecord> = self.send(
            self.request("PATCH", PLANTS).query("id", &format!("eq.{}", id)),
            Some(&payload),
        )?;
        Self::single(rows, "plant").map_err(|_| anyhow!("Plant {} not found", id))
    }

    fn delete_plant(&self, id: &str) -> Result<bool> {
        let rows: Vec<serde_json::Value> = self.send(
            self.request("DELETE", PLANTS)
                .query("id", &format!("eq.{}", id))
                .set("Prefer", "return=representation"),
            None::<&()>,
        )?;
        Ok(!rows.is_empty())
    }

    fn insert_diagnosis(&self, event: &NewDiagnosisEvent) -> Result<DiagnosisEvent> {
        let rows: Vec<DiagnosisEvent> = self.send(self.request("POST", DIAGNOSES), Some(&[event]))?;
        Self::single(rows, "diagnosis")
    }

    fn list_diagnoses(&self, plant_id: &str) -> Result<Vec<DiagnosisEvent>> {
        self.send(
            self.request("GET", DIAGNOSES)
                .query("select", "*")
                .query("plant_id", &format!("eq.{}", plant_id))
                .query("order", "created_at.desc"),
            None::<&()>,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PLANT_ROW: &str = r#"{
        "id": "6f1c7e2a-1111-4a1e-9c1e-000000000001",
        "name": "Monstera",
        "scientific_name": "Monstera deliciosa",
        "family": null,
        "health_status": "Healthy",
        "health_score": 90,
        "diagnosis": "Looks great",
        "findings": {},
        "care": {"light": "bright"},
        "water_frequency_days": 7,
        "image_id": "abc123",
        "diagnosis_failed": false,
        "needs_review": false,
        "created_at": "2025-03-01T10:00:00.123456+00:00",
        "updated_at": "2025-03-01T10:00:00.123456+00:00"
    }"#;

    #[test]
    fn test_insert_plant_returns_representation() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/rest/v1/plants")
            .match_header("apikey", "anon")
            .match_header("authorization", "Bearer anon")
            .match_header("prefer", "return=representation")
            .match_body(Matcher::PartialJson(json!([{"name": "Monstera", "image_id": "abc123"}])))
            .with_status(201)
            .with_body(format!("[{}]", PLANT_ROW))
            .create();

        let mut plant = NewPlant::placeholder("abc123");
        plant.name = "Monstera".to_string();

        let db = RestDb::new(&format!("{}/", server.url()), "anon");
        let record = db.insert_plant(&plant).unwrap();
        mock.assert();
        assert_eq!(record.name, "Monstera");
        assert_eq!(record.water_frequency_days, Some(7));
        assert_eq!(record.care["light"], "bright");
    }

    #[test]
    fn test_list_plants_ordered() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/rest/v1/plants")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "*".into()),
                Matcher::UrlEncoded("order".into(), "created_at.desc".into()),
            ]))
            .with_status(200)
            .with_body(format!("[{}]", PLANT_ROW))
            .create();

        let plants = RestDb::new(&server.url(), "anon").list_plants().unwrap();
        mock.assert();
        assert_eq!(plants.len(), 1);
    }

    #[test]
    fn test_get_missing_plant() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/rest/v1/plants")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.nope".into()))
            .with_status(200)
            .with_body("[]")
            .create();

        assert!(RestDb::new(&server.url(), "anon").get_plant("nope").unwrap().is_none());
    }

    #[test]
    fn test_list_diagnoses_filters_by_plant() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/rest/v1/plant_diagnoses")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("plant_id".into(), "eq.p1".into()),
                Matcher::UrlEncoded("order".into(), "created_at.desc".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[{"id":"d1","plant_id":"p1","image_id":"img","health_status":"Healthy",
                    "health_score":null,"diagnosis":"ok","findings":{},"care":{},
                    "diagnosis_failed":false,"created_at":"2025-03-02T08:30:00+00:00"}]"#,
            )
            .create();

        let events = RestDb::new(&server.url(), "anon").list_diagnoses("p1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plant_id, "p1");
    }

    #[test]
    fn test_http_error_surfaces() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/rest/v1/plant_diagnoses")
            .with_status(409)
            .with_body(r#"{"code":"23503","message":"violates foreign key constraint"}"#)
            .create();

        let err = RestDb::new(&server.url(), "anon")
            .insert_diagnosis(&NewPlant::placeholder("img").to_event("p1"))
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 409"));
    }
}
