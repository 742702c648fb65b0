//! Capture → upload + diagnose → persist, for one photo at a time.
//!
//! The drive upload and the model call run concurrently on blocking worker
//! threads and are joined before anything is written. A record is only
//! written once the upload has succeeded; if writing it fails, the uploaded
//! file is deleted again on a best-effort basis.

use anyhow::anyhow;
use chrono::Utc;
use std::sync::Arc;

use crate::auth::Session;
use crate::capture::CapturedImage;
use crate::config::CaptureConfig;
use crate::db::{DiagnosisEvent, NewPlant, PlantRecord, PlantStore};
use crate::drive::{RemoteFile, RemoteStore, UploadError, UploadKind};
use crate::error::PipelineError;
use crate::llm::{Diagnosis, LlmClient};

/// Result of a completed submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Plant as stored after this submission.
    pub plant: PlantRecord,
    /// History row; `None` if it could not be written.
    pub event: Option<DiagnosisEvent>,
    pub diagnosis: Diagnosis,
}

impl Submission {
    pub fn diagnosis_failed(&self) -> bool {
        self.diagnosis.is_failed()
    }
}

/// Both legs finished; nothing persisted yet.
struct Staged {
    file: RemoteFile,
    diagnosis: Diagnosis,
}

pub struct Coordinator {
    store: Arc<dyn RemoteStore>,
    llm: LlmClient,
    db: Arc<dyn PlantStore>,
    capture: CaptureConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        llm: LlmClient,
        db: Arc<dyn PlantStore>,
        capture: CaptureConfig,
    ) -> Self {
        Self {
            store,
            llm,
            db,
            capture,
        }
    }

    /// Register a new plant from a photo.
    pub async fn submit(&self, session: &Session, image: CapturedImage) -> Result<Submission, PipelineError> {
        let file_name = image.file_name.clone();
        let staged = self.stage(session, image, UploadKind::NewPlant).await?;

        let row = NewPlant::from_diagnosis(&staged.file.id, &staged.diagnosis);
        let event_row = row.clone();

        let plant = match self.run_db(move |db| db.insert_plant(&row)).await {
            Ok(plant) => plant,
            Err(e) => {
                tracing::error!(file = %file_name, error = %e, "Failed to insert plant");
                self.discard_upload(session, &staged.file).await;
                return Err(PipelineError::Persist(e.to_string()));
            }
        };

        let plant_id = plant.id.clone();
        let event = match self
            .run_db(move |db| db.insert_diagnosis(&event_row.to_event(&plant_id)))
            .await
        {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(plant_id = %plant.id, error = %e, "Plant saved without diagnosis history");
                None
            }
        };

        tracing::info!(
            plant_id = %plant.id,
            name = %plant.name,
            image_id = %plant.image_id,
            diagnosis_failed = plant.diagnosis_failed,
            "Plant registered"
        );

        Ok(Submission {
            plant,
            event,
            diagnosis: staged.diagnosis,
        })
    }

    /// Add a new diagnosis to an existing plant.
    ///
    /// A failed diagnosis is still recorded in the history but leaves the
    /// plant's current state untouched.
    pub async fn rediagnose(
        &self,
        session: &Session,
        plant_id: &str,
        image: CapturedImage,
    ) -> Result<Submission, PipelineError> {
        let id = plant_id.to_string();
        let existing = self
            .run_db(move |db| db.get_plant(&id))
            .await
            .map_err(|e| PipelineError::Persist(e.to_string()))?
            .ok_or_else(|| PipelineError::PlantNotFound(plant_id.to_string()))?;

        let staged = self.stage(session, image, UploadKind::Update).await?;
        let state = NewPlant::from_diagnosis(&staged.file.id, &staged.diagnosis);

        let event_row = state.to_event(&existing.id);
        let event = match self.run_db(move |db| db.insert_diagnosis(&event_row)).await {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(plant_id, error = %e, "Failed to record diagnosis");
                self.discard_upload(session, &staged.file).await;
                return Err(PipelineError::Persist(e.to_string()));
            }
        };

        let plant = if staged.diagnosis.is_failed() {
            existing
        } else {
            let id = existing.id.clone();
            self.run_db(move |db| db.update_plant_state(&id, &state))
                .await
                .map_err(|e| {
                    tracing::error!(plant_id, error = %e, "Diagnosis recorded but plant state not updated");
                    PipelineError::Persist(e.to_string())
                })?
        };

        tracing::info!(
            plant_id,
            event_id = %event.id,
            diagnosis_failed = event.diagnosis_failed,
            "Plant re-diagnosed"
        );

        Ok(Submission {
            plant,
            event: Some(event),
            diagnosis: staged.diagnosis,
        })
    }

    /// Run the upload and the diagnosis concurrently and wait for both.
    async fn stage(
        &self,
        session: &Session,
        image: CapturedImage,
        kind: UploadKind,
    ) -> Result<Staged, PipelineError> {
        if !session.is_usable_at(Utc::now()) {
            return Err(PipelineError::Reauthenticate);
        }
        if image.size() as u64 > self.capture.max_bytes {
            return Err(PipelineError::InvalidImage(format!(
                "{} is {} bytes, limit is {}",
                image.file_name,
                image.size(),
                self.capture.max_bytes
            )));
        }

        let image = Arc::new(image);

        let upload = {
            let store = Arc::clone(&self.store);
            let image = Arc::clone(&image);
            let token = session.provider_token.clone();
            tokio::task::spawn_blocking(move || store.upload(&image, kind, &token))
        };

        let analysis = {
            let llm = self.llm.clone();
            let image = Arc::clone(&image);
            let max_dimension = self.capture.max_dimension;
            tokio::task::spawn_blocking(move || match image.to_inline(max_dimension) {
                Ok(inline) => llm.diagnose(&inline),
                Err(e) => Diagnosis::failed(format!("could not prepare image: {}", e)),
            })
        };

        let (upload, analysis) = tokio::join!(upload, analysis);

        let diagnosis = analysis
            .unwrap_or_else(|e| Diagnosis::failed(format!("inference task aborted: {}", e)));

        let file = match upload {
            Ok(Ok(file)) => file,
            Ok(Err(UploadError::Unauthorized)) => {
                tracing::warn!(file = %image.file_name, "Drive rejected the session token");
                return Err(PipelineError::Reauthenticate);
            }
            Ok(Err(UploadError::Other(e))) => {
                tracing::error!(file = %image.file_name, error = %e, "Upload failed, discarding diagnosis");
                return Err(PipelineError::Storage(e.to_string()));
            }
            Err(e) => return Err(PipelineError::Storage(format!("upload task aborted: {}", e))),
        };

        Ok(Staged { file, diagnosis })
    }

    /// Best-effort removal of a file whose record could not be written.
    async fn discard_upload(&self, session: &Session, file: &RemoteFile) {
        let store = Arc::clone(&self.store);
        let token = session.provider_token.clone();
        let file_id = file.id.clone();

        let result = tokio::task::spawn_blocking(move || store.delete(&file_id, &token))
            .await
            .map_err(|e| anyhow!("delete task aborted: {}", e))
            .and_then(|r| r);

        match result {
            Ok(()) => tracing::info!(image_id = %file.id, "Removed orphaned upload"),
            Err(e) => tracing::warn!(image_id = %file.id, error = %e, "Orphaned upload left on drive"),
        }
    }

    async fn run_db<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&dyn PlantStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| anyhow!("store task aborted: {}", e))?
    }
}
