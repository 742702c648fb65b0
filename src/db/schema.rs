pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Plants: current state of each tracked plant
CREATE TABLE IF NOT EXISTS plants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    scientific_name TEXT,
    family TEXT,
    health_status TEXT NOT NULL,
    health_score INTEGER,              -- 1-100, NULL when unknown
    diagnosis TEXT NOT NULL,
    findings TEXT NOT NULL DEFAULT '{}',  -- JSON object
    care TEXT NOT NULL DEFAULT '{}',      -- JSON object
    water_frequency_days INTEGER,
    image_id TEXT NOT NULL,            -- drive file id
    diagnosis_failed INTEGER NOT NULL DEFAULT 0,
    needs_review INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_plants_created_at ON plants(created_at);

-- Diagnosis history, one row per photo analysed for a plant
CREATE TABLE IF NOT EXISTS plant_diagnoses (
    id TEXT PRIMARY KEY,
    plant_id TEXT NOT NULL,
    image_id TEXT NOT NULL,
    health_status TEXT NOT NULL,
    health_score INTEGER,
    diagnosis TEXT NOT NULL,
    findings TEXT NOT NULL DEFAULT '{}',
    care TEXT NOT NULL DEFAULT '{}',
    diagnosis_failed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (plant_id) REFERENCES plants(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_plant_diagnoses_plant ON plant_diagnoses(plant_id, created_at);
"#;
