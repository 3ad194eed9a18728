//! Flat-file persistence: raw document bytes and journey definitions.
//!
//! Uploaded documents are kept content-addressed under the object root,
//! `{YYYY/MM/DD}/{digest16}__{filename}`, so re-ingesting identical
//! bytes lands on the same path. Journey definitions live in a single
//! JSON file, seeded from config on first load.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::JourneyConfig;

#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub path: PathBuf,
    pub digest: String,
}

pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes document bytes under a date-partitioned, content-addressed
    /// path and returns where they landed.
    pub fn store(&self, bytes: &[u8], filename: &str) -> Result<StoredObject> {
        let digest = short_digest(bytes);
        let date = Utc::now().format("%Y/%m/%d").to_string();
        let dir = self.root.join(&date);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating object directory {}", dir.display()))?;
        let path = dir.join(format!("{digest}__{}", sanitize_filename(filename)));
        fs::write(&path, bytes)
            .with_context(|| format!("writing object {}", path.display()))?;
        Ok(StoredObject { path, digest })
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("reading object {}", path.display()))
    }
}

/// First 16 hex chars of the SHA-256 of `bytes`.
pub fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

// Path separators and parent refs in an uploaded filename must not
// escape the object root.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || ".-_ ".contains(c) { c } else { '_' })
        .collect();
    if cleaned.trim_matches(['.', ' ']).is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journey {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Journey definitions in one JSON file. Missing file means the config
/// seed list; every mutation rewrites the whole file.
pub struct JourneyStore {
    path: PathBuf,
    seed: Vec<JourneyConfig>,
}

impl JourneyStore {
    pub fn new(path: impl Into<PathBuf>, seed: &[JourneyConfig]) -> Self {
        Self {
            path: path.into(),
            seed: seed.to_vec(),
        }
    }

    pub fn list(&self) -> Result<Vec<Journey>> {
        if !self.path.exists() {
            return Ok(self
                .seed
                .iter()
                .map(|j| Journey {
                    name: j.name.clone(),
                    description: j.description.clone(),
                })
                .collect());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading journeys file {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing journeys file {}", self.path.display()))
    }

    /// Adds or updates a journey by name.
    pub fn upsert(&self, journey: Journey) -> Result<()> {
        let mut journeys = self.list()?;
        match journeys.iter_mut().find(|j| j.name == journey.name) {
            Some(existing) => *existing = journey,
            None => journeys.push(journey),
        }
        self.save(&journeys)
    }

    pub fn known(&self, name: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|j| j.name == name))
    }

    fn save(&self, journeys: &[Journey]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(journeys)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing journeys file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn store_is_content_addressed() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path());
        let a = store.store(b"same bytes", "fsd.txt").unwrap();
        let b = store.store(b"same bytes", "fsd.txt").unwrap();
        assert_eq!(a.path, b.path);
        assert_eq!(a.digest.len(), 16);
        assert_eq!(store.read(&a.path).unwrap(), b"same bytes");
    }

    #[test]
    fn different_content_different_path() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path());
        let a = store.store(b"one", "doc.txt").unwrap();
        let b = store.store(b"two", "doc.txt").unwrap();
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn filename_cannot_escape_root() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path());
        let stored = store.store(b"x", "../../etc/passwd").unwrap();
        assert!(stored.path.starts_with(dir.path()));
        assert!(stored.path.to_string_lossy().ends_with("passwd"));
    }

    #[test]
    fn journeys_seeded_until_first_write() {
        let dir = TempDir::new().unwrap();
        let seed = vec![JourneyConfig {
            name: "onboarding".to_string(),
            description: "Customer onboarding".to_string(),
        }];
        let store = JourneyStore::new(dir.path().join("journeys.json"), &seed);
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.known("onboarding").unwrap());

        store
            .upsert(Journey {
                name: "payments".to_string(),
                description: String::new(),
            })
            .unwrap();
        let names: Vec<String> = store.list().unwrap().into_iter().map(|j| j.name).collect();
        assert_eq!(names, vec!["onboarding", "payments"]);
    }

    #[test]
    fn upsert_replaces_by_name() {
        let dir = TempDir::new().unwrap();
        let store = JourneyStore::new(dir.path().join("journeys.json"), &[]);
        store
            .upsert(Journey {
                name: "loans".to_string(),
                description: "old".to_string(),
            })
            .unwrap();
        store
            .upsert(Journey {
                name: "loans".to_string(),
                description: "new".to_string(),
            })
            .unwrap();
        let journeys = store.list().unwrap();
        assert_eq!(journeys.len(), 1);
        assert_eq!(journeys[0].description, "new");
    }
}
