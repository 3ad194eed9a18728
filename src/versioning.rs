//! Append-only requirement version history.
//!
//! Each journey owns a directory `{digest16}__{journey}` under the
//! versions root. Inside, `timeline.jsonl` gets one JSON line per
//! ingested version (never rewritten), and each version's extracted
//! text is kept alongside as `{version_id}.txt` so two versions can be
//! diffed later without re-extracting the source document.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::models::Version;
use crate::storage::short_digest;

pub struct VersioningStore {
    root: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct VersionDiff {
    pub journey: String,
    pub from_version: String,
    pub to_version: String,
    pub added_lines: Vec<String>,
    pub removed_lines: Vec<String>,
    pub unchanged_count: usize,
}

impl VersioningStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Records a new version of a journey's requirements and returns the
    /// full entry. The version id is the UTC ingest instant plus the
    /// source type, so ids sort chronologically within a journey.
    pub fn record(
        &self,
        journey: &str,
        source_type: &str,
        text: &str,
        summary: &str,
        document_uri: &str,
        effective_date: Option<String>,
    ) -> Result<Version> {
        let now = Utc::now();
        let version_id = format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), source_type);
        let entry = Version {
            version: version_id.clone(),
            journey: journey.to_string(),
            source_type: source_type.to_string(),
            document_uri: document_uri.to_string(),
            summary: summary.to_string(),
            effective_date,
            created_at: now.to_rfc3339(),
        };

        let dir = self.journey_dir(journey);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating versions directory {}", dir.display()))?;
        fs::write(dir.join(format!("{version_id}.txt")), text)
            .with_context(|| format!("writing version text for {version_id}"))?;

        let mut timeline = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("timeline.jsonl"))
            .with_context(|| format!("opening timeline for journey '{journey}'"))?;
        let line = serde_json::to_string(&entry)?;
        writeln!(timeline, "{line}").context("appending timeline entry")?;
        Ok(entry)
    }

    /// All versions of a journey in the order they were recorded.
    /// Unknown journey means an empty timeline, not an error.
    pub fn timeline(&self, journey: &str) -> Result<Vec<Version>> {
        let path = self.journey_dir(journey).join("timeline.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading timeline {}", path.display()))?;
        let mut versions = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            versions.push(serde_json::from_str(line).context("parsing timeline entry")?);
        }
        Ok(versions)
    }

    pub fn latest(&self, journey: &str) -> Result<Option<Version>> {
        Ok(self.timeline(journey)?.pop())
    }

    /// Stored extracted text of one version.
    pub fn version_text(&self, journey: &str, version_id: &str) -> Result<String> {
        let path = self.journey_dir(journey).join(format!("{version_id}.txt"));
        if !path.exists() {
            bail!("version '{version_id}' not found for journey '{journey}'");
        }
        fs::read_to_string(&path)
            .with_context(|| format!("reading version text {}", path.display()))
    }

    /// Line-set diff between two recorded versions: which lines appear
    /// only in the newer text, which only in the older. Line order is
    /// preserved from the source texts.
    pub fn diff(&self, journey: &str, from: &str, to: &str) -> Result<VersionDiff> {
        let old_text = self.version_text(journey, from)?;
        let new_text = self.version_text(journey, to)?;

        let old_lines: BTreeSet<&str> =
            old_text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let new_lines: BTreeSet<&str> =
            new_text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        let added_lines = new_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !old_lines.contains(l))
            .map(str::to_string)
            .collect();
        let removed_lines = old_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !new_lines.contains(l))
            .map(str::to_string)
            .collect();
        let unchanged_count = old_lines.intersection(&new_lines).count();

        Ok(VersionDiff {
            journey: journey.to_string(),
            from_version: from.to_string(),
            to_version: to.to_string(),
            added_lines,
            removed_lines,
            unchanged_count,
        })
    }

    // Hash prefix keeps the path stable for journey names the filesystem
    // would reject.
    fn journey_dir(&self, journey: &str) -> PathBuf {
        let digest = short_digest(journey.as_bytes());
        let safe: String = journey
            .chars()
            .map(|c| if c.is_alphanumeric() || "-_".contains(c) { c } else { '_' })
            .collect();
        self.root.join(format!("{digest}__{safe}"))
    }
}
