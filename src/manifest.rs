//! Reader for the extraction manifest the scraper writes next to its output
//! (`{data_dir}/{source}/manifest.json`). The manifest is extractor-owned
//! state; the pipeline only reads it to report staleness. The loader itself
//! never consults it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionManifest {
    pub source: String,
    #[serde(default)]
    pub seasons: BTreeMap<String, SeasonExtraction>,
    pub last_run: DateTime<Utc>,
    pub version: i64,
}

/// Per-entity extraction records keyed by entity name (teams, players, …).
pub type SeasonExtraction = BTreeMap<String, EntityExtraction>;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityExtraction {
    pub extracted: bool,
    pub count: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

impl ExtractionManifest {
    /// Entities recorded as extracted across all seasons.
    pub fn extracted_count(&self) -> usize {
        self.seasons
            .values()
            .flat_map(|entities| entities.values())
            .filter(|e| e.extracted)
            .count()
    }
}

/// Read a league's manifest. `Ok(None)` when the extractor has not produced
/// one yet; an unparsable manifest is an error (it means the extractor and
/// pipeline disagree on the format).
pub fn read_manifest(data_dir: &Path, source: &str) -> Result<Option<ExtractionManifest>> {
    let path = data_dir.join(source).join("manifest.json");
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let manifest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_extractor_manifest() {
        let raw = r#"{
            "source": "pll",
            "seasons": {
                "2024": {
                    "teams":   {"extracted": true,  "count": 8,   "timestamp": "2024-09-01T04:12:00Z", "durationMs": 1400},
                    "players": {"extracted": true,  "count": 203, "timestamp": "2024-09-01T04:13:10Z"},
                    "games":   {"extracted": false, "count": 0,   "timestamp": "2024-09-01T04:13:11Z"}
                }
            },
            "lastRun": "2024-09-01T04:13:11Z",
            "version": 2
        }"#;
        let manifest: ExtractionManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.source, "pll");
        assert_eq!(manifest.version, 2);
        assert_eq!(manifest.extracted_count(), 2);
        let teams = &manifest.seasons["2024"]["teams"];
        assert_eq!(teams.count, 8);
        assert_eq!(teams.duration_ms, Some(1400));
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_manifest(dir.path(), "pll").unwrap().is_none());
    }

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let league_dir = dir.path().join("nll");
        std::fs::create_dir_all(&league_dir).unwrap();
        std::fs::write(
            league_dir.join("manifest.json"),
            r#"{"source":"nll","seasons":{},"lastRun":"2025-01-05T00:00:00Z","version":1}"#,
        )
        .unwrap();

        let manifest = read_manifest(dir.path(), "nll").unwrap().unwrap();
        assert_eq!(manifest.source, "nll");
        assert!(manifest.seasons.is_empty());
    }
}
