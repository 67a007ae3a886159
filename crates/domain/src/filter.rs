//! Search filters: `config/filters.json` — a small, human-edited list
//! driving the periodic loads. Only the per-filter `active` flag mutates
//! at runtime, via the control surface.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::write_with_backup;
use crate::error::{Error, Result};

pub const DEFAULT_FILTERS_PATH: &str = "config/filters.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FiltersFile {
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// One named set of upstream search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Preferred activity flag; legacy files carry `enabled` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Upstream query parameters, passed through by the fetcher.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl FilterSpec {
    /// `active` wins over legacy `enabled`; absent means active.
    pub fn is_active(&self) -> bool {
        self.active.or(self.enabled).unwrap_or(true)
    }
}

impl FiltersFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Atomic write (temp + rename) with a backup of the previous copy.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_with_backup(path, &json)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&FilterSpec> {
        self.filters.iter().find(|f| f.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &FilterSpec> {
        self.filters.iter().filter(|f| f.is_active())
    }

    /// Set one filter's `active` flag. Returns false when the id is unknown.
    /// The legacy `enabled` key is cleared so the file converges on `active`.
    pub fn set_active(&mut self, id: &str, active: bool) -> bool {
        match self.filters.iter_mut().find(|f| f.id == id) {
            Some(f) => {
                f.active = Some(active);
                f.enabled = None;
                true
            }
            None => false,
        }
    }

    pub fn set_all(&mut self, active: bool) {
        for f in &mut self.filters {
            f.active = Some(active);
            f.enabled = None;
        }
    }

    pub fn invert(&mut self) {
        for f in &mut self.filters {
            let flipped = !f.is_active();
            f.active = Some(flipped);
            f.enabled = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FiltersFile {
        serde_json::from_str(
            r#"{
                "filters": [
                    {"id": "f1", "name": "rust remote", "params": {"text": "rust"}},
                    {"id": "f2", "name": "legacy", "enabled": false, "params": {"text": "cobol"}},
                    {"id": "f3", "name": "python", "active": true, "params": {"text": "python", "area": "1"}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn active_defaults_true_and_enabled_is_honored() {
        let ff = sample();
        assert!(ff.get("f1").unwrap().is_active());
        assert!(!ff.get("f2").unwrap().is_active());
        assert!(ff.get("f3").unwrap().is_active());
        assert_eq!(ff.active().count(), 2);
    }

    #[test]
    fn active_flag_wins_over_enabled() {
        let f: FilterSpec = serde_json::from_str(
            r#"{"id": "x", "active": false, "enabled": true, "params": {}}"#,
        )
        .unwrap();
        assert!(!f.is_active());
    }

    #[test]
    fn set_active_converges_legacy_key() {
        let mut ff = sample();
        assert!(ff.set_active("f2", true));
        let f2 = ff.get("f2").unwrap();
        assert_eq!(f2.active, Some(true));
        assert!(f2.enabled.is_none());
        assert!(!ff.set_active("missing", true));
    }

    #[test]
    fn invert_flips_every_filter() {
        let mut ff = sample();
        ff.invert();
        assert!(!ff.get("f1").unwrap().is_active());
        assert!(ff.get("f2").unwrap().is_active());
        assert!(!ff.get("f3").unwrap().is_active());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filters.json");

        let mut ff = sample();
        ff.set_all(false);
        ff.save(&path).unwrap();

        let back = FiltersFile::load(&path).unwrap();
        assert_eq!(back.filters.len(), 3);
        assert_eq!(back.active().count(), 0);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ff = FiltersFile::load(&dir.path().join("none.json")).unwrap();
        assert!(ff.filters.is_empty());
    }
}
