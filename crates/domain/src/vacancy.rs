//! Vacancy and employer records, plus the canonical content hash that
//! drives deduplication.
//!
//! The hash covers a normalized projection of the listing: title, employer
//! name, salary bounds, currency, experience, schedule, employment, sorted
//! skills, the first 500 chars of the description, and the area — all
//! lowercased and trimmed so field order, case, and surrounding whitespace
//! never produce a spurious change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vacancy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized listing extracted from one upstream `items[]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Vacancy {
    pub hh_id: String,
    pub title: String,
    pub company: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employer_id: Option<String>,
    pub salary_from: Option<i64>,
    pub salary_to: Option<i64>,
    pub currency: Option<String>,
    pub experience: Option<String>,
    pub schedule: Option<String>,
    pub employment: Option<String>,
    pub description: Option<String>,
    pub key_skills: Vec<String>,
    pub area: Option<String>,
    pub published_at: Option<String>,
    pub url: Option<String>,
}

impl Vacancy {
    /// Extract the normalized record from a raw upstream payload.
    /// Missing or oddly-shaped fields degrade to empty values rather than
    /// failing the page.
    pub fn from_listing(payload: &Value) -> Self {
        let str_at = |v: &Value, path: &[&str]| -> Option<String> {
            let mut cur = v;
            for key in path {
                cur = cur.get(key)?;
            }
            match cur {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };
        let int_at = |v: &Value, path: &[&str]| -> Option<i64> {
            let mut cur = v;
            for key in path {
                cur = cur.get(key)?;
            }
            cur.as_i64()
        };

        let key_skills = payload
            .get("key_skills")
            .and_then(Value::as_array)
            .map(|skills| {
                skills
                    .iter()
                    .filter_map(|s| str_at(s, &["name"]))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            hh_id: str_at(payload, &["id"]).unwrap_or_default(),
            title: str_at(payload, &["name"]).unwrap_or_default(),
            company: str_at(payload, &["employer", "name"]).unwrap_or_default(),
            employer_id: str_at(payload, &["employer", "id"]).filter(|s| !s.is_empty()),
            salary_from: int_at(payload, &["salary", "from"]),
            salary_to: int_at(payload, &["salary", "to"]),
            currency: str_at(payload, &["salary", "currency"]),
            experience: str_at(payload, &["experience", "name"]),
            schedule: str_at(payload, &["schedule", "name"]),
            employment: str_at(payload, &["employment", "name"]),
            description: str_at(payload, &["snippet", "responsibility"]),
            key_skills,
            area: str_at(payload, &["area", "name"]),
            published_at: str_at(payload, &["published_at"]),
            url: str_at(payload, &["alternate_url"]),
        }
    }

    /// Stable dedup key: SHA-256 of the pipe-joined canonical projection,
    /// truncated to 32 hex characters.
    pub fn content_hash(&self) -> String {
        let norm = |s: &str| s.trim().to_lowercase();

        let mut skills: Vec<String> = self.key_skills.iter().map(|s| norm(s)).collect();
        skills.sort();

        let description: String = self
            .description
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(500)
            .collect();

        let parts = [
            norm(&self.title),
            norm(&self.company),
            self.salary_from.unwrap_or(0).to_string(),
            self.salary_to.unwrap_or(0).to_string(),
            self.currency
                .as_deref()
                .unwrap_or("RUR")
                .to_uppercase(),
            self.experience.as_deref().unwrap_or("").to_lowercase(),
            self.schedule.as_deref().unwrap_or("").to_lowercase(),
            self.employment.as_deref().unwrap_or("").to_lowercase(),
            serde_json::to_string(&skills).unwrap_or_default(),
            norm(&description),
            norm(self.area.as_deref().unwrap_or("")),
        ];

        let digest = Sha256::digest(parts.join("|").as_bytes());
        hex::encode(digest)[..32].to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Employer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upsert target joined from vacancies by `employer_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employer {
    pub hh_id: String,
    pub name: String,
    pub url: Option<String>,
}

impl Employer {
    /// Map an upstream `/employers/{id}` payload; the name falls back to
    /// whichever URL field is present.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let hh_id = match payload.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        let alternate = payload
            .get("alternate_url")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let site = payload
            .get("site_url")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| alternate.clone())
            .unwrap_or_default();
        Some(Self {
            hh_id,
            name,
            url: alternate.or(site),
        })
    }
}
