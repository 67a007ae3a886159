//! Vacancy and employer persistence: content-hash dedup upserts, plugin
//! results, and the read paths backing the control surface and pipelines.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use vh_domain::vacancy::{Employer, Vacancy};

use crate::{now_ts, Result, Store};

/// What `save_vacancy` did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// First sight of this `hh_id`.
    Inserted,
    /// Known `hh_id`, content hash differed — mutable fields rewritten.
    Updated,
    /// Known `hh_id`, identical hash — no write issued.
    Unchanged,
}

impl SaveOutcome {
    /// True when the payload counted toward "loaded" totals.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Row shape returned by the vacancy read paths.
#[derive(Debug, Clone, Serialize)]
pub struct VacancyRow {
    pub id: i64,
    pub hh_id: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub employer_id: Option<String>,
    pub area: Option<String>,
    pub published_at: Option<String>,
    pub url: Option<String>,
    pub filter_id: Option<String>,
    pub created_at: Option<f64>,
    pub updated_at: Option<f64>,
    pub is_processed: bool,
}

impl Store {
    /// Upsert one upstream listing, deduplicated by content hash.
    ///
    /// `created_at` is only ever written on first insert; updates rewrite
    /// the mutable columns and bump `updated_at`.
    pub fn save_vacancy(&self, payload: &Value, filter_id: Option<&str>) -> Result<SaveOutcome> {
        let vacancy = Vacancy::from_listing(payload);
        if vacancy.hh_id.is_empty() {
            return Err(crate::StoreError::Other("listing has no id".into()));
        }
        let hash = vacancy.content_hash();
        let key_skills = serde_json::to_string(&vacancy.key_skills)?;
        let raw_json = serde_json::to_string(payload)?;

        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT content_hash FROM vacancies WHERE hh_id = ?1",
                    params![vacancy.hh_id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(old_hash) if old_hash == hash => {
                    tracing::debug!(hh_id = %vacancy.hh_id, "vacancy unchanged");
                    Ok(SaveOutcome::Unchanged)
                }
                Some(_) => {
                    conn.execute(
                        "UPDATE vacancies SET
                            title = ?1, company = ?2, employer_id = ?3,
                            salary_from = ?4, salary_to = ?5, currency = ?6,
                            experience = ?7, schedule = ?8, employment = ?9,
                            description = ?10, key_skills = ?11, area = ?12,
                            published_at = ?13, url = ?14, updated_at = ?15,
                            filter_id = ?16, content_hash = ?17, raw_json = ?18
                         WHERE hh_id = ?19",
                        params![
                            vacancy.title,
                            vacancy.company,
                            vacancy.employer_id,
                            vacancy.salary_from,
                            vacancy.salary_to,
                            vacancy.currency,
                            vacancy.experience,
                            vacancy.schedule,
                            vacancy.employment,
                            vacancy.description,
                            key_skills,
                            vacancy.area,
                            vacancy.published_at,
                            vacancy.url,
                            now_ts(),
                            filter_id,
                            hash,
                            raw_json,
                            vacancy.hh_id
                        ],
                    )?;
                    tracing::debug!(hh_id = %vacancy.hh_id, "vacancy updated in place");
                    Ok(SaveOutcome::Updated)
                }
                None => {
                    let now = now_ts();
                    conn.execute(
                        "INSERT INTO vacancies (
                            hh_id, title, company, employer_id,
                            salary_from, salary_to, currency,
                            experience, schedule, employment,
                            description, key_skills, area,
                            published_at, url, filter_id,
                            content_hash, raw_json,
                            created_at, updated_at, is_processed, synced_host2
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                                   ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, 0, 0)",
                        params![
                            vacancy.hh_id,
                            vacancy.title,
                            vacancy.company,
                            vacancy.employer_id,
                            vacancy.salary_from,
                            vacancy.salary_to,
                            vacancy.currency,
                            vacancy.experience,
                            vacancy.schedule,
                            vacancy.employment,
                            vacancy.description,
                            key_skills,
                            vacancy.area,
                            vacancy.published_at,
                            vacancy.url,
                            filter_id,
                            hash,
                            raw_json,
                            now,
                            now
                        ],
                    )?;
                    tracing::debug!(hh_id = %vacancy.hh_id, "vacancy inserted");
                    Ok(SaveOutcome::Inserted)
                }
            }
        })
    }

    pub fn get_recent_vacancies(&self, limit: usize) -> Result<Vec<VacancyRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, hh_id, title, company, employer_id, area, published_at, url,
                        filter_id, created_at, updated_at, is_processed
                 FROM vacancies
                 ORDER BY COALESCE(created_at, 0) DESC, published_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], vacancy_from_row)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn get_unprocessed_vacancies(&self, limit: usize) -> Result<Vec<VacancyRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, hh_id, title, company, employer_id, area, published_at, url,
                        filter_id, created_at, updated_at, is_processed
                 FROM vacancies
                 WHERE COALESCE(is_processed, 0) = 0
                 ORDER BY published_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], vacancy_from_row)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn mark_vacancy_processed(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let now = now_ts();
            conn.execute(
                "UPDATE vacancies SET is_processed = 1, processed_at = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![now, now, id],
            )?;
            Ok(())
        })
    }

    pub fn count_vacancies(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM vacancies", [], |row| row.get(0))?)
        })
    }

    /// Per-filter vacancy counts over the trailing week.
    pub fn get_vacancy_count_by_filter(&self) -> Result<Vec<(String, i64)>> {
        let cutoff = now_ts() - 7.0 * 86_400.0;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(filter_id, 'unknown') AS filter_id, COUNT(*) AS count
                 FROM vacancies
                 WHERE created_at > ?1
                 GROUP BY filter_id
                 ORDER BY count DESC",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    // ── Employers ─────────────────────────────────────────────────────

    /// Distinct employer ids referenced by vacancies but absent from the
    /// employers table.
    pub fn get_missing_employer_ids(&self, limit: usize) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT v.employer_id
                 FROM vacancies v
                 WHERE v.employer_id IS NOT NULL AND v.employer_id != ''
                   AND NOT EXISTS (SELECT 1 FROM employers e WHERE e.hh_id = v.employer_id)
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Upsert an employer payload by `hh_id`; returns the row id.
    pub fn save_employer(&self, payload: &Value) -> Result<Option<i64>> {
        let Some(employer) = Employer::from_payload(payload) else {
            return Ok(None);
        };
        let raw_json = serde_json::to_string(payload)?;

        self.with_conn(|conn| {
            let now = now_ts();
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM employers WHERE hh_id = ?1",
                    params![employer.hh_id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(id) => {
                    conn.execute(
                        "UPDATE employers SET name = ?1, url = ?2, raw_json = ?3, updated_at = ?4
                         WHERE hh_id = ?5",
                        params![employer.name, employer.url, raw_json, now, employer.hh_id],
                    )?;
                    Ok(Some(id))
                }
                None => {
                    conn.execute(
                        "INSERT INTO employers (hh_id, name, url, raw_json, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![employer.hh_id, employer.name, employer.url, raw_json, now, now],
                    )?;
                    Ok(Some(conn.last_insert_rowid()))
                }
            }
        })
    }

    // ── Host sync / analysis bookkeeping ──────────────────────────────

    pub fn get_unsynced_vacancy_ids(&self, limit: usize) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM vacancies
                 WHERE COALESCE(synced_host2, 0) = 0
                 ORDER BY created_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, i64>(0))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    pub fn mark_vacancies_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!(
                "UPDATE vacancies SET synced_host2 = 1, updated_at = ?1 WHERE id IN ({placeholders})"
            );
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now_ts())];
            bind.extend(ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>));
            let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
            Ok(conn.execute(&sql, bind_refs.as_slice())?)
        })
    }

    /// Vacancies with no result from `plugin_name` yet. With `new_only`
    /// the scan is limited to the trailing week.
    pub fn get_unanalyzed_vacancies(
        &self,
        plugin_name: &str,
        limit: usize,
        new_only: bool,
    ) -> Result<Vec<VacancyRow>> {
        self.with_conn(|conn| {
            let recency = if new_only {
                "AND v.created_at > ?3"
            } else {
                "AND ?3 >= 0"
            };
            let sql = format!(
                "SELECT v.id, v.hh_id, v.title, v.company, v.employer_id, v.area,
                        v.published_at, v.url, v.filter_id, v.created_at, v.updated_at,
                        v.is_processed
                 FROM vacancies v
                 LEFT JOIN plugin_results p
                        ON p.vacancy_id = v.id AND p.plugin_name = ?1
                 WHERE p.id IS NULL {recency}
                 ORDER BY v.created_at DESC
                 LIMIT ?2"
            );
            let cutoff = now_ts() - 7.0 * 86_400.0;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![plugin_name, limit as i64, cutoff],
                vacancy_from_row,
            )?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Append a plugin result; readers take the newest row per pair.
    pub fn save_plugin_result(
        &self,
        vacancy_id: i64,
        plugin_name: &str,
        result: &Value,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO plugin_results (vacancy_id, plugin_name, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![vacancy_id, plugin_name, serde_json::to_string(result)?, now_ts()],
            )?;
            Ok(())
        })
    }
}

fn vacancy_from_row(row: &Row<'_>) -> rusqlite::Result<VacancyRow> {
    Ok(VacancyRow {
        id: row.get("id")?,
        hh_id: row.get::<_, Option<String>>("hh_id")?.unwrap_or_default(),
        title: row.get("title")?,
        company: row.get("company")?,
        employer_id: row.get("employer_id")?,
        area: row.get("area")?,
        published_at: row.get("published_at")?,
        url: row.get("url")?,
        filter_id: row.get("filter_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        is_processed: row.get::<_, Option<i64>>("is_processed")?.unwrap_or(0) != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_store;
    use serde_json::json;

    fn listing(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "name": title,
            "employer": {"id": "500", "name": "Acme"},
            "salary": {"from": 100, "to": 200, "currency": "RUR"},
            "experience": {"name": "1-3"},
            "schedule": {"name": "remote"},
            "employment": {"name": "full"},
            "snippet": {"responsibility": "Do things"},
            "area": {"name": "Moscow"},
            "published_at": "2024-06-01T10:00:00+0300",
            "alternate_url": format!("https://example/vacancy/{id}")
        })
    }

    #[test]
    fn first_save_inserts_exactly_one_row() {
        let (store, _dir) = temp_store();
        let outcome = store.save_vacancy(&listing("v1", "Dev"), Some("f1")).unwrap();
        assert_eq!(outcome, SaveOutcome::Inserted);
        assert_eq!(store.count_vacancies().unwrap(), 1);
    }

    #[test]
    fn identical_payload_is_a_noop() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1", "Dev"), Some("f1")).unwrap();
        let first = &store.get_recent_vacancies(1).unwrap()[0];
        let created = first.created_at;
        let updated = first.updated_at;

        let outcome = store.save_vacancy(&listing("v1", "Dev"), Some("f1")).unwrap();
        assert_eq!(outcome, SaveOutcome::Unchanged);
        assert_eq!(store.count_vacancies().unwrap(), 1);

        let again = &store.get_recent_vacancies(1).unwrap()[0];
        assert_eq!(again.created_at, created);
        assert_eq!(again.updated_at, updated);
    }

    #[test]
    fn content_change_updates_in_place_preserving_created_at() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1", "Dev"), Some("f1")).unwrap();
        let created = store.get_recent_vacancies(1).unwrap()[0].created_at;

        let outcome = store
            .save_vacancy(&listing("v1", "Senior Python Dev"), Some("f1"))
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Updated);
        assert_eq!(store.count_vacancies().unwrap(), 1);

        let row = &store.get_recent_vacancies(1).unwrap()[0];
        assert_eq!(row.title.as_deref(), Some("Senior Python Dev"));
        assert_eq!(row.created_at, created);
        assert!(row.updated_at >= created);
    }

    #[test]
    fn payload_without_id_is_rejected() {
        let (store, _dir) = temp_store();
        assert!(store.save_vacancy(&json!({"name": "no id"}), None).is_err());
    }

    #[test]
    fn recent_vacancies_newest_first() {
        let (store, _dir) = temp_store();
        for i in 0..5 {
            store
                .save_vacancy(&listing(&format!("v{i}"), "Dev"), None)
                .unwrap();
        }
        let recent = store.get_recent_vacancies(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].created_at >= recent[1].created_at);
    }

    #[test]
    fn unprocessed_then_marked() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1", "Dev"), None).unwrap();
        let unprocessed = store.get_unprocessed_vacancies(10).unwrap();
        assert_eq!(unprocessed.len(), 1);

        store.mark_vacancy_processed(unprocessed[0].id).unwrap();
        assert!(store.get_unprocessed_vacancies(10).unwrap().is_empty());
    }

    #[test]
    fn missing_employer_ids_shrink_after_upsert() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1", "Dev"), None).unwrap();
        assert_eq!(store.get_missing_employer_ids(10).unwrap(), vec!["500"]);

        store
            .save_employer(&json!({"id": "500", "name": "Acme", "alternate_url": "https://x"}))
            .unwrap();
        assert!(store.get_missing_employer_ids(10).unwrap().is_empty());
    }

    #[test]
    fn employer_upsert_keeps_row_id() {
        let (store, _dir) = temp_store();
        let first = store
            .save_employer(&json!({"id": "9", "name": "Old"}))
            .unwrap()
            .unwrap();
        let second = store
            .save_employer(&json!({"id": "9", "name": "New", "site_url": "https://new"}))
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn employer_without_id_is_skipped() {
        let (store, _dir) = temp_store();
        assert!(store.save_employer(&json!({"name": "nobody"})).unwrap().is_none());
    }

    #[test]
    fn sync_bookkeeping_round_trip() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1", "Dev"), None).unwrap();
        store.save_vacancy(&listing("v2", "Dev"), None).unwrap();

        let unsynced = store.get_unsynced_vacancy_ids(10).unwrap();
        assert_eq!(unsynced.len(), 2);

        let n = store.mark_vacancies_synced(&unsynced).unwrap();
        assert_eq!(n, 2);
        assert!(store.get_unsynced_vacancy_ids(10).unwrap().is_empty());
        assert_eq!(store.mark_vacancies_synced(&[]).unwrap(), 0);
    }

    #[test]
    fn unanalyzed_excludes_vacancies_with_results() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1", "Dev"), None).unwrap();
        store.save_vacancy(&listing("v2", "Dev"), None).unwrap();

        let pending = store.get_unanalyzed_vacancies("analyzer", 10, true).unwrap();
        assert_eq!(pending.len(), 2);

        store
            .save_plugin_result(pending[0].id, "analyzer", &json!({"score": 7}))
            .unwrap();
        let rest = store.get_unanalyzed_vacancies("analyzer", 10, true).unwrap();
        assert_eq!(rest.len(), 1);

        // A different plugin name still sees both.
        assert_eq!(
            store.get_unanalyzed_vacancies("other", 10, false).unwrap().len(),
            2
        );
    }

    #[test]
    fn filter_counts_group_by_filter() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1", "Dev"), Some("f1")).unwrap();
        store.save_vacancy(&listing("v2", "Dev"), Some("f1")).unwrap();
        store.save_vacancy(&listing("v3", "Dev"), Some("f2")).unwrap();

        let counts = store.get_vacancy_count_by_filter().unwrap();
        assert_eq!(counts[0], ("f1".to_string(), 2));
        assert_eq!(counts[1], ("f2".to_string(), 1));
    }
}
