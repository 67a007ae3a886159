//! DDL and additive migrations. Never destructive: new columns arrive via
//! `ALTER TABLE ADD COLUMN` guarded by a `table_info` probe, new indexes
//! via `IF NOT EXISTS`.

use rusqlite::Connection;

use crate::Result;

pub(crate) fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            params_json TEXT,
            status TEXT DEFAULT 'pending',
            created_at REAL NOT NULL,
            schedule_at REAL,
            started_at REAL,
            finished_at REAL,
            timeout_sec INTEGER DEFAULT 3600,
            worker_id TEXT,
            result_json TEXT,
            progress_json TEXT
        );

        CREATE TABLE IF NOT EXISTS vacancies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hh_id TEXT,
            title TEXT,
            company TEXT,
            employer_id TEXT,
            salary_from INTEGER,
            salary_to INTEGER,
            currency TEXT,
            experience TEXT,
            schedule TEXT,
            employment TEXT,
            description TEXT,
            key_skills TEXT,
            area TEXT,
            published_at TEXT,
            url TEXT,
            processed_at REAL,
            filter_id TEXT,
            content_hash TEXT,
            raw_json TEXT
        );

        CREATE TABLE IF NOT EXISTS employers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hh_id TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            created_at REAL,
            updated_at REAL
        );

        CREATE TABLE IF NOT EXISTS plugin_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vacancy_id INTEGER NOT NULL,
            plugin_name TEXT NOT NULL,
            result_json TEXT NOT NULL,
            created_at REAL NOT NULL,
            FOREIGN KEY (vacancy_id) REFERENCES vacancies (id)
        );

        CREATE TABLE IF NOT EXISTS system_processes (
            name TEXT PRIMARY KEY,
            pid INTEGER NOT NULL,
            start_time REAL NOT NULL,
            command_line TEXT,
            host TEXT DEFAULT 'localhost',
            port INTEGER,
            status TEXT DEFAULT 'running',
            created_at REAL NOT NULL,
            updated_at REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS system_health (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts REAL NOT NULL,
            cpu_percent REAL,
            memory_percent REAL,
            disk_percent REAL,
            database_size_mb REAL,
            active_tasks INTEGER,
            host_status_json TEXT
        );

        CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts REAL NOT NULL,
            level TEXT NOT NULL,
            module TEXT,
            func TEXT,
            message TEXT NOT NULL,
            context_json TEXT
        );
        "#,
    )?;

    // Additive column migrations for databases created by older builds.
    add_column_if_missing(conn, "vacancies", "created_at", "REAL")?;
    add_column_if_missing(conn, "vacancies", "updated_at", "REAL")?;
    add_column_if_missing(conn, "vacancies", "is_processed", "INTEGER DEFAULT 0")?;
    add_column_if_missing(conn, "vacancies", "synced_host2", "INTEGER DEFAULT 0")?;
    add_column_if_missing(conn, "employers", "url", "TEXT")?;
    add_column_if_missing(conn, "employers", "raw_json", "TEXT")?;

    conn.execute_batch(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_vacancies_hh_id ON vacancies(hh_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_schedule ON tasks(schedule_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_type ON tasks(type);
        CREATE INDEX IF NOT EXISTS idx_vacancies_filter ON vacancies(filter_id);
        CREATE INDEX IF NOT EXISTS idx_vacancies_created ON vacancies(created_at);
        CREATE INDEX IF NOT EXISTS idx_vacancies_is_processed ON vacancies(is_processed);
        CREATE INDEX IF NOT EXISTS idx_vacancies_synced_host2 ON vacancies(synced_host2);
        CREATE INDEX IF NOT EXISTS idx_plugin_results_vacancy ON plugin_results(vacancy_id);
        CREATE INDEX IF NOT EXISTS idx_system_health_ts ON system_health(ts);
        CREATE INDEX IF NOT EXISTS idx_logs_ts ON logs(ts);
        "#,
    )?;

    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;

    if !existing.iter().any(|c| c == column) {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
        tracing::info!(table, column, "migrated: added column");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_adds_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        // Simulate a pre-migration database: the original column set
        // without the columns added by later builds.
        conn.execute_batch(
            "CREATE TABLE vacancies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hh_id TEXT, title TEXT, company TEXT, employer_id TEXT,
                salary_from INTEGER, salary_to INTEGER, currency TEXT,
                experience TEXT, schedule TEXT, employment TEXT,
                description TEXT, key_skills TEXT, area TEXT,
                published_at TEXT, url TEXT, processed_at REAL,
                filter_id TEXT, content_hash TEXT, raw_json TEXT
             );
             CREATE TABLE employers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hh_id TEXT UNIQUE NOT NULL, name TEXT NOT NULL,
                created_at REAL, updated_at REAL
             );",
        )
        .unwrap();

        apply(&conn).unwrap();

        let mut stmt = conn.prepare("PRAGMA table_info(vacancies)").unwrap();
        let cols: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        for expected in ["created_at", "updated_at", "is_processed", "synced_host2"] {
            assert!(cols.iter().any(|c| c == expected), "missing {expected}");
        }

        let mut stmt = conn.prepare("PRAGMA table_info(employers)").unwrap();
        let cols: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert!(cols.iter().any(|c| c == "url"));
        assert!(cols.iter().any(|c| c == "raw_json"));
    }

    #[test]
    fn apply_twice_is_safe() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn).unwrap();
        apply(&conn).unwrap();
    }
}
