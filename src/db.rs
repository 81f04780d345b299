use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::parser::extract::profile::ProfileHeader;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// How a lost or failing connection is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

// ── Rows ──

/// One persisted position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperienceEntry {
    pub user_id: i64,
    pub company: String,
    pub job_title: Option<String>,
    pub work_description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location_of_job: Option<String>,
}

/// `skill_name = None` records that the profile was checked and had no skills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillRecord {
    pub user_id: i64,
    pub skill_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub user_id: i64,
    pub profile_url: String,
}

pub struct Stats {
    pub users: usize,
    pub checked: usize,
    pub experience: usize,
    pub skills: usize,
}

// ── Store ──

/// The single connection shared by a run. Every operation validates the
/// connection first and reconnects with exponential backoff when it is gone.
pub struct Store {
    path: PathBuf,
    conn: Option<Connection>,
    retry: RetryPolicy,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self, StoreError> {
        let mut store = Store {
            path: path.as_ref().to_path_buf(),
            conn: None,
            retry,
        };
        store.with_retry("connect", |_| Ok(()))?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn init_schema(&mut self) -> Result<(), StoreError> {
        self.with_retry("init_schema", |conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    user_id          INTEGER PRIMARY KEY,
                    profile_url      TEXT UNIQUE NOT NULL,
                    users_name       TEXT,
                    location_of_user TEXT,
                    created_at       TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS work_experience (
                    id               INTEGER PRIMARY KEY,
                    user_id          INTEGER NOT NULL REFERENCES users(user_id),
                    company          TEXT NOT NULL,
                    job_title        TEXT,
                    work_description TEXT,
                    start_date       TEXT,
                    end_date         TEXT,
                    location_of_job  TEXT,
                    created_at       TEXT NOT NULL DEFAULT (datetime('now'))
                );
                CREATE INDEX IF NOT EXISTS idx_experience_user ON work_experience(user_id);

                CREATE TABLE IF NOT EXISTS skills (
                    id         INTEGER PRIMARY KEY,
                    user_id    INTEGER NOT NULL REFERENCES users(user_id),
                    skill_name TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );
                CREATE INDEX IF NOT EXISTS idx_skills_user ON skills(user_id);
                ",
            )
        })
    }

    // ── Users ──

    /// Register profile URLs; already known URLs are left alone.
    pub fn insert_profiles(&mut self, urls: &[String]) -> Result<usize, StoreError> {
        self.with_retry("insert_profiles", |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut count = 0;
            {
                let mut stmt = tx.prepare("INSERT OR IGNORE INTO users (profile_url) VALUES (?1)")?;
                for url in urls {
                    count += stmt.execute(params![url])?;
                }
            }
            tx.commit()?;
            Ok(count)
        })
    }

    /// The user id for a profile URL, registering the URL if needed.
    pub fn ensure_user(&mut self, profile_url: &str) -> Result<i64, StoreError> {
        self.with_retry("ensure_user", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (profile_url) VALUES (?1)",
                params![profile_url],
            )?;
            conn.query_row(
                "SELECT user_id FROM users WHERE profile_url = ?1",
                params![profile_url],
                |r| r.get(0),
            )
        })
    }

    pub fn user(&mut self, user_id: i64) -> Result<Option<UserRow>, StoreError> {
        self.with_retry("user", |conn| {
            conn.query_row(
                "SELECT user_id, profile_url FROM users WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok(UserRow {
                        user_id: r.get(0)?,
                        profile_url: r.get(1)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Fill in name and location from the profile header. Missing values keep
    /// whatever was stored before.
    pub fn update_user_profile(&mut self, user_id: i64, header: &ProfileHeader) -> Result<(), StoreError> {
        self.with_retry("update_user_profile", |conn| {
            conn.execute(
                "UPDATE users
                 SET users_name = COALESCE(?2, users_name),
                     location_of_user = COALESCE(?3, location_of_user)
                 WHERE user_id = ?1",
                params![user_id, header.name, header.location],
            )?;
            Ok(())
        })
    }

    /// Users that were never checked: no `skills` row at all, not even the
    /// null marker.
    pub fn fetch_unchecked(&mut self, limit: Option<usize>) -> Result<Vec<UserRow>, StoreError> {
        let sql = format!(
            "SELECT u.user_id, u.profile_url
             FROM users u
             WHERE NOT EXISTS (SELECT 1 FROM skills s WHERE s.user_id = u.user_id)
             ORDER BY u.user_id{}",
            match limit {
                Some(n) => format!(" LIMIT {}", n),
                None => String::new(),
            }
        );
        self.with_retry("fetch_unchecked", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UserRow {
                        user_id: row.get(0)?,
                        profile_url: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ── Idempotent upserts ──

    /// Insert unless a row for the same user matches on every column, nulls
    /// comparing equal (`IS`). Check and insert are one statement.
    pub fn upsert_experience(&mut self, entry: &ExperienceEntry) -> Result<bool, StoreError> {
        let start = date_text(entry.start_date);
        let end = date_text(entry.end_date);
        let inserted = self.with_retry("upsert_experience", |conn| {
            conn.execute(
                "INSERT INTO work_experience
                 (user_id, company, job_title, work_description, start_date, end_date, location_of_job)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
                 WHERE NOT EXISTS (
                     SELECT 1 FROM work_experience
                     WHERE user_id = ?1
                       AND company IS ?2
                       AND job_title IS ?3
                       AND work_description IS ?4
                       AND start_date IS ?5
                       AND end_date IS ?6
                       AND location_of_job IS ?7
                 )",
                params![
                    entry.user_id,
                    entry.company,
                    entry.job_title,
                    entry.work_description,
                    start,
                    end,
                    entry.location_of_job,
                ],
            )
        })? == 1;
        debug!(user_id = entry.user_id, company = %entry.company, inserted, "experience upsert");
        Ok(inserted)
    }

    pub fn upsert_skill(&mut self, record: &SkillRecord) -> Result<bool, StoreError> {
        let inserted = self.with_retry("upsert_skill", |conn| {
            conn.execute(
                "INSERT INTO skills (user_id, skill_name)
                 SELECT ?1, ?2
                 WHERE NOT EXISTS (
                     SELECT 1 FROM skills WHERE user_id = ?1 AND skill_name IS ?2
                 )",
                params![record.user_id, record.skill_name],
            )
        })? == 1;
        debug!(user_id = record.user_id, skill = ?record.skill_name, inserted, "skill upsert");
        Ok(inserted)
    }

    #[cfg(test)]
    pub fn experience_for(&mut self, user_id: i64) -> Result<Vec<ExperienceEntry>, StoreError> {
        self.with_retry("experience_for", |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, company, job_title, work_description, start_date, end_date, location_of_job
                 FROM work_experience WHERE user_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok(ExperienceEntry {
                        user_id: row.get(0)?,
                        company: row.get(1)?,
                        job_title: row.get(2)?,
                        work_description: row.get(3)?,
                        start_date: parse_date_text(row.get(4)?),
                        end_date: parse_date_text(row.get(5)?),
                        location_of_job: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    #[cfg(test)]
    pub fn skills_for(&mut self, user_id: i64) -> Result<Vec<SkillRecord>, StoreError> {
        self.with_retry("skills_for", |conn| {
            let mut stmt =
                conn.prepare("SELECT user_id, skill_name FROM skills WHERE user_id = ?1 ORDER BY id")?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok(SkillRecord {
                        user_id: row.get(0)?,
                        skill_name: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn stats(&mut self) -> Result<Stats, StoreError> {
        self.with_retry("stats", |conn| {
            let count = |sql: &str| conn.query_row(sql, [], |r| r.get::<_, usize>(0));
            Ok(Stats {
                users: count("SELECT COUNT(*) FROM users")?,
                checked: count("SELECT COUNT(DISTINCT user_id) FROM skills")?,
                experience: count("SELECT COUNT(*) FROM work_experience")?,
                skills: count("SELECT COUNT(*) FROM skills WHERE skill_name IS NOT NULL")?,
            })
        })
    }

    // ── Connection handling ──

    /// Run `op` on a validated connection. A failure drops the connection and
    /// retries after an exponential backoff; once the retries are spent the
    /// last error is returned.
    fn with_retry<T>(
        &mut self,
        op: &str,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            let result = self.live_connection().and_then(|conn| f(conn));
            match result {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= self.retry.max_retries => {
                    return Err(StoreError::RetriesExhausted {
                        op: op.to_string(),
                        attempts: attempt + 1,
                        source,
                    });
                }
                Err(e) => {
                    self.conn = None;
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        op,
                        attempt + 1,
                        self.retry.max_retries,
                        backoff.as_secs_f64(),
                        e
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }

    fn live_connection(&mut self) -> rusqlite::Result<&Connection> {
        let conn = match self.conn.take() {
            Some(conn) if ping(&conn) => conn,
            Some(_) => {
                warn!(path = %self.path.display(), "database connection lost, reconnecting");
                connect(&self.path)?
            }
            None => connect(&self.path)?,
        };
        Ok(self.conn.insert(conn))
    }
}

fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn ping(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)).is_ok()
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn parse_date_text(text: Option<String>) -> Option<NaiveDate> {
    text.and_then(|t| NaiveDate::parse_from_str(&t, DATE_FORMAT).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        }
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path().join("test.sqlite"), fast_retry()).unwrap();
        store.init_schema().unwrap();
        (dir, store)
    }

    fn entry(user_id: i64, description: Option<&str>) -> ExperienceEntry {
        ExperienceEntry {
            user_id,
            company: "Acme Corp".into(),
            job_title: Some("Engineer".into()),
            work_description: description.map(str::to_string),
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            end_date: None,
            location_of_job: None,
        }
    }

    #[test]
    fn null_description_matches_null_only() {
        let (_dir, mut store) = temp_store();
        let uid = store.ensure_user("https://www.linkedin.com/in/a/").unwrap();

        assert!(store.upsert_experience(&entry(uid, None)).unwrap());
        // null matches stored null
        assert!(!store.upsert_experience(&entry(uid, None)).unwrap());
        // non-null does not match stored null
        assert!(store.upsert_experience(&entry(uid, Some("Led team"))).unwrap());
        assert!(!store.upsert_experience(&entry(uid, Some("Led team"))).unwrap());
        assert_eq!(store.experience_for(uid).unwrap().len(), 2);
    }

    #[test]
    fn dedup_is_scoped_by_user() {
        let (_dir, mut store) = temp_store();
        let a = store.ensure_user("https://www.linkedin.com/in/a/").unwrap();
        let b = store.ensure_user("https://www.linkedin.com/in/b/").unwrap();
        assert!(store.upsert_experience(&entry(a, None)).unwrap());
        assert!(store.upsert_experience(&entry(b, None)).unwrap());
    }

    #[test]
    fn dates_round_trip_as_iso_text() {
        let (_dir, mut store) = temp_store();
        let uid = store.ensure_user("https://www.linkedin.com/in/a/").unwrap();
        let mut e = entry(uid, None);
        e.end_date = NaiveDate::from_ymd_opt(2024, 5, 17);
        store.upsert_experience(&e).unwrap();
        assert_eq!(store.experience_for(uid).unwrap(), vec![e]);
    }

    #[test]
    fn null_skill_marks_user_checked() {
        let (_dir, mut store) = temp_store();
        let a = store.ensure_user("https://www.linkedin.com/in/a/").unwrap();
        let b = store.ensure_user("https://www.linkedin.com/in/b/").unwrap();

        let none = SkillRecord {
            user_id: a,
            skill_name: None,
        };
        assert!(store.upsert_skill(&none).unwrap());
        assert!(!store.upsert_skill(&none).unwrap());

        let unchecked = store.fetch_unchecked(None).unwrap();
        assert_eq!(unchecked.len(), 1);
        assert_eq!(unchecked[0].user_id, b);

        let s = store.stats().unwrap();
        assert_eq!(s.users, 2);
        assert_eq!(s.checked, 1);
        assert_eq!(s.skills, 0);
    }

    #[test]
    fn profiles_are_registered_once() {
        let (_dir, mut store) = temp_store();
        let urls = vec![
            "https://www.linkedin.com/in/a/".to_string(),
            "https://www.linkedin.com/in/b/".to_string(),
        ];
        assert_eq!(store.insert_profiles(&urls).unwrap(), 2);
        assert_eq!(store.insert_profiles(&urls).unwrap(), 0);
        assert_eq!(store.ensure_user(&urls[1]).unwrap(), 2);
        assert_eq!(store.fetch_unchecked(Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn header_update_keeps_existing_values() {
        let (_dir, mut store) = temp_store();
        let uid = store.ensure_user("https://www.linkedin.com/in/a/").unwrap();
        let full = ProfileHeader {
            name: Some("Jane Doe".into()),
            location: Some("Austin".into()),
        };
        store.update_user_profile(uid, &full).unwrap();
        store.update_user_profile(uid, &ProfileHeader::default()).unwrap();
        let stored: (Option<String>, Option<String>) = store
            .with_retry("read", |conn| {
                conn.query_row(
                    "SELECT users_name, location_of_user FROM users WHERE user_id = ?1",
                    params![uid],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
            })
            .unwrap();
        assert_eq!(stored, (Some("Jane Doe".into()), Some("Austin".into())));
    }

    #[test]
    fn unreachable_database_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("test.sqlite");
        let err = Store::open(&path, fast_retry()).err().unwrap();
        let StoreError::RetriesExhausted { op, attempts, .. } = err;
        assert_eq!(op, "connect");
        assert_eq!(attempts, 3);
    }

    #[test]
    fn failed_attempt_is_retried_until_it_succeeds() {
        let (_dir, mut store) = temp_store();
        let mut calls = 0;
        let value = store
            .with_retry("flaky", |conn| {
                calls += 1;
                if calls == 1 {
                    return Err(rusqlite::Error::InvalidQuery);
                }
                conn.query_row("SELECT 7", [], |r| r.get::<_, i64>(0))
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 2);
    }

    #[test]
    fn dropped_connection_is_reopened() {
        let (_dir, mut store) = temp_store();
        store.ensure_user("https://www.linkedin.com/in/a/").unwrap();
        store.conn = None;
        assert_eq!(store.stats().unwrap().users, 1);
        assert!(store.conn.is_some());
    }

    #[test]
    fn wrong_connection_is_replaced_after_a_failed_query() {
        let (_dir, mut store) = temp_store();
        let uid = store.ensure_user("https://www.linkedin.com/in/a/").unwrap();
        // answers SELECT 1 but has none of our tables
        store.conn = Some(Connection::open_in_memory().unwrap());
        let record = SkillRecord {
            user_id: uid,
            skill_name: Some("Rust".into()),
        };
        assert!(store.upsert_skill(&record).unwrap());
        assert_eq!(store.skills_for(uid).unwrap(), vec![record]);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }
}
