use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use tracing::info;

use crate::error::Result;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// One append-only entry of the phase timeline. The id is store-assigned
/// and monotonic; "current phase" is the row with the greatest id, not
/// the greatest start_date.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PhaseRecord {
    pub id: i64,
    pub phase: String,
    /// Caller-supplied, normalized ISO-8601 ("YYYY-MM-DDTHH:MM:SS").
    pub start_date: String,
}

/// Per-calendar-day water usage aggregate, one row per local date.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DailyWaterUsage {
    /// "YYYY-MM-DD" in the store's local time.
    pub date: String,
    pub usage: f64,
}

/// A dated inspection record with optional image evidence. The image field
/// is a filename inside the image directory, owned solely by this row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Report {
    pub id: i64,
    pub title: String,
    pub date: String,
    pub image: Option<String>,
    pub description: String,
}

/// Phase name seeded on first boot when the timeline is empty.
pub const DEFAULT_PHASE: &str = "vegetative";

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/moisture-hub/hub.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create the three tables. Must complete before any handler that
    /// reads phase data is considered ready.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
              id          INTEGER PRIMARY KEY AUTOINCREMENT,
              title       TEXT NOT NULL,
              date        TEXT NOT NULL,
              image       TEXT,
              description TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS phase_log (
              id         INTEGER PRIMARY KEY AUTOINCREMENT,
              phase      TEXT NOT NULL,
              start_date TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS water_usage (
              id    INTEGER PRIMARY KEY AUTOINCREMENT,
              date  TEXT NOT NULL UNIQUE,
              usage REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ----------------------------
    // Phase timeline
    // ----------------------------

    /// Seed the default phase iff the timeline is empty, so
    /// `current_phase` can never miss after first boot.
    pub async fn seed_default_phase(&self, start_date: &str) -> Result<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM phase_log")
            .fetch_one(&self.pool)
            .await?;

        if count == 0 {
            sqlx::query("INSERT INTO phase_log (phase, start_date) VALUES (?, ?)")
                .bind(DEFAULT_PHASE)
                .bind(start_date)
                .execute(&self.pool)
                .await?;
            info!(phase = DEFAULT_PHASE, start_date, "seeded default phase");
        }

        Ok(())
    }

    /// Append a phase record. Prior records are never mutated or removed.
    pub async fn insert_phase(&self, phase: &str, start_date: &str) -> Result<PhaseRecord> {
        let record = sqlx::query_as::<_, PhaseRecord>(
            r#"
            INSERT INTO phase_log (phase, start_date)
            VALUES (?, ?)
            RETURNING id, phase, start_date
            "#,
        )
        .bind(phase)
        .bind(start_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// The most recently inserted record (highest id). `None` only on a
    /// completely empty timeline, which seeding prevents.
    pub async fn current_phase(&self) -> Result<Option<PhaseRecord>> {
        let record = sqlx::query_as::<_, PhaseRecord>(
            r#"
            SELECT id, phase, start_date
            FROM phase_log
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// All records ordered by start timestamp descending. Distinct from
    /// insertion order when start dates arrive out of order.
    pub async fn phase_history(&self) -> Result<Vec<PhaseRecord>> {
        let records = sqlx::query_as::<_, PhaseRecord>(
            r#"
            SELECT id, phase, start_date
            FROM phase_log
            ORDER BY start_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    // ----------------------------
    // Daily water-usage ledger
    // ----------------------------

    /// Usage for the store's own notion of "today" in local time. A
    /// missing row is a zero default, not an error.
    pub async fn usage_for_today(&self) -> Result<DailyWaterUsage> {
        let row = sqlx::query_as::<_, DailyWaterUsage>(
            r#"
            SELECT date('now', 'localtime') AS date,
                   COALESCE(
                     (SELECT usage FROM water_usage
                      WHERE date = date('now', 'localtime')),
                     0.0
                   ) AS usage
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Upsert a day's total. Utility for the external producer that
    /// computes daily aggregates; no request handled here triggers it.
    pub async fn record_usage(&self, date: &str, usage: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO water_usage (date, usage)
            VALUES (?, ?)
            ON CONFLICT(date) DO UPDATE SET usage = excluded.usage
            "#,
        )
        .bind(date)
        .bind(usage)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ----------------------------
    // Report archive
    // ----------------------------

    pub async fn insert_report(
        &self,
        title: &str,
        date: &str,
        description: &str,
        image: Option<&str>,
    ) -> Result<Report> {
        let report = sqlx::query_as::<_, Report>(
            r#"
            INSERT INTO reports (title, date, image, description)
            VALUES (?, ?, ?, ?)
            RETURNING id, title, date, image, description
            "#,
        )
        .bind(title)
        .bind(date)
        .bind(image)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        Ok(report)
    }

    pub async fn get_report(&self, id: i64) -> Result<Option<Report>> {
        let report = sqlx::query_as::<_, Report>(
            r#"
            SELECT id, title, date, image, description
            FROM reports
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(report)
    }

    pub async fn list_reports(&self) -> Result<Vec<Report>> {
        let reports = sqlx::query_as::<_, Report>(
            r#"
            SELECT id, title, date, image, description
            FROM reports
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(reports)
    }

    /// Overwrite all scalar fields and the image reference. Image
    /// resolution (keep-existing vs. replace) happens at the caller.
    pub async fn update_report(
        &self,
        id: i64,
        title: &str,
        date: &str,
        description: &str,
        image: Option<&str>,
    ) -> Result<Report> {
        let report = sqlx::query_as::<_, Report>(
            r#"
            UPDATE reports
            SET title = ?, date = ?, image = ?, description = ?
            WHERE id = ?
            RETURNING id, title, date, image, description
            "#,
        )
        .bind(title)
        .bind(date)
        .bind(image)
        .bind(description)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(report)
    }

    /// Delete the row. Deleting an id with no row is not an error; only
    /// storage failures surface.
    pub async fn delete_report(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.init_schema().await.unwrap();
        db
    }

    // -- phase timeline -----------------------------------------------------

    #[tokio::test]
    async fn seed_inserts_default_phase_when_empty() {
        let db = test_db().await;
        db.seed_default_phase("2024-01-01T00:00:00").await.unwrap();

        let current = db.current_phase().await.unwrap().unwrap();
        assert_eq!(current.phase, DEFAULT_PHASE);
        assert_eq!(current.start_date, "2024-01-01T00:00:00");
    }

    #[tokio::test]
    async fn seed_is_a_noop_when_rows_exist() {
        let db = test_db().await;
        db.insert_phase("flowering", "2024-05-01T00:00:00").await.unwrap();

        db.seed_default_phase("2024-01-01T00:00:00").await.unwrap();

        let history = db.phase_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].phase, "flowering");
    }

    #[tokio::test]
    async fn current_phase_is_empty_only_before_seeding() {
        let db = test_db().await;
        assert!(db.current_phase().await.unwrap().is_none());

        db.seed_default_phase("2024-01-01T00:00:00").await.unwrap();
        assert!(db.current_phase().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn current_phase_follows_insertion_order_not_start_date() {
        let db = test_db().await;

        // Later insertion carries an earlier start date.
        db.insert_phase("flowering", "2030-01-01T00:00:00").await.unwrap();
        db.insert_phase("harvest", "2020-01-01T00:00:00").await.unwrap();

        let current = db.current_phase().await.unwrap().unwrap();
        assert_eq!(current.phase, "harvest");
        assert_eq!(current.start_date, "2020-01-01T00:00:00");
    }

    #[tokio::test]
    async fn history_is_ordered_by_start_date_descending() {
        let db = test_db().await;
        db.insert_phase("a", "2024-03-01T00:00:00").await.unwrap();
        db.insert_phase("b", "2024-01-01T00:00:00").await.unwrap();
        db.insert_phase("c", "2024-02-01T00:00:00").await.unwrap();

        let history = db.phase_history().await.unwrap();
        let phases: Vec<&str> = history.iter().map(|p| p.phase.as_str()).collect();
        assert_eq!(phases, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn insert_phase_assigns_monotonic_ids() {
        let db = test_db().await;
        let first = db.insert_phase("a", "2024-01-01T00:00:00").await.unwrap();
        let second = db.insert_phase("b", "2024-01-02T00:00:00").await.unwrap();
        assert!(second.id > first.id);
    }

    // -- daily water-usage ledger --------------------------------------------

    #[tokio::test]
    async fn usage_for_today_defaults_to_zero() {
        let db = test_db().await;
        let today = db.usage_for_today().await.unwrap();
        assert_eq!(today.usage, 0.0);
        assert!(!today.date.is_empty());
    }

    #[tokio::test]
    async fn usage_for_today_reads_the_recorded_total() {
        let db = test_db().await;
        let today: String = sqlx::query_scalar("SELECT date('now', 'localtime')")
            .fetch_one(db.pool())
            .await
            .unwrap();

        db.record_usage(&today, 1.5).await.unwrap();
        assert_eq!(db.usage_for_today().await.unwrap().usage, 1.5);

        // Upsert replaces the day's total.
        db.record_usage(&today, 2.25).await.unwrap();
        assert_eq!(db.usage_for_today().await.unwrap().usage, 2.25);
    }

    #[tokio::test]
    async fn usage_ignores_other_days() {
        let db = test_db().await;
        db.record_usage("1999-12-31", 9.0).await.unwrap();
        assert_eq!(db.usage_for_today().await.unwrap().usage, 0.0);
    }

    // -- report archive -------------------------------------------------------

    #[tokio::test]
    async fn report_create_get_list() {
        let db = test_db().await;

        let created = db
            .insert_report("Week 1", "2024-06-01", "ok", Some("a.png"))
            .await
            .unwrap();
        assert_eq!(created.title, "Week 1");
        assert_eq!(created.image.as_deref(), Some("a.png"));

        let fetched = db.get_report(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.description, "ok");

        assert_eq!(db.list_reports().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn report_create_without_image() {
        let db = test_db().await;
        let created = db
            .insert_report("Week 2", "2024-06-08", "dry soil", None)
            .await
            .unwrap();
        assert!(created.image.is_none());
    }

    #[tokio::test]
    async fn report_update_overwrites_fields() {
        let db = test_db().await;
        let created = db
            .insert_report("Week 1", "2024-06-01", "ok", Some("a.png"))
            .await
            .unwrap();

        let updated = db
            .update_report(created.id, "Week 1b", "2024-06-02", "better", Some("b.png"))
            .await
            .unwrap();
        assert_eq!(updated.title, "Week 1b");
        assert_eq!(updated.image.as_deref(), Some("b.png"));
    }

    #[tokio::test]
    async fn report_delete_removes_the_row() {
        let db = test_db().await;
        let created = db
            .insert_report("Week 1", "2024-06-01", "ok", None)
            .await
            .unwrap();

        db.delete_report(created.id).await.unwrap();
        assert!(db.get_report(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn report_delete_of_missing_id_is_not_an_error() {
        let db = test_db().await;
        db.delete_report(999).await.unwrap();
    }
}
