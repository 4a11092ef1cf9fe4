use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Schema version 1, one statement per entry.
///
/// Templates and programs, enrollments with their scheduled rows, and the
/// instance hierarchy. Completion columns carry a check that `completed_at`
/// is set exactly when `complete` is.
const V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS practice_templates (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS prescription_templates (
            id INTEGER PRIMARY KEY,
            practice_template_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            block TEXT NOT NULL,
            prescribed_rounds INTEGER CHECK (prescribed_rounds >= 0),
            FOREIGN KEY (practice_template_id) REFERENCES practice_templates(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS movement_templates (
            id INTEGER PRIMARY KEY,
            prescription_template_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            movement_class TEXT NOT NULL,
            metric_unit TEXT,
            metric_value REAL CHECK (metric_value >= 0),
            FOREIGN KEY (prescription_template_id)
                REFERENCES prescription_templates(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS set_templates (
            id INTEGER PRIMARY KEY,
            movement_template_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            reps INTEGER CHECK (reps >= 0),
            load_value REAL CHECK (load_value >= 0),
            load_unit TEXT,
            duration_secs INTEGER CHECK (duration_secs >= 0),
            FOREIGN KEY (movement_template_id) REFERENCES movement_templates(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS programs (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS program_practice_links (
            id INTEGER PRIMARY KEY,
            program_id INTEGER NOT NULL,
            practice_template_id INTEGER NOT NULL,
            sequence_order INTEGER NOT NULL CHECK (sequence_order >= 0),
            interval_days_after INTEGER NOT NULL CHECK (interval_days_after >= 0),
            UNIQUE (program_id, sequence_order),
            FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE,
            FOREIGN KEY (practice_template_id) REFERENCES practice_templates(id)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS program_enrollments (
            id INTEGER PRIMARY KEY,
            program_id INTEGER NOT NULL,
            user_id BLOB NOT NULL,
            enrolled_by_user_id BLOB NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'active', 'inactive', 'completed', 'cancelled')),
            current_practice_link_id INTEGER,
            revision INTEGER NOT NULL DEFAULT 0 CHECK (revision >= 0),
            CHECK (status <> 'completed' OR current_practice_link_id IS NULL),
            FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE,
            FOREIGN KEY (current_practice_link_id) REFERENCES program_practice_links(id)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS practice_instances (
            id INTEGER PRIMARY KEY,
            template_id INTEGER,
            user_id BLOB NOT NULL,
            practice_date TEXT NOT NULL,
            title TEXT NOT NULL,
            complete INTEGER NOT NULL DEFAULT 0 CHECK (complete IN (0, 1)),
            completed_at TEXT,
            CHECK ((complete = 1) = (completed_at IS NOT NULL)),
            FOREIGN KEY (template_id) REFERENCES practice_templates(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS prescription_instances (
            id INTEGER PRIMARY KEY,
            practice_id INTEGER NOT NULL,
            template_id INTEGER,
            position INTEGER NOT NULL CHECK (position >= 0),
            block TEXT NOT NULL,
            prescribed_rounds INTEGER CHECK (prescribed_rounds >= 0),
            complete INTEGER NOT NULL DEFAULT 0 CHECK (complete IN (0, 1)),
            completed_at TEXT,
            CHECK ((complete = 1) = (completed_at IS NOT NULL)),
            FOREIGN KEY (practice_id) REFERENCES practice_instances(id) ON DELETE CASCADE,
            FOREIGN KEY (template_id) REFERENCES prescription_templates(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS movement_instances (
            id INTEGER PRIMARY KEY,
            prescription_id INTEGER NOT NULL,
            template_id INTEGER,
            position INTEGER NOT NULL CHECK (position >= 0),
            movement_class TEXT NOT NULL,
            metric_unit TEXT,
            metric_value REAL CHECK (metric_value >= 0),
            complete INTEGER NOT NULL DEFAULT 0 CHECK (complete IN (0, 1)),
            completed_at TEXT,
            CHECK ((complete = 1) = (completed_at IS NOT NULL)),
            FOREIGN KEY (prescription_id) REFERENCES prescription_instances(id) ON DELETE CASCADE,
            FOREIGN KEY (template_id) REFERENCES movement_templates(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS set_instances (
            id INTEGER PRIMARY KEY,
            movement_id INTEGER NOT NULL,
            template_id INTEGER,
            position INTEGER NOT NULL CHECK (position >= 0),
            reps INTEGER CHECK (reps >= 0),
            load_value REAL CHECK (load_value >= 0),
            load_unit TEXT,
            duration_secs INTEGER CHECK (duration_secs >= 0),
            complete INTEGER NOT NULL DEFAULT 0 CHECK (complete IN (0, 1)),
            completed_at TEXT,
            CHECK ((complete = 1) = (completed_at IS NOT NULL)),
            FOREIGN KEY (movement_id) REFERENCES movement_instances(id) ON DELETE CASCADE,
            FOREIGN KEY (template_id) REFERENCES set_templates(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS scheduled_practices (
            id INTEGER PRIMARY KEY,
            enrollment_id INTEGER NOT NULL,
            practice_template_id INTEGER NOT NULL,
            practice_instance_id INTEGER,
            scheduled_date TEXT NOT NULL,
            FOREIGN KEY (enrollment_id) REFERENCES program_enrollments(id) ON DELETE CASCADE,
            FOREIGN KEY (practice_template_id) REFERENCES practice_templates(id),
            FOREIGN KEY (practice_instance_id) REFERENCES practice_instances(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_scheduled_enrollment_date
            ON scheduled_practices (enrollment_id, scheduled_date, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_enrollments_user
            ON program_enrollments (user_id, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_prescription_instances_practice
            ON prescription_instances (practice_id, position, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_movement_instances_prescription
            ON movement_instances (prescription_id, position, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_set_instances_movement
            ON set_instances (movement_id, position, id);
    ",
];

/// Runs the versioned migrations that are not yet recorded.
///
/// Each version is applied in its own transaction together with its
/// `schema_migrations` row.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    for (version, statements) in [(1_i64, V1)] {
        if is_applied(pool, version).await? {
            continue;
        }
        let mut tx = pool.begin().await?;

        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(())
}
