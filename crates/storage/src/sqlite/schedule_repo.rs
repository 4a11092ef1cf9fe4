use chrono::NaiveDate;
use coach_core::model::{
    DateShift, EnrollmentId, NewPracticeInstance, NewScheduledPractice, PracticeInstance,
    ProgramEnrollment, ScheduledPractice, ScheduledPracticeId,
};
use sqlx::{Row, SqliteConnection};

use super::enrollment_repo::fetch_enrollment;
use super::mapping::{SCHEDULED_COLUMNS, db_err, id_i64, map_scheduled_row, rowid, ser};
use super::{SqliteRepository, instance_repo, lost_race};
use crate::repository::{ScheduleRepository, StorageError};

/// Insert one scheduled row on `conn`; the caller owns the transaction.
pub(super) async fn insert_scheduled(
    conn: &mut SqliteConnection,
    enrollment_id: EnrollmentId,
    new: NewScheduledPractice,
) -> Result<ScheduledPractice, StorageError> {
    let template_id = id_i64("practice_template_id", new.practice_template_id.value())?;
    let template = sqlx::query("SELECT 1 FROM practice_templates WHERE id = ?1")
        .bind(template_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    if template.is_none() {
        return Err(StorageError::NotFound);
    }

    let res = sqlx::query(
        r"
        INSERT INTO scheduled_practices (enrollment_id, practice_template_id, scheduled_date)
        VALUES (?1, ?2, ?3)
        ",
    )
    .bind(id_i64("enrollment_id", enrollment_id.value())?)
    .bind(template_id)
    .bind(new.scheduled_date)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(ScheduledPractice {
        id: ScheduledPracticeId::new(rowid(res.last_insert_rowid())?),
        enrollment_id,
        practice_template_id: new.practice_template_id,
        practice_instance_id: None,
        scheduled_date: new.scheduled_date,
    })
}

fn map_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ScheduledPractice>, StorageError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(map_scheduled_row(row)?);
    }
    Ok(out)
}

#[async_trait::async_trait]
impl ScheduleRepository for SqliteRepository {
    async fn list_scheduled(
        &self,
        enrollment_ids: &[EnrollmentId],
        from: NaiveDate,
    ) -> Result<Vec<ScheduledPractice>, StorageError> {
        if enrollment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (2..enrollment_ids.len() + 2)
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {SCHEDULED_COLUMNS} FROM scheduled_practices
             WHERE scheduled_date >= ?1 AND enrollment_id IN ({placeholders})
             ORDER BY scheduled_date, id"
        );

        let mut query = sqlx::query(&sql).bind(from);
        for id in enrollment_ids {
            query = query.bind(id_i64("enrollment_id", id.value())?);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        map_rows(&rows)
    }

    async fn list_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<ScheduledPractice>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULED_COLUMNS} FROM scheduled_practices
             WHERE enrollment_id = ?1 ORDER BY scheduled_date, id"
        ))
        .bind(id_i64("enrollment_id", enrollment_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        map_rows(&rows)
    }

    async fn get_scheduled(
        &self,
        id: ScheduledPracticeId,
    ) -> Result<ScheduledPractice, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SCHEDULED_COLUMNS} FROM scheduled_practices WHERE id = ?1"
        ))
        .bind(id_i64("scheduled_practice_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::NotFound)?;
        map_scheduled_row(&row)
    }

    async fn apply_deferral(
        &self,
        enrollment_id: EnrollmentId,
        expected_revision: u64,
        shifts: &[DateShift],
    ) -> Result<ProgramEnrollment, StorageError> {
        let raw_id = id_i64("enrollment_id", enrollment_id.value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query(
            "UPDATE program_enrollments SET revision = revision + 1 WHERE id = ?1 AND revision = ?2",
        )
        .bind(raw_id)
        .bind(id_i64("revision", expected_revision)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(lost_race(&mut tx, raw_id).await);
        }

        for shift in shifts {
            let res = sqlx::query(
                r"
                UPDATE scheduled_practices
                SET scheduled_date = ?1
                WHERE id = ?2 AND enrollment_id = ?3
                ",
            )
            .bind(shift.to)
            .bind(id_i64("scheduled_practice_id", shift.id.value())?)
            .bind(raw_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(StorageError::NotFound);
            }
        }

        let updated = fetch_enrollment(&mut *tx, raw_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn start_scheduled(
        &self,
        id: ScheduledPracticeId,
        practice: &NewPracticeInstance,
    ) -> Result<PracticeInstance, StorageError> {
        let raw_id = id_i64("scheduled_practice_id", id.value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT practice_instance_id FROM scheduled_practices WHERE id = ?1")
            .bind(raw_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        let linked: Option<i64> = row.try_get("practice_instance_id").map_err(ser)?;
        if linked.is_some() {
            return Err(StorageError::Conflict);
        }

        let tree = instance_repo::insert_practice(&mut tx, practice).await?;

        let res = sqlx::query(
            r"
            UPDATE scheduled_practices
            SET practice_instance_id = ?1
            WHERE id = ?2 AND practice_instance_id IS NULL
            ",
        )
        .bind(id_i64("practice_instance_id", tree.id.value())?)
        .bind(raw_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(tree)
    }
}
