use coach_core::model::{EnrollmentId, NewEnrollment, NewScheduledPractice, ProgramEnrollment, UserId};
use sqlx::sqlite::SqliteExecutor;

use super::mapping::{ENROLLMENT_COLUMNS, db_err, id_i64, map_enrollment_row, rowid};
use super::schedule_repo::insert_scheduled;
use super::{SqliteRepository, instance_repo, lost_race};
use crate::repository::{
    AdvanceCommit, EnrollmentCommit, EnrollmentRepository, StatusChange, StorageError,
};

pub(super) async fn fetch_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<ProgramEnrollment, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM program_enrollments WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
    .map_err(db_err)?
    .ok_or(StorageError::NotFound)?;
    map_enrollment_row(&row)
}

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn get_enrollment(&self, id: EnrollmentId) -> Result<ProgramEnrollment, StorageError> {
        fetch_enrollment(&self.pool, id_i64("enrollment_id", id.value())?).await
    }

    async fn list_enrollments_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<ProgramEnrollment>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM program_enrollments WHERE user_id = ?1 ORDER BY id"
        ))
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(map_enrollment_row(row)?);
        }
        Ok(out)
    }

    async fn create_enrollment(
        &self,
        enrollment: &NewEnrollment,
        first: NewScheduledPractice,
    ) -> Result<EnrollmentCommit, StorageError> {
        let program_id = id_i64("program_id", enrollment.program_id.value())?;
        let link_id = enrollment
            .current_practice_link_id
            .map(|l| id_i64("link_id", l.value()))
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let program = sqlx::query("SELECT 1 FROM programs WHERE id = ?1")
            .bind(program_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if program.is_none() {
            return Err(StorageError::NotFound);
        }
        if let Some(link_id) = link_id {
            let link = sqlx::query(
                "SELECT 1 FROM program_practice_links WHERE id = ?1 AND program_id = ?2",
            )
            .bind(link_id)
            .bind(program_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
            if link.is_none() {
                return Err(StorageError::Serialization(format!(
                    "link {link_id} is not part of program {program_id}"
                )));
            }
        }

        let res = sqlx::query(
            r"
            INSERT INTO program_enrollments
                (program_id, user_id, enrolled_by_user_id, status, current_practice_link_id,
                 revision)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            ",
        )
        .bind(program_id)
        .bind(enrollment.user_id.as_uuid())
        .bind(enrollment.enrolled_by_user_id.as_uuid())
        .bind(enrollment.status.as_str())
        .bind(link_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let raw_id = res.last_insert_rowid();

        let scheduled =
            insert_scheduled(&mut tx, EnrollmentId::new(rowid(raw_id)?), first).await?;
        let created = fetch_enrollment(&mut *tx, raw_id).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(EnrollmentCommit {
            enrollment: created,
            scheduled: Some(scheduled),
        })
    }

    async fn update_status(
        &self,
        change: &StatusChange,
    ) -> Result<ProgramEnrollment, StorageError> {
        let raw_id = id_i64("enrollment_id", change.enrollment_id.value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query(
            r"
            UPDATE program_enrollments
            SET status = ?1, revision = revision + 1
            WHERE id = ?2 AND revision = ?3
            ",
        )
        .bind(change.status.as_str())
        .bind(raw_id)
        .bind(id_i64("revision", change.expected_revision)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(lost_race(&mut tx, raw_id).await);
        }

        if let Some(from) = change.clear_unstarted_from {
            sqlx::query(
                r"
                DELETE FROM scheduled_practices
                WHERE enrollment_id = ?1
                  AND practice_instance_id IS NULL
                  AND scheduled_date >= ?2
                ",
            )
            .bind(raw_id)
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let updated = fetch_enrollment(&mut *tx, raw_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn commit_advance(
        &self,
        commit: &AdvanceCommit,
    ) -> Result<EnrollmentCommit, StorageError> {
        let raw_id = id_i64("enrollment_id", commit.enrollment_id.value())?;
        let link_id = commit
            .current_practice_link_id
            .map(|l| id_i64("link_id", l.value()))
            .transpose()?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query(
            r"
            UPDATE program_enrollments
            SET status = ?1, current_practice_link_id = ?2, revision = revision + 1
            WHERE id = ?3 AND revision = ?4
            ",
        )
        .bind(commit.status.as_str())
        .bind(link_id)
        .bind(raw_id)
        .bind(id_i64("revision", commit.expected_revision)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(lost_race(&mut tx, raw_id).await);
        }

        if let Some((practice_id, completion)) = commit.practice_completion {
            instance_repo::apply_practice_completion(&mut tx, practice_id, completion).await?;
        }

        let scheduled = match commit.schedule {
            Some(new) => Some(insert_scheduled(&mut tx, commit.enrollment_id, new).await?),
            None => None,
        };
        let enrollment = fetch_enrollment(&mut *tx, raw_id).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(EnrollmentCommit {
            enrollment,
            scheduled,
        })
    }
}
