use coach_core::model::{NewProgram, Program, ProgramId, ProgramPracticeLink, ProgramPracticeLinkId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{db_err, id_i64, map_link_row, rowid, ser};
use crate::repository::{ProgramRepository, StorageError};

#[async_trait::async_trait]
impl ProgramRepository for SqliteRepository {
    async fn get_program(&self, id: ProgramId) -> Result<Program, StorageError> {
        let raw_id = id_i64("program_id", id.value())?;
        let row = sqlx::query("SELECT title FROM programs WHERE id = ?1")
            .bind(raw_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        let title: String = row.try_get("title").map_err(ser)?;

        let link_rows = sqlx::query(
            r"
            SELECT id, program_id, practice_template_id, sequence_order, interval_days_after
            FROM program_practice_links
            WHERE program_id = ?1
            ORDER BY sequence_order ASC
            ",
        )
        .bind(raw_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut links = Vec::with_capacity(link_rows.len());
        for row in &link_rows {
            links.push(map_link_row(row)?);
        }
        Program::from_persisted(id, title, links).map_err(ser)
    }

    async fn insert_program(&self, program: &NewProgram) -> Result<Program, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query("INSERT INTO programs (title) VALUES (?1)")
            .bind(program.title())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let program_id = ProgramId::new(rowid(res.last_insert_rowid())?);

        let mut links = Vec::with_capacity(program.links().len());
        for link in program.links() {
            let template_id = id_i64("practice_template_id", link.practice_template_id.value())?;
            let template = sqlx::query("SELECT 1 FROM practice_templates WHERE id = ?1")
                .bind(template_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            if template.is_none() {
                return Err(StorageError::NotFound);
            }

            let res = sqlx::query(
                r"
                INSERT INTO program_practice_links
                    (program_id, practice_template_id, sequence_order, interval_days_after)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(id_i64("program_id", program_id.value())?)
            .bind(template_id)
            .bind(i64::from(link.sequence_order))
            .bind(i64::from(link.interval_days_after))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            links.push(ProgramPracticeLink {
                id: ProgramPracticeLinkId::new(rowid(res.last_insert_rowid())?),
                program_id,
                practice_template_id: link.practice_template_id,
                sequence_order: link.sequence_order,
                interval_days_after: link.interval_days_after,
            });
        }

        tx.commit().await.map_err(db_err)?;
        Program::from_persisted(program_id, program.title(), links).map_err(ser)
    }
}
