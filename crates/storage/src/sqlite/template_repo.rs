use std::collections::HashMap;

use coach_core::model::{
    MovementTemplate, MovementTemplateId, PracticeOutline, PracticeTemplate, PracticeTemplateId,
    PrescriptionTemplate, PrescriptionTemplateId, SetTemplate, SetTemplateId,
};
use sqlx::{Row, SqlitePool};

use super::SqliteRepository;
use super::mapping::{
    db_err, get_id, id_i64, map_movement_body, map_prescription_body, map_set_body, rowid, ser,
};
use crate::repository::{StorageError, TemplateRepository};

// Subtree filters. Each takes the root id as `?1`.
const SETS_OF_PRACTICE: &str = "movement_template_id IN (
    SELECT m.id FROM movement_templates m
    JOIN prescription_templates p ON p.id = m.prescription_template_id
    WHERE p.practice_template_id = ?1)";
const MOVEMENTS_OF_PRACTICE: &str = "prescription_template_id IN (
    SELECT id FROM prescription_templates WHERE practice_template_id = ?1)";
const SETS_OF_PRESCRIPTION: &str = "movement_template_id IN (
    SELECT id FROM movement_templates WHERE prescription_template_id = ?1)";

async fn load_sets(
    pool: &SqlitePool,
    filter: &str,
    root: i64,
) -> Result<HashMap<MovementTemplateId, Vec<SetTemplate>>, StorageError> {
    let sql = format!(
        "SELECT id, movement_template_id, reps, load_value, load_unit, duration_secs
         FROM set_templates WHERE {filter} ORDER BY position, id"
    );
    let rows = sqlx::query(&sql)
        .bind(root)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

    let mut by_parent: HashMap<MovementTemplateId, Vec<SetTemplate>> = HashMap::new();
    for row in rows {
        by_parent
            .entry(get_id(&row, "movement_template_id", MovementTemplateId::new)?)
            .or_default()
            .push(SetTemplate {
                id: get_id(&row, "id", SetTemplateId::new)?,
                body: map_set_body(&row)?,
            });
    }
    Ok(by_parent)
}

async fn load_movements(
    pool: &SqlitePool,
    filter: &str,
    root: i64,
    mut sets: HashMap<MovementTemplateId, Vec<SetTemplate>>,
) -> Result<HashMap<PrescriptionTemplateId, Vec<MovementTemplate>>, StorageError> {
    let sql = format!(
        "SELECT id, prescription_template_id, movement_class, metric_unit, metric_value
         FROM movement_templates WHERE {filter} ORDER BY position, id"
    );
    let rows = sqlx::query(&sql)
        .bind(root)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

    let mut by_parent: HashMap<PrescriptionTemplateId, Vec<MovementTemplate>> = HashMap::new();
    for row in rows {
        let id = get_id(&row, "id", MovementTemplateId::new)?;
        by_parent
            .entry(get_id(&row, "prescription_template_id", PrescriptionTemplateId::new)?)
            .or_default()
            .push(MovementTemplate {
                id,
                body: map_movement_body(&row)?,
                sets: sets.remove(&id).unwrap_or_default(),
            });
    }
    Ok(by_parent)
}

async fn load_prescriptions(
    pool: &SqlitePool,
    filter: &str,
    root: i64,
    mut movements: HashMap<PrescriptionTemplateId, Vec<MovementTemplate>>,
) -> Result<Vec<PrescriptionTemplate>, StorageError> {
    let sql = format!(
        "SELECT id, block, prescribed_rounds
         FROM prescription_templates WHERE {filter} ORDER BY position, id"
    );
    let rows = sqlx::query(&sql)
        .bind(root)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let id = get_id(&row, "id", PrescriptionTemplateId::new)?;
        out.push(PrescriptionTemplate {
            id,
            body: map_prescription_body(&row)?,
            movements: movements.remove(&id).unwrap_or_default(),
        });
    }
    Ok(out)
}

#[async_trait::async_trait]
impl TemplateRepository for SqliteRepository {
    async fn get_practice_template(
        &self,
        id: PracticeTemplateId,
    ) -> Result<PracticeTemplate, StorageError> {
        let root = id_i64("practice_template_id", id.value())?;
        let row = sqlx::query("SELECT title FROM practice_templates WHERE id = ?1")
            .bind(root)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        let sets = load_sets(&self.pool, SETS_OF_PRACTICE, root).await?;
        let movements = load_movements(&self.pool, MOVEMENTS_OF_PRACTICE, root, sets).await?;
        let prescriptions =
            load_prescriptions(&self.pool, "practice_template_id = ?1", root, movements).await?;

        Ok(PracticeTemplate {
            id,
            title: row.try_get("title").map_err(ser)?,
            prescriptions,
        })
    }

    async fn get_prescription_template(
        &self,
        id: PrescriptionTemplateId,
    ) -> Result<PrescriptionTemplate, StorageError> {
        let root = id_i64("prescription_template_id", id.value())?;
        let sets = load_sets(&self.pool, SETS_OF_PRESCRIPTION, root).await?;
        let movements =
            load_movements(&self.pool, "prescription_template_id = ?1", root, sets).await?;
        load_prescriptions(&self.pool, "id = ?1", root, movements)
            .await?
            .pop()
            .ok_or(StorageError::NotFound)
    }

    async fn get_movement_template(
        &self,
        id: MovementTemplateId,
    ) -> Result<MovementTemplate, StorageError> {
        let root = id_i64("movement_template_id", id.value())?;
        let sets = load_sets(&self.pool, "movement_template_id = ?1", root).await?;
        load_movements(&self.pool, "id = ?1", root, sets)
            .await?
            .into_values()
            .flatten()
            .next()
            .ok_or(StorageError::NotFound)
    }

    async fn get_set_template(&self, id: SetTemplateId) -> Result<SetTemplate, StorageError> {
        let root = id_i64("set_template_id", id.value())?;
        load_sets(&self.pool, "id = ?1", root)
            .await?
            .into_values()
            .flatten()
            .next()
            .ok_or(StorageError::NotFound)
    }

    async fn insert_practice_template(
        &self,
        outline: &PracticeOutline,
    ) -> Result<PracticeTemplate, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query("INSERT INTO practice_templates (title) VALUES (?1)")
            .bind(&outline.title)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let practice_id = res.last_insert_rowid();

        let mut prescriptions = Vec::with_capacity(outline.prescriptions.len());
        for (p_pos, p) in (0_i64..).zip(&outline.prescriptions) {
            let res = sqlx::query(
                r"
                INSERT INTO prescription_templates
                    (practice_template_id, position, block, prescribed_rounds)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(practice_id)
            .bind(p_pos)
            .bind(&p.body.block)
            .bind(p.body.prescribed_rounds.map(i64::from))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            let prescription_id = res.last_insert_rowid();

            let mut movements = Vec::with_capacity(p.movements.len());
            for (m_pos, m) in (0_i64..).zip(&p.movements) {
                let res = sqlx::query(
                    r"
                    INSERT INTO movement_templates
                        (prescription_template_id, position, movement_class, metric_unit,
                         metric_value)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ",
                )
                .bind(prescription_id)
                .bind(m_pos)
                .bind(&m.body.movement_class)
                .bind(m.body.metric_unit.as_deref())
                .bind(m.body.metric_value)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                let movement_id = res.last_insert_rowid();

                let mut sets = Vec::with_capacity(m.sets.len());
                for (s_pos, body) in (0_i64..).zip(&m.sets) {
                    let res = sqlx::query(
                        r"
                        INSERT INTO set_templates
                            (movement_template_id, position, reps, load_value, load_unit,
                             duration_secs)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        ",
                    )
                    .bind(movement_id)
                    .bind(s_pos)
                    .bind(body.reps.map(i64::from))
                    .bind(body.load_value)
                    .bind(body.load_unit.as_deref())
                    .bind(body.duration_secs.map(i64::from))
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                    sets.push(SetTemplate {
                        id: SetTemplateId::new(rowid(res.last_insert_rowid())?),
                        body: body.clone(),
                    });
                }

                movements.push(MovementTemplate {
                    id: MovementTemplateId::new(rowid(movement_id)?),
                    body: m.body.clone(),
                    sets,
                });
            }

            prescriptions.push(PrescriptionTemplate {
                id: PrescriptionTemplateId::new(rowid(prescription_id)?),
                body: p.body.clone(),
                movements,
            });
        }

        tx.commit().await.map_err(db_err)?;

        Ok(PracticeTemplate {
            id: PracticeTemplateId::new(rowid(practice_id)?),
            title: outline.title.clone(),
            prescriptions,
        })
    }
}
