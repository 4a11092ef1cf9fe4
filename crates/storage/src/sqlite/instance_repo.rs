use std::collections::HashMap;

use chrono::{DateTime, Utc};
use coach_core::cascade::{
    CascadeEdit, InstanceWrite, MovementSnapshot, MovementSummary, PrescriptionSnapshot, SetState,
    plan_edit,
};
use coach_core::model::{
    Completion, InstanceNode, MovementInstance, MovementInstanceId, MovementTemplateId,
    NewMovementInstance, NewPracticeInstance, NewPrescriptionInstance, NewSetInstance,
    PracticeHeader, PracticeInstance, PracticeInstanceId, PracticeTemplateId,
    PrescriptionInstance, PrescriptionInstanceId, PrescriptionTemplateId, SetInstance,
    SetInstanceId, SetTemplateId, UserId,
};
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{
    db_err, get_completion, get_id, get_opt_id, get_u32, get_user, id_i64, map_movement_body,
    map_prescription_body, map_set_body, rowid, ser,
};
use crate::repository::{Cascaded, InstanceRepository, StorageError};

/// Takes the database write lock up front, so edits of one tree serialize.
const WRITE_LOCK: &str = "BEGIN IMMEDIATE";

//
// ─── INSERTS ───────────────────────────────────────────────────────────────────
//

/// Insert a whole session tree on `conn`; the caller owns the transaction.
pub(super) async fn insert_practice(
    conn: &mut SqliteConnection,
    new: &NewPracticeInstance,
) -> Result<PracticeInstance, StorageError> {
    let template_id = new
        .template_id
        .map(|t| id_i64("practice_template_id", t.value()))
        .transpose()?;
    let res = sqlx::query(
        r"
        INSERT INTO practice_instances (template_id, user_id, practice_date, title)
        VALUES (?1, ?2, ?3, ?4)
        ",
    )
    .bind(template_id)
    .bind(new.user_id.as_uuid())
    .bind(new.practice_date)
    .bind(&new.title)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    let id = PracticeInstanceId::new(rowid(res.last_insert_rowid())?);

    let mut prescriptions = Vec::with_capacity(new.prescriptions.len());
    for (position, child) in (0_u32..).zip(&new.prescriptions) {
        prescriptions.push(insert_prescription_at(conn, id, position, child).await?);
    }

    Ok(PracticeInstance {
        id,
        template_id: new.template_id,
        user_id: new.user_id,
        practice_date: new.practice_date,
        title: new.title.clone(),
        completion: Completion::incomplete(),
        prescriptions,
    })
}

async fn insert_prescription_at(
    conn: &mut SqliteConnection,
    practice_id: PracticeInstanceId,
    position: u32,
    new: &NewPrescriptionInstance,
) -> Result<PrescriptionInstance, StorageError> {
    let template_id = new
        .template_id
        .map(|t| id_i64("prescription_template_id", t.value()))
        .transpose()?;
    let res = sqlx::query(
        r"
        INSERT INTO prescription_instances
            (practice_id, template_id, position, block, prescribed_rounds)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
    )
    .bind(id_i64("practice_id", practice_id.value())?)
    .bind(template_id)
    .bind(i64::from(position))
    .bind(&new.body.block)
    .bind(new.body.prescribed_rounds.map(i64::from))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    let id = PrescriptionInstanceId::new(rowid(res.last_insert_rowid())?);

    let mut movements = Vec::with_capacity(new.movements.len());
    for (child_position, child) in (0_u32..).zip(&new.movements) {
        movements.push(insert_movement_at(conn, id, child_position, child).await?);
    }

    Ok(PrescriptionInstance {
        id,
        practice_id,
        template_id: new.template_id,
        position,
        body: new.body.clone(),
        completion: Completion::incomplete(),
        movements,
    })
}

async fn insert_movement_at(
    conn: &mut SqliteConnection,
    prescription_id: PrescriptionInstanceId,
    position: u32,
    new: &NewMovementInstance,
) -> Result<MovementInstance, StorageError> {
    let template_id = new
        .template_id
        .map(|t| id_i64("movement_template_id", t.value()))
        .transpose()?;
    let res = sqlx::query(
        r"
        INSERT INTO movement_instances
            (prescription_id, template_id, position, movement_class, metric_unit, metric_value)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
    )
    .bind(id_i64("prescription_id", prescription_id.value())?)
    .bind(template_id)
    .bind(i64::from(position))
    .bind(&new.body.movement_class)
    .bind(new.body.metric_unit.as_deref())
    .bind(new.body.metric_value)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    let id = MovementInstanceId::new(rowid(res.last_insert_rowid())?);

    let mut sets = Vec::with_capacity(new.sets.len());
    for (child_position, child) in (0_u32..).zip(&new.sets) {
        sets.push(insert_set_at(conn, id, child_position, child).await?);
    }

    Ok(MovementInstance {
        id,
        prescription_id,
        template_id: new.template_id,
        position,
        body: new.body.clone(),
        completion: Completion::incomplete(),
        sets,
    })
}

async fn insert_set_at(
    conn: &mut SqliteConnection,
    movement_id: MovementInstanceId,
    position: u32,
    new: &NewSetInstance,
) -> Result<SetInstance, StorageError> {
    let template_id = new
        .template_id
        .map(|t| id_i64("set_template_id", t.value()))
        .transpose()?;
    let res = sqlx::query(
        r"
        INSERT INTO set_instances
            (movement_id, template_id, position, reps, load_value, load_unit, duration_secs)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
    )
    .bind(id_i64("movement_id", movement_id.value())?)
    .bind(template_id)
    .bind(i64::from(position))
    .bind(new.body.reps.map(i64::from))
    .bind(new.body.load_value)
    .bind(new.body.load_unit.as_deref())
    .bind(new.body.duration_secs.map(i64::from))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(SetInstance {
        id: SetInstanceId::new(rowid(res.last_insert_rowid())?),
        movement_id,
        template_id: new.template_id,
        position,
        body: new.body.clone(),
        completion: Completion::incomplete(),
    })
}

/// Position after the last child of `parent_id` in `child_table`, or `NotFound`
/// when the parent row does not exist.
async fn append_position(
    conn: &mut SqliteConnection,
    parent_table: &str,
    child_table: &str,
    parent_column: &str,
    parent_id: i64,
) -> Result<u32, StorageError> {
    let parent = sqlx::query(&format!("SELECT 1 FROM {parent_table} WHERE id = ?1"))
        .bind(parent_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    if parent.is_none() {
        return Err(StorageError::NotFound);
    }

    let row = sqlx::query(&format!(
        "SELECT COALESCE(MAX(position) + 1, 0) AS next FROM {child_table} WHERE {parent_column} = ?1"
    ))
    .bind(parent_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)?;
    get_u32(&row, "next")
}

//
// ─── LOADERS ───────────────────────────────────────────────────────────────────
//

const SET_COLUMNS: &str = "id, movement_id, template_id, position, reps, load_value, load_unit, \
     duration_secs, complete, completed_at";

fn map_set_row(row: &sqlx::sqlite::SqliteRow) -> Result<SetInstance, StorageError> {
    Ok(SetInstance {
        id: get_id(row, "id", SetInstanceId::new)?,
        movement_id: get_id(row, "movement_id", MovementInstanceId::new)?,
        template_id: get_opt_id(row, "template_id", SetTemplateId::new)?,
        position: get_u32(row, "position")?,
        body: map_set_body(row)?,
        completion: get_completion(row)?,
    })
}

async fn load_sets(
    conn: &mut SqliteConnection,
    filter: &str,
    root: i64,
) -> Result<HashMap<MovementInstanceId, Vec<SetInstance>>, StorageError> {
    let sql =
        format!("SELECT {SET_COLUMNS} FROM set_instances WHERE {filter} ORDER BY position, id");
    let rows = sqlx::query(&sql)
        .bind(root)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

    let mut by_parent: HashMap<MovementInstanceId, Vec<SetInstance>> = HashMap::new();
    for row in rows {
        let set = map_set_row(&row)?;
        by_parent.entry(set.movement_id).or_default().push(set);
    }
    Ok(by_parent)
}

async fn load_movements(
    conn: &mut SqliteConnection,
    filter: &str,
    root: i64,
    mut sets: HashMap<MovementInstanceId, Vec<SetInstance>>,
) -> Result<HashMap<PrescriptionInstanceId, Vec<MovementInstance>>, StorageError> {
    let sql = format!(
        "SELECT id, prescription_id, template_id, position, movement_class, metric_unit,
                metric_value, complete, completed_at
         FROM movement_instances WHERE {filter} ORDER BY position, id"
    );
    let rows = sqlx::query(&sql)
        .bind(root)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

    let mut by_parent: HashMap<PrescriptionInstanceId, Vec<MovementInstance>> = HashMap::new();
    for row in rows {
        let id = get_id(&row, "id", MovementInstanceId::new)?;
        let prescription_id = get_id(&row, "prescription_id", PrescriptionInstanceId::new)?;
        by_parent
            .entry(prescription_id)
            .or_default()
            .push(MovementInstance {
                id,
                prescription_id,
                template_id: get_opt_id(&row, "template_id", MovementTemplateId::new)?,
                position: get_u32(&row, "position")?,
                body: map_movement_body(&row)?,
                completion: get_completion(&row)?,
                sets: sets.remove(&id).unwrap_or_default(),
            });
    }
    Ok(by_parent)
}

async fn load_prescriptions(
    conn: &mut SqliteConnection,
    filter: &str,
    root: i64,
    mut movements: HashMap<PrescriptionInstanceId, Vec<MovementInstance>>,
) -> Result<Vec<PrescriptionInstance>, StorageError> {
    let sql = format!(
        "SELECT id, practice_id, template_id, position, block, prescribed_rounds, complete,
                completed_at
         FROM prescription_instances WHERE {filter} ORDER BY position, id"
    );
    let rows = sqlx::query(&sql)
        .bind(root)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let id = get_id(&row, "id", PrescriptionInstanceId::new)?;
        out.push(PrescriptionInstance {
            id,
            practice_id: get_id(&row, "practice_id", PracticeInstanceId::new)?,
            template_id: get_opt_id(&row, "template_id", PrescriptionTemplateId::new)?,
            position: get_u32(&row, "position")?,
            body: map_prescription_body(&row)?,
            completion: get_completion(&row)?,
            movements: movements.remove(&id).unwrap_or_default(),
        });
    }
    Ok(out)
}

async fn load_header(conn: &mut SqliteConnection, id: i64) -> Result<PracticeHeader, StorageError> {
    let row = sqlx::query(
        r"
        SELECT id, template_id, user_id, practice_date, title, complete, completed_at
        FROM practice_instances
        WHERE id = ?1
        ",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?
    .ok_or(StorageError::NotFound)?;

    Ok(PracticeHeader {
        id: get_id(&row, "id", PracticeInstanceId::new)?,
        template_id: get_opt_id(&row, "template_id", PracticeTemplateId::new)?,
        user_id: get_user(&row, "user_id")?,
        practice_date: row.try_get("practice_date").map_err(ser)?,
        title: row.try_get("title").map_err(ser)?,
        completion: get_completion(&row)?,
    })
}

//
// ─── CASCADE ───────────────────────────────────────────────────────────────────
//

async fn movement_snapshot(
    conn: &mut SqliteConnection,
    id: MovementInstanceId,
) -> Result<MovementSnapshot, StorageError> {
    let root = id_i64("movement_id", id.value())?;
    let row = sqlx::query(
        "SELECT id, prescription_id, complete, completed_at FROM movement_instances WHERE id = ?1",
    )
    .bind(root)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?
    .ok_or(StorageError::NotFound)?;

    let set_rows = sqlx::query(
        r"
        SELECT id, complete, completed_at
        FROM set_instances
        WHERE movement_id = ?1
        ORDER BY position, id
        ",
    )
    .bind(root)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let mut sets = Vec::with_capacity(set_rows.len());
    for set in &set_rows {
        sets.push(SetState {
            id: get_id(set, "id", SetInstanceId::new)?,
            completion: get_completion(set)?,
        });
    }

    Ok(MovementSnapshot {
        id,
        prescription_id: get_id(&row, "prescription_id", PrescriptionInstanceId::new)?,
        completion: get_completion(&row)?,
        sets,
    })
}

async fn prescription_snapshot(
    conn: &mut SqliteConnection,
    id: PrescriptionInstanceId,
) -> Result<PrescriptionSnapshot, StorageError> {
    let root = id_i64("prescription_id", id.value())?;
    let row = sqlx::query(
        "SELECT id, practice_id, complete, completed_at FROM prescription_instances WHERE id = ?1",
    )
    .bind(root)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?
    .ok_or(StorageError::NotFound)?;

    let movement_rows = sqlx::query(
        r"
        SELECT m.id, m.complete, m.completed_at,
               (SELECT COUNT(*) FROM set_instances s WHERE s.movement_id = m.id) AS set_count
        FROM movement_instances m
        WHERE m.prescription_id = ?1
        ORDER BY m.position, m.id
        ",
    )
    .bind(root)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let mut movements = Vec::with_capacity(movement_rows.len());
    for m in &movement_rows {
        movements.push(MovementSummary {
            id: get_id(m, "id", MovementInstanceId::new)?,
            completion: get_completion(m)?,
            set_count: get_u32(m, "set_count")?,
        });
    }

    Ok(PrescriptionSnapshot {
        id,
        practice_id: get_id(&row, "practice_id", PracticeInstanceId::new)?,
        completion: get_completion(&row)?,
        movements,
    })
}

async fn parent_movement(
    conn: &mut SqliteConnection,
    set: SetInstanceId,
) -> Result<MovementInstanceId, StorageError> {
    let row = sqlx::query("SELECT movement_id FROM set_instances WHERE id = ?1")
        .bind(id_i64("set_id", set.value())?)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
        .ok_or(StorageError::NotFound)?;
    get_id(&row, "movement_id", MovementInstanceId::new)
}

/// Plan `edit` against rows read on `conn` and apply the writes there.
///
/// The caller holds the write lock (`BEGIN IMMEDIATE`) for the whole call, so
/// the snapshots cannot go stale before the writes land.
async fn cascade(
    conn: &mut SqliteConnection,
    edit: CascadeEdit,
    now: DateTime<Utc>,
) -> Result<Vec<InstanceWrite>, StorageError> {
    let movement_id = match edit {
        CascadeEdit::Prescription(_) => None,
        CascadeEdit::Movement(id) => Some(id),
        CascadeEdit::SetCompletion { set, .. } | CascadeEdit::DeleteSet(set) => {
            Some(parent_movement(conn, set).await?)
        }
    };
    let movement = match movement_id {
        Some(id) => Some(movement_snapshot(conn, id).await?),
        None => None,
    };
    let prescription_id = match (&movement, edit) {
        (Some(m), _) => m.prescription_id,
        (None, CascadeEdit::Prescription(id)) => id,
        (None, _) => return Err(StorageError::NotFound),
    };
    let prescription = prescription_snapshot(conn, prescription_id).await?;

    let writes = plan_edit(edit, prescription, movement, now).map_err(ser)?;
    for write in &writes {
        apply_write(conn, write).await?;
    }
    Ok(writes)
}

/// Apply one instance write; zero affected rows means the target is gone.
async fn apply_write(
    conn: &mut SqliteConnection,
    write: &InstanceWrite,
) -> Result<(), StorageError> {
    let (table, id, completion) = match *write {
        InstanceWrite::SetCompletion { id, completion } => {
            ("set_instances", id.value(), completion)
        }
        InstanceWrite::MovementCompletion { id, completion } => {
            ("movement_instances", id.value(), completion)
        }
        InstanceWrite::PrescriptionCompletion { id, completion } => {
            ("prescription_instances", id.value(), completion)
        }
        InstanceWrite::PracticeCompletion { id, completion } => {
            ("practice_instances", id.value(), completion)
        }
        InstanceWrite::DeleteSet { id } => {
            let res = sqlx::query("DELETE FROM set_instances WHERE id = ?1")
                .bind(id_i64("set_id", id.value())?)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            return if res.rows_affected() == 0 {
                Err(StorageError::NotFound)
            } else {
                Ok(())
            };
        }
    };

    let res = sqlx::query(&format!(
        "UPDATE {table} SET complete = ?1, completed_at = ?2 WHERE id = ?3"
    ))
    .bind(completion.is_complete())
    .bind(completion.completed_at())
    .bind(id_i64("instance_id", id)?)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

pub(super) async fn apply_practice_completion(
    conn: &mut SqliteConnection,
    id: PracticeInstanceId,
    completion: Completion,
) -> Result<(), StorageError> {
    apply_write(conn, &InstanceWrite::PracticeCompletion { id, completion }).await
}

#[async_trait::async_trait]
impl InstanceRepository for SqliteRepository {
    async fn insert_practice_tree(
        &self,
        practice: &NewPracticeInstance,
    ) -> Result<PracticeInstance, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let tree = insert_practice(&mut tx, practice).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(tree)
    }

    async fn append_prescription(
        &self,
        practice_id: PracticeInstanceId,
        node: &NewPrescriptionInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<PrescriptionInstance>, StorageError> {
        let mut tx = self.pool.begin_with(WRITE_LOCK).await.map_err(db_err)?;
        let position = append_position(
            &mut tx,
            "practice_instances",
            "prescription_instances",
            "practice_id",
            id_i64("practice_id", practice_id.value())?,
        )
        .await?;
        let built = insert_prescription_at(&mut tx, practice_id, position, node).await?;
        let writes = cascade(&mut tx, CascadeEdit::Prescription(built.id), now).await?;

        let root = id_i64("prescription_id", built.id.value())?;
        let sets = load_sets(
            &mut tx,
            "movement_id IN (SELECT id FROM movement_instances WHERE prescription_id = ?1)",
            root,
        )
        .await?;
        let movements = load_movements(&mut tx, "prescription_id = ?1", root, sets).await?;
        let node = load_prescriptions(&mut tx, "id = ?1", root, movements)
            .await?
            .pop()
            .ok_or(StorageError::NotFound)?;
        tx.commit().await.map_err(db_err)?;
        Ok(Cascaded { node, writes })
    }

    async fn append_movement(
        &self,
        prescription_id: PrescriptionInstanceId,
        node: &NewMovementInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<MovementInstance>, StorageError> {
        let mut tx = self.pool.begin_with(WRITE_LOCK).await.map_err(db_err)?;
        let position = append_position(
            &mut tx,
            "prescription_instances",
            "movement_instances",
            "prescription_id",
            id_i64("prescription_id", prescription_id.value())?,
        )
        .await?;
        let built = insert_movement_at(&mut tx, prescription_id, position, node).await?;
        let writes = cascade(&mut tx, CascadeEdit::Movement(built.id), now).await?;

        let root = id_i64("movement_id", built.id.value())?;
        let sets = load_sets(&mut tx, "movement_id = ?1", root).await?;
        let node = load_movements(&mut tx, "id = ?1", root, sets)
            .await?
            .remove(&prescription_id)
            .and_then(|mut movements| movements.pop())
            .ok_or(StorageError::NotFound)?;
        tx.commit().await.map_err(db_err)?;
        Ok(Cascaded { node, writes })
    }

    async fn append_set(
        &self,
        movement_id: MovementInstanceId,
        node: &NewSetInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<SetInstance>, StorageError> {
        let mut tx = self.pool.begin_with(WRITE_LOCK).await.map_err(db_err)?;
        let position = append_position(
            &mut tx,
            "movement_instances",
            "set_instances",
            "movement_id",
            id_i64("movement_id", movement_id.value())?,
        )
        .await?;
        let node = insert_set_at(&mut tx, movement_id, position, node).await?;
        let writes = cascade(&mut tx, CascadeEdit::Movement(movement_id), now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(Cascaded { node, writes })
    }

    async fn get_practice_tree(
        &self,
        id: PracticeInstanceId,
    ) -> Result<PracticeInstance, StorageError> {
        let root = id_i64("practice_id", id.value())?;
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let header = load_header(&mut conn, root).await?;

        let sets = load_sets(
            &mut conn,
            "movement_id IN (
                SELECT m.id FROM movement_instances m
                JOIN prescription_instances p ON p.id = m.prescription_id
                WHERE p.practice_id = ?1)",
            root,
        )
        .await?;
        let movements = load_movements(
            &mut conn,
            "prescription_id IN (SELECT id FROM prescription_instances WHERE practice_id = ?1)",
            root,
            sets,
        )
        .await?;
        let prescriptions =
            load_prescriptions(&mut conn, "practice_id = ?1", root, movements).await?;

        Ok(PracticeInstance {
            id: header.id,
            template_id: header.template_id,
            user_id: header.user_id,
            practice_date: header.practice_date,
            title: header.title,
            completion: header.completion,
            prescriptions,
        })
    }

    async fn get_practice_header(
        &self,
        id: PracticeInstanceId,
    ) -> Result<PracticeHeader, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_header(&mut conn, id_i64("practice_id", id.value())?).await
    }

    async fn get_set(&self, id: SetInstanceId) -> Result<SetInstance, StorageError> {
        let row = sqlx::query(&format!("SELECT {SET_COLUMNS} FROM set_instances WHERE id = ?1"))
            .bind(id_i64("set_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        map_set_row(&row)
    }

    async fn instance_owner(&self, node: InstanceNode) -> Result<UserId, StorageError> {
        let sql = match node {
            InstanceNode::Practice(_) => "SELECT user_id FROM practice_instances WHERE id = ?1",
            InstanceNode::Prescription(_) => {
                r"
                SELECT pi.user_id FROM practice_instances pi
                JOIN prescription_instances p ON p.practice_id = pi.id
                WHERE p.id = ?1
                "
            }
            InstanceNode::Movement(_) => {
                r"
                SELECT pi.user_id FROM practice_instances pi
                JOIN prescription_instances p ON p.practice_id = pi.id
                JOIN movement_instances m ON m.prescription_id = p.id
                WHERE m.id = ?1
                "
            }
            InstanceNode::Set(_) => {
                r"
                SELECT pi.user_id FROM practice_instances pi
                JOIN prescription_instances p ON p.practice_id = pi.id
                JOIN movement_instances m ON m.prescription_id = p.id
                JOIN set_instances s ON s.movement_id = m.id
                WHERE s.id = ?1
                "
            }
        };
        let row = sqlx::query(sql)
            .bind(id_i64("instance_id", node.raw_id())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;
        get_user(&row, "user_id")
    }

    async fn apply_edit(
        &self,
        edit: CascadeEdit,
        now: DateTime<Utc>,
    ) -> Result<Vec<InstanceWrite>, StorageError> {
        let mut tx = self.pool.begin_with(WRITE_LOCK).await.map_err(db_err)?;
        let writes = cascade(&mut tx, edit, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(writes)
    }
}
