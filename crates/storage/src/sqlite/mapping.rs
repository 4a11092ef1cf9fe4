use chrono::{DateTime, NaiveDate, Utc};
use coach_core::model::{
    Completion, EnrollmentId, EnrollmentStatus, MovementBody, PracticeInstanceId,
    PracticeTemplateId, PrescriptionBody, ProgramEnrollment, ProgramId, ProgramPracticeLink,
    ProgramPracticeLinkId, ScheduledPractice, ScheduledPracticeId, SetBody, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn db_err<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} out of range: {v}")))
}

/// Decode a freshly assigned row id.
pub(crate) fn rowid(v: i64) -> Result<u64, StorageError> {
    i64_to_u64("rowid", v)
}

/// Encode a storage-assigned id for binding.
pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

/// Read a non-null id column into a typed id.
pub(crate) fn get_id<T>(
    row: &SqliteRow,
    column: &'static str,
    make: fn(u64) -> T,
) -> Result<T, StorageError> {
    let raw: i64 = row.try_get(column).map_err(ser)?;
    Ok(make(i64_to_u64(column, raw)?))
}

pub(crate) fn get_opt_id<T>(
    row: &SqliteRow,
    column: &'static str,
    make: fn(u64) -> T,
) -> Result<Option<T>, StorageError> {
    let raw: Option<i64> = row.try_get(column).map_err(ser)?;
    raw.map(|v| i64_to_u64(column, v).map(make)).transpose()
}

pub(crate) fn get_u32(row: &SqliteRow, column: &'static str) -> Result<u32, StorageError> {
    let raw: i64 = row.try_get(column).map_err(ser)?;
    i64_to_u32(column, raw)
}

fn get_opt_u32(row: &SqliteRow, column: &'static str) -> Result<Option<u32>, StorageError> {
    let raw: Option<i64> = row.try_get(column).map_err(ser)?;
    raw.map(|v| i64_to_u32(column, v)).transpose()
}

pub(crate) fn get_user(row: &SqliteRow, column: &'static str) -> Result<UserId, StorageError> {
    let raw: Uuid = row.try_get(column).map_err(ser)?;
    Ok(UserId::new(raw))
}

/// Read the `complete` / `completed_at` column pair.
pub(crate) fn get_completion(row: &SqliteRow) -> Result<Completion, StorageError> {
    let complete: bool = row.try_get("complete").map_err(ser)?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at").map_err(ser)?;
    Completion::from_persisted(complete, completed_at).map_err(ser)
}

pub(crate) fn map_prescription_body(row: &SqliteRow) -> Result<PrescriptionBody, StorageError> {
    Ok(PrescriptionBody {
        block: row.try_get("block").map_err(ser)?,
        prescribed_rounds: get_opt_u32(row, "prescribed_rounds")?,
    })
}

pub(crate) fn map_movement_body(row: &SqliteRow) -> Result<MovementBody, StorageError> {
    Ok(MovementBody {
        movement_class: row.try_get("movement_class").map_err(ser)?,
        metric_unit: row.try_get("metric_unit").map_err(ser)?,
        metric_value: row.try_get("metric_value").map_err(ser)?,
    })
}

pub(crate) fn map_set_body(row: &SqliteRow) -> Result<SetBody, StorageError> {
    Ok(SetBody {
        reps: get_opt_u32(row, "reps")?,
        load_value: row.try_get("load_value").map_err(ser)?,
        load_unit: row.try_get("load_unit").map_err(ser)?,
        duration_secs: get_opt_u32(row, "duration_secs")?,
    })
}

pub(crate) fn map_link_row(row: &SqliteRow) -> Result<ProgramPracticeLink, StorageError> {
    Ok(ProgramPracticeLink {
        id: get_id(row, "id", ProgramPracticeLinkId::new)?,
        program_id: get_id(row, "program_id", ProgramId::new)?,
        practice_template_id: get_id(row, "practice_template_id", PracticeTemplateId::new)?,
        sequence_order: get_u32(row, "sequence_order")?,
        interval_days_after: get_u32(row, "interval_days_after")?,
    })
}

pub(crate) fn map_enrollment_row(row: &SqliteRow) -> Result<ProgramEnrollment, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    let status: EnrollmentStatus = status.parse().map_err(ser)?;
    let revision: i64 = row.try_get("revision").map_err(ser)?;

    ProgramEnrollment::from_persisted(
        get_id(row, "id", EnrollmentId::new)?,
        get_id(row, "program_id", ProgramId::new)?,
        get_user(row, "user_id")?,
        get_user(row, "enrolled_by_user_id")?,
        status,
        get_opt_id(row, "current_practice_link_id", ProgramPracticeLinkId::new)?,
        i64_to_u64("revision", revision)?,
    )
    .map_err(ser)
}

pub(crate) fn map_scheduled_row(row: &SqliteRow) -> Result<ScheduledPractice, StorageError> {
    let scheduled_date: NaiveDate = row.try_get("scheduled_date").map_err(ser)?;
    Ok(ScheduledPractice {
        id: get_id(row, "id", ScheduledPracticeId::new)?,
        enrollment_id: get_id(row, "enrollment_id", EnrollmentId::new)?,
        practice_template_id: get_id(row, "practice_template_id", PracticeTemplateId::new)?,
        practice_instance_id: get_opt_id(row, "practice_instance_id", PracticeInstanceId::new)?,
        scheduled_date,
    })
}

pub(crate) const ENROLLMENT_COLUMNS: &str = "id, program_id, user_id, enrolled_by_user_id, \
     status, current_practice_link_id, revision";

pub(crate) const SCHEDULED_COLUMNS: &str =
    "id, enrollment_id, practice_template_id, practice_instance_id, scheduled_date";
