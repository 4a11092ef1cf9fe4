use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the children of any single node of a practice tree.
pub const MAX_CHILDREN: usize = 256;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum DraftError {
    #[error("practice title cannot be empty")]
    EmptyTitle,

    #[error("prescription {index}: block cannot be empty")]
    EmptyBlock { index: usize },

    #[error("prescription {prescription}, movement {index}: movement class cannot be empty")]
    EmptyMovementClass { prescription: usize, index: usize },

    #[error("{field} must be a finite, non-negative number, got {value}")]
    InvalidNumber { field: &'static str, value: f64 },

    #[error("too many {level} ({len}, at most {MAX_CHILDREN})")]
    TooManyChildren { level: &'static str, len: usize },
}

//
// ─── NODE BODIES ───────────────────────────────────────────────────────────────
//

/// Authored content of a prescription (a block of the session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionBody {
    pub block: String,
    pub prescribed_rounds: Option<u32>,
}

/// Authored content of a movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementBody {
    pub movement_class: String,
    pub metric_unit: Option<String>,
    pub metric_value: Option<f64>,
}

/// Authored performance data of a set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetBody {
    pub reps: Option<u32>,
    pub load_value: Option<f64>,
    pub load_unit: Option<String>,
    pub duration_secs: Option<u32>,
}

//
// ─── DRAFTS ────────────────────────────────────────────────────────────────────
//

/// Unvalidated practice tree, as submitted for an ad-hoc session or a fixture.
///
/// ```
/// # use coach_core::model::PracticeDraft;
/// let draft: PracticeDraft = serde_json::from_str(
///     r#"{"title":"Mobility","prescriptions":[{"block":"warm-up","movements":[
///         {"movement_class":"hip opener","sets":[{"duration_secs":60}]}]}]}"#,
/// )?;
/// let outline = draft.validate()?;
/// assert_eq!(outline.prescriptions[0].movements[0].sets.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PracticeDraft {
    pub title: String,
    #[serde(default)]
    pub prescriptions: Vec<PrescriptionDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrescriptionDraft {
    pub block: String,
    #[serde(default)]
    pub prescribed_rounds: Option<u32>,
    #[serde(default)]
    pub movements: Vec<MovementDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovementDraft {
    pub movement_class: String,
    #[serde(default)]
    pub metric_unit: Option<String>,
    #[serde(default)]
    pub metric_value: Option<f64>,
    #[serde(default)]
    pub sets: Vec<SetDraft>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetDraft {
    #[serde(default)]
    pub reps: Option<u32>,
    #[serde(default)]
    pub load_value: Option<f64>,
    #[serde(default)]
    pub load_unit: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

//
// ─── VALIDATED OUTLINE ─────────────────────────────────────────────────────────
//

/// A validated, id-less practice tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PracticeOutline {
    pub title: String,
    pub prescriptions: Vec<PrescriptionOutline>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrescriptionOutline {
    pub body: PrescriptionBody,
    pub movements: Vec<MovementOutline>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementOutline {
    pub body: MovementBody,
    pub sets: Vec<SetBody>,
}

fn trimmed(value: &str) -> Option<String> {
    let t = value.trim();
    (!t.is_empty()).then(|| t.to_owned())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.as_deref().and_then(trimmed)
}

fn check_number(field: &'static str, value: Option<f64>) -> Result<Option<f64>, DraftError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(DraftError::InvalidNumber { field, value: v }),
        other => Ok(other),
    }
}

fn check_len(level: &'static str, len: usize) -> Result<(), DraftError> {
    if len > MAX_CHILDREN {
        return Err(DraftError::TooManyChildren { level, len });
    }
    Ok(())
}

impl SetDraft {
    /// Validate a single set.
    ///
    /// # Errors
    ///
    /// Returns `DraftError::InvalidNumber` for a negative or non-finite load.
    pub fn validate(self) -> Result<SetBody, DraftError> {
        Ok(SetBody {
            reps: self.reps,
            load_value: check_number("load_value", self.load_value)?,
            load_unit: optional_text(self.load_unit),
            duration_secs: self.duration_secs,
        })
    }
}

impl PracticeDraft {
    /// Validate the whole tree, failing on the first malformed node.
    ///
    /// Blank optional strings are normalized to `None`; required strings are
    /// trimmed.
    ///
    /// # Errors
    ///
    /// Returns `DraftError` describing the first malformed node.
    pub fn validate(self) -> Result<PracticeOutline, DraftError> {
        let title = trimmed(&self.title).ok_or(DraftError::EmptyTitle)?;
        check_len("prescriptions", self.prescriptions.len())?;

        let mut prescriptions = Vec::with_capacity(self.prescriptions.len());
        for (p_idx, prescription) in self.prescriptions.into_iter().enumerate() {
            let block =
                trimmed(&prescription.block).ok_or(DraftError::EmptyBlock { index: p_idx })?;
            check_len("movements", prescription.movements.len())?;

            let mut movements = Vec::with_capacity(prescription.movements.len());
            for (m_idx, movement) in prescription.movements.into_iter().enumerate() {
                let movement_class = trimmed(&movement.movement_class).ok_or(
                    DraftError::EmptyMovementClass {
                        prescription: p_idx,
                        index: m_idx,
                    },
                )?;
                check_len("sets", movement.sets.len())?;
                let sets = movement
                    .sets
                    .into_iter()
                    .map(SetDraft::validate)
                    .collect::<Result<Vec<_>, _>>()?;

                movements.push(MovementOutline {
                    body: MovementBody {
                        movement_class,
                        metric_unit: optional_text(movement.metric_unit),
                        metric_value: check_number("metric_value", movement.metric_value)?,
                    },
                    sets,
                });
            }

            prescriptions.push(PrescriptionOutline {
                body: PrescriptionBody {
                    block,
                    prescribed_rounds: prescription.prescribed_rounds,
                },
                movements,
            });
        }

        Ok(PracticeOutline {
            title,
            prescriptions,
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
