use chrono::NaiveDate;
use serde::Serialize;

use crate::model::completion::Completion;
use crate::model::draft::{MovementBody, PrescriptionBody, SetBody};
use crate::model::ids::{
    MovementInstanceId, MovementTemplateId, PracticeInstanceId, PracticeTemplateId,
    PrescriptionInstanceId, PrescriptionTemplateId, SetInstanceId, SetTemplateId, UserId,
};

//
// ─── PERSISTED TREE ────────────────────────────────────────────────────────────
//

/// A dated session owned by one user.
///
/// Children are ordered by `position`. Each node keeps the id of the template
/// node it was copied from (if any) purely as provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeInstance {
    pub id: PracticeInstanceId,
    pub template_id: Option<PracticeTemplateId>,
    pub user_id: UserId,
    pub practice_date: NaiveDate,
    pub title: String,
    pub completion: Completion,
    pub prescriptions: Vec<PrescriptionInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrescriptionInstance {
    pub id: PrescriptionInstanceId,
    pub practice_id: PracticeInstanceId,
    pub template_id: Option<PrescriptionTemplateId>,
    pub position: u32,
    pub body: PrescriptionBody,
    pub completion: Completion,
    pub movements: Vec<MovementInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementInstance {
    pub id: MovementInstanceId,
    pub prescription_id: PrescriptionInstanceId,
    pub template_id: Option<MovementTemplateId>,
    pub position: u32,
    pub body: MovementBody,
    pub completion: Completion,
    pub sets: Vec<SetInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetInstance {
    pub id: SetInstanceId,
    pub movement_id: MovementInstanceId,
    pub template_id: Option<SetTemplateId>,
    pub position: u32,
    pub body: SetBody,
    pub completion: Completion,
}

/// Header of a practice instance without its children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeHeader {
    pub id: PracticeInstanceId,
    pub template_id: Option<PracticeTemplateId>,
    pub user_id: UserId,
    pub practice_date: NaiveDate,
    pub title: String,
    pub completion: Completion,
}

impl PracticeInstance {
    #[must_use]
    pub fn header(&self) -> PracticeHeader {
        PracticeHeader {
            id: self.id,
            template_id: self.template_id,
            user_id: self.user_id,
            practice_date: self.practice_date,
            title: self.title.clone(),
            completion: self.completion,
        }
    }

    /// Iterate every set in tree order.
    pub fn sets(&self) -> impl Iterator<Item = &SetInstance> {
        self.prescriptions
            .iter()
            .flat_map(|p| &p.movements)
            .flat_map(|m| &m.sets)
    }
}

//
// ─── NEW (ID-LESS) TREE ────────────────────────────────────────────────────────
//

/// An instance tree ready to be inserted; storage assigns ids and positions.
///
/// Every node starts incomplete.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPracticeInstance {
    pub template_id: Option<PracticeTemplateId>,
    pub user_id: UserId,
    pub practice_date: NaiveDate,
    pub title: String,
    pub prescriptions: Vec<NewPrescriptionInstance>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPrescriptionInstance {
    pub template_id: Option<PrescriptionTemplateId>,
    pub body: PrescriptionBody,
    pub movements: Vec<NewMovementInstance>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMovementInstance {
    pub template_id: Option<MovementTemplateId>,
    pub body: MovementBody,
    pub sets: Vec<NewSetInstance>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSetInstance {
    pub template_id: Option<SetTemplateId>,
    pub body: SetBody,
}

/// Reference to any node of an instance tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceNode {
    Practice(PracticeInstanceId),
    Prescription(PrescriptionInstanceId),
    Movement(MovementInstanceId),
    Set(SetInstanceId),
}

impl InstanceNode {
    /// Entity label used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Practice(_) => "practice instance",
            Self::Prescription(_) => "prescription instance",
            Self::Movement(_) => "movement instance",
            Self::Set(_) => "set instance",
        }
    }

    #[must_use]
    pub fn raw_id(&self) -> u64 {
        match self {
            Self::Practice(id) => id.value(),
            Self::Prescription(id) => id.value(),
            Self::Movement(id) => id.value(),
            Self::Set(id) => id.value(),
        }
    }
}
