use serde::Serialize;

use crate::model::draft::{MovementBody, PrescriptionBody, SetBody};
use crate::model::ids::{MovementTemplateId, PracticeTemplateId, PrescriptionTemplateId, SetTemplateId};

/// Reusable session plan from the template library.
///
/// Templates are read-only from this crate's point of view; instances copy
/// them and never point back at live template data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeTemplate {
    pub id: PracticeTemplateId,
    pub title: String,
    pub prescriptions: Vec<PrescriptionTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrescriptionTemplate {
    pub id: PrescriptionTemplateId,
    pub body: PrescriptionBody,
    pub movements: Vec<MovementTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementTemplate {
    pub id: MovementTemplateId,
    pub body: MovementBody,
    pub sets: Vec<SetTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetTemplate {
    pub id: SetTemplateId,
    pub body: SetBody,
}

impl PracticeTemplate {
    /// Total number of sets across the whole tree.
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.prescriptions
            .iter()
            .flat_map(|p| &p.movements)
            .map(|m| m.sets.len())
            .sum()
    }
}
