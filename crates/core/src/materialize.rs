//! Template → instance expansion.
//!
//! Everything here is a pure deep copy: the produced trees own their data and
//! only remember the template node ids as provenance.

use chrono::NaiveDate;

use crate::model::{
    MovementOutline, MovementTemplate, NewMovementInstance, NewPracticeInstance,
    NewPrescriptionInstance, NewSetInstance, PracticeOutline, PracticeTemplate,
    PrescriptionOutline, PrescriptionTemplate, SetBody, SetTemplate, UserId,
};

impl NewPracticeInstance {
    /// Copy a whole practice template for `user_id` on `practice_date`.
    #[must_use]
    pub fn from_template(
        template: &PracticeTemplate,
        user_id: UserId,
        practice_date: NaiveDate,
    ) -> Self {
        Self {
            template_id: Some(template.id),
            user_id,
            practice_date,
            title: template.title.clone(),
            prescriptions: template
                .prescriptions
                .iter()
                .map(NewPrescriptionInstance::from_template)
                .collect(),
        }
    }

    /// Build an ad-hoc session from a validated outline (no provenance).
    #[must_use]
    pub fn from_outline(outline: PracticeOutline, user_id: UserId, practice_date: NaiveDate) -> Self {
        Self {
            template_id: None,
            user_id,
            practice_date,
            title: outline.title,
            prescriptions: outline
                .prescriptions
                .into_iter()
                .map(NewPrescriptionInstance::from_outline)
                .collect(),
        }
    }

    /// Number of nodes below the practice (prescriptions, movements, sets).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.prescriptions
            .iter()
            .map(|p| 1 + p.movements.iter().map(|m| 1 + m.sets.len()).sum::<usize>())
            .sum()
    }
}

impl NewPrescriptionInstance {
    #[must_use]
    pub fn from_template(template: &PrescriptionTemplate) -> Self {
        Self {
            template_id: Some(template.id),
            body: template.body.clone(),
            movements: template
                .movements
                .iter()
                .map(NewMovementInstance::from_template)
                .collect(),
        }
    }

    #[must_use]
    pub fn from_outline(outline: PrescriptionOutline) -> Self {
        Self {
            template_id: None,
            body: outline.body,
            movements: outline
                .movements
                .into_iter()
                .map(NewMovementInstance::from_outline)
                .collect(),
        }
    }
}

impl NewMovementInstance {
    #[must_use]
    pub fn from_template(template: &MovementTemplate) -> Self {
        Self {
            template_id: Some(template.id),
            body: template.body.clone(),
            sets: template.sets.iter().map(NewSetInstance::from_template).collect(),
        }
    }

    #[must_use]
    pub fn from_outline(outline: MovementOutline) -> Self {
        Self {
            template_id: None,
            body: outline.body,
            sets: outline.sets.into_iter().map(NewSetInstance::from_body).collect(),
        }
    }
}

impl NewSetInstance {
    #[must_use]
    pub fn from_template(template: &SetTemplate) -> Self {
        Self {
            template_id: Some(template.id),
            body: template.body.clone(),
        }
    }

    #[must_use]
    pub fn from_body(body: SetBody) -> Self {
        Self {
            template_id: None,
            body,
        }
    }
}
