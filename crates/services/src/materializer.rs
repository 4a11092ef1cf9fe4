use std::sync::Arc;

use chrono::NaiveDate;
use coach_core::model::{
    InstanceNode, MovementInstance, MovementInstanceId, MovementTemplateId, NewMovementInstance,
    NewPracticeInstance, NewPrescriptionInstance, NewSetInstance, PracticeDraft, PracticeInstance,
    PracticeInstanceId, PracticeTemplateId, PrescriptionInstance, PrescriptionInstanceId,
    PrescriptionTemplateId, ScheduledPracticeId, SetInstance, SetTemplateId, UserId,
};
use coach_core::time::Clock;
use serde::Serialize;
use storage::repository::{
    EnrollmentRepository, InstanceRepository, ScheduleRepository, StorageError, TemplateRepository,
};
use tracing::{debug, info};

use crate::cascade::{CascadeReport, CascadeService};
use crate::error::{ServiceError, StorageContext};

/// A node appended to an existing session, with the cascade committed in the
/// same unit.
///
/// `node` is the state after the cascade; the flags it changed are listed in
/// `cascade`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Added<T> {
    pub node: T,
    pub cascade: CascadeReport,
}

/// Turns templates and drafts into dated, user-owned session trees.
#[derive(Clone)]
pub struct MaterializerService {
    clock: Clock,
    templates: Arc<dyn TemplateRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    schedule: Arc<dyn ScheduleRepository>,
    instances: Arc<dyn InstanceRepository>,
    cascade: Arc<CascadeService>,
}

impl MaterializerService {
    #[must_use]
    pub fn new(
        clock: Clock,
        templates: Arc<dyn TemplateRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        schedule: Arc<dyn ScheduleRepository>,
        instances: Arc<dyn InstanceRepository>,
        cascade: Arc<CascadeService>,
    ) -> Self {
        Self {
            clock,
            templates,
            enrollments,
            schedule,
            instances,
            cascade,
        }
    }

    /// Copy a practice template into a new session for `user_id` on `date`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the template is missing.
    pub async fn materialize(
        &self,
        template_id: PracticeTemplateId,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<PracticeInstance, ServiceError> {
        let template = self
            .templates
            .get_practice_template(template_id)
            .await
            .context("practice template", template_id)?;
        let new = NewPracticeInstance::from_template(&template, user_id, date);
        self.insert_tree(&new).await
    }

    /// Build an ad-hoc session from a draft.
    ///
    /// The whole draft is validated before anything is written.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for a malformed draft.
    pub async fn materialize_standalone(
        &self,
        user_id: UserId,
        date: NaiveDate,
        draft: PracticeDraft,
    ) -> Result<PracticeInstance, ServiceError> {
        let outline = draft.validate()?;
        self.insert_tree(&NewPracticeInstance::from_outline(outline, user_id, date))
            .await
    }

    /// `materialize_standalone` for a JSON-encoded draft.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if the JSON does not describe a
    /// valid draft.
    pub async fn materialize_standalone_json(
        &self,
        user_id: UserId,
        date: NaiveDate,
        json: &str,
    ) -> Result<PracticeInstance, ServiceError> {
        let draft: PracticeDraft = serde_json::from_str(json)?;
        self.materialize_standalone(user_id, date, draft).await
    }

    /// Append a copy of a prescription template to a session.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authorization` unless `actor` owns the session
    /// and `ServiceError::NotFound` if the session or template is missing.
    pub async fn add_prescription_from_template(
        &self,
        practice_id: PracticeInstanceId,
        template_id: PrescriptionTemplateId,
        actor: UserId,
    ) -> Result<Added<PrescriptionInstance>, ServiceError> {
        self.cascade
            .authorize(actor, InstanceNode::Practice(practice_id))
            .await?;
        let template = self
            .templates
            .get_prescription_template(template_id)
            .await
            .context("prescription template", template_id)?;

        let added = self
            .instances
            .append_prescription(
                practice_id,
                &NewPrescriptionInstance::from_template(&template),
                self.clock.now(),
            )
            .await
            .context("practice instance", practice_id)?;
        info!(
            practice = %practice_id,
            prescription = %added.node.id,
            template = %template_id,
            "added prescription"
        );

        Ok(Added {
            node: added.node,
            cascade: CascadeReport::committed(added.writes),
        })
    }

    /// Append a copy of a movement template to a prescription.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authorization` unless `actor` owns the session
    /// and `ServiceError::NotFound` if the prescription or template is missing.
    pub async fn add_movement_from_template(
        &self,
        prescription_id: PrescriptionInstanceId,
        template_id: MovementTemplateId,
        actor: UserId,
    ) -> Result<Added<MovementInstance>, ServiceError> {
        self.cascade
            .authorize(actor, InstanceNode::Prescription(prescription_id))
            .await?;
        let template = self
            .templates
            .get_movement_template(template_id)
            .await
            .context("movement template", template_id)?;

        let added = self
            .instances
            .append_movement(
                prescription_id,
                &NewMovementInstance::from_template(&template),
                self.clock.now(),
            )
            .await
            .context("prescription instance", prescription_id)?;
        info!(
            prescription = %prescription_id,
            movement = %added.node.id,
            sets = added.node.sets.len(),
            "added movement"
        );

        Ok(Added {
            node: added.node,
            cascade: CascadeReport::committed(added.writes),
        })
    }

    /// Append a copy of a set template to a movement.
    ///
    /// A new set starts incomplete, so a completed movement reopens.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authorization` unless `actor` owns the session
    /// and `ServiceError::NotFound` if the movement or template is missing.
    pub async fn add_set_from_template(
        &self,
        movement_id: MovementInstanceId,
        template_id: SetTemplateId,
        actor: UserId,
    ) -> Result<Added<SetInstance>, ServiceError> {
        self.cascade
            .authorize(actor, InstanceNode::Movement(movement_id))
            .await?;
        let template = self
            .templates
            .get_set_template(template_id)
            .await
            .context("set template", template_id)?;

        let added = self
            .instances
            .append_set(
                movement_id,
                &NewSetInstance::from_template(&template),
                self.clock.now(),
            )
            .await
            .context("movement instance", movement_id)?;
        info!(
            movement = %movement_id,
            set = %added.node.id,
            position = added.node.position,
            "added set"
        );

        Ok(Added {
            node: added.node,
            cascade: CascadeReport::committed(added.writes),
        })
    }

    /// Materialize a scheduled row and link the session to it.
    ///
    /// Starting a row that already has a session returns that session.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authorization` unless `user_id` owns the
    /// enrollment and `ServiceError::NotFound` if the row or its template is
    /// missing.
    pub async fn start_scheduled_practice(
        &self,
        scheduled_id: ScheduledPracticeId,
        user_id: UserId,
    ) -> Result<PracticeInstance, ServiceError> {
        let row = self
            .schedule
            .get_scheduled(scheduled_id)
            .await
            .context("scheduled practice", scheduled_id)?;
        let enrollment = self
            .enrollments
            .get_enrollment(row.enrollment_id)
            .await
            .context("enrollment", row.enrollment_id)?;
        if !enrollment.is_owned_by(user_id) {
            return Err(ServiceError::forbidden(user_id, "scheduled practice", scheduled_id));
        }
        if let Some(practice_id) = row.practice_instance_id {
            debug!(scheduled = %scheduled_id, practice = %practice_id, "already started");
            return self.tree(practice_id).await;
        }

        let template = self
            .templates
            .get_practice_template(row.practice_template_id)
            .await
            .context("practice template", row.practice_template_id)?;
        let new =
            NewPracticeInstance::from_template(&template, enrollment.user_id(), row.scheduled_date);

        let started = self.schedule.start_scheduled(scheduled_id, &new).await;
        if matches!(started, Err(StorageError::Conflict)) {
            // Lost the race to another start of the same row.
            let linked = self
                .schedule
                .get_scheduled(scheduled_id)
                .await
                .context("scheduled practice", scheduled_id)?
                .practice_instance_id
                .ok_or_else(|| ServiceError::Conflict {
                    entity: "scheduled practice",
                    id: scheduled_id.to_string(),
                })?;
            return self.tree(linked).await;
        }
        let tree = started.context("scheduled practice", scheduled_id)?;

        info!(
            scheduled = %scheduled_id,
            enrollment = %row.enrollment_id,
            practice = %tree.id,
            "started scheduled practice"
        );
        Ok(tree)
    }

    /// The full session tree, readable only by its owner.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if missing and
    /// `ServiceError::Authorization` if `actor` is not the owner.
    pub async fn get_instance_tree(
        &self,
        practice_id: PracticeInstanceId,
        actor: UserId,
    ) -> Result<PracticeInstance, ServiceError> {
        let tree = self.tree(practice_id).await?;
        if tree.user_id != actor {
            return Err(ServiceError::forbidden(actor, "practice instance", practice_id));
        }
        Ok(tree)
    }

    async fn tree(&self, id: PracticeInstanceId) -> Result<PracticeInstance, ServiceError> {
        self.instances
            .get_practice_tree(id)
            .await
            .context("practice instance", id)
    }

    async fn insert_tree(
        &self,
        new: &NewPracticeInstance,
    ) -> Result<PracticeInstance, ServiceError> {
        let tree = self
            .instances
            .insert_practice_tree(new)
            .await
            .context("practice instance", "new")?;
        info!(
            practice = %tree.id,
            user = %tree.user_id,
            date = %tree.practice_date,
            nodes = new.node_count(),
            "materialized practice"
        );
        Ok(tree)
    }
}
