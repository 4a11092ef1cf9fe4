use std::sync::Arc;

use coach_core::cascade::{CascadeEdit, InstanceWrite};
use coach_core::model::{
    InstanceNode, MovementInstanceId, PrescriptionInstanceId, SetInstanceId, UserId,
};
use coach_core::time::Clock;
use serde::Serialize;
use storage::repository::InstanceRepository;
use tracing::{debug, info};

use crate::error::{ServiceError, StorageContext};

/// Writes performed by one cascade run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub writes: Vec<InstanceWrite>,
}

impl CascadeReport {
    /// True when the stored flags already matched their children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Number of movement and prescription flags that changed.
    #[must_use]
    pub fn derived_changes(&self) -> usize {
        self.writes.iter().filter(|w| is_derived(w)).count()
    }

    /// Wrap writes storage has already committed.
    pub(crate) fn committed(writes: Vec<InstanceWrite>) -> Self {
        if writes.is_empty() {
            debug!("cascade up to date; nothing to write");
        } else {
            info!(
                writes = writes.len(),
                derived = writes.iter().filter(|w| is_derived(w)).count(),
                "committed completion cascade"
            );
        }
        Self { writes }
    }
}

fn is_derived(write: &InstanceWrite) -> bool {
    matches!(
        write,
        InstanceWrite::MovementCompletion { .. } | InstanceWrite::PrescriptionCompletion { .. }
    )
}

/// Keeps movement and prescription completion in line with their sets.
///
/// Every entry point hands one `CascadeEdit` to storage, which reads the
/// affected movement and prescription, plans with `coach_core::cascade` and
/// commits in a single unit.
#[derive(Clone)]
pub struct CascadeService {
    clock: Clock,
    instances: Arc<dyn InstanceRepository>,
}

impl CascadeService {
    #[must_use]
    pub fn new(clock: Clock, instances: Arc<dyn InstanceRepository>) -> Self {
        Self { clock, instances }
    }

    /// Recompute the ancestors of a set after it changed outside this service.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the set is missing.
    pub async fn on_set_changed(&self, set_id: SetInstanceId) -> Result<CascadeReport, ServiceError> {
        let set = self
            .instances
            .get_set(set_id)
            .await
            .context("set instance", set_id)?;
        self.on_movement_changed(set.movement_id).await
    }

    /// Recompute a movement from its sets, then its prescription.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the movement is missing.
    pub async fn on_movement_changed(
        &self,
        movement_id: MovementInstanceId,
    ) -> Result<CascadeReport, ServiceError> {
        self.apply(CascadeEdit::Movement(movement_id)).await
    }

    /// Recompute a prescription from the stored flags of its movements.
    ///
    /// Movements without sets are auto-completed on the way.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the prescription is missing.
    pub async fn on_prescription_changed(
        &self,
        prescription_id: PrescriptionInstanceId,
    ) -> Result<CascadeReport, ServiceError> {
        self.apply(CascadeEdit::Prescription(prescription_id)).await
    }

    /// Mark a set complete or incomplete and cascade, in one commit.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authorization` if `actor` does not own the
    /// session, or `ServiceError::NotFound` if the set is missing.
    pub async fn set_set_complete(
        &self,
        set_id: SetInstanceId,
        actor: UserId,
        complete: bool,
    ) -> Result<CascadeReport, ServiceError> {
        self.authorize(actor, InstanceNode::Set(set_id)).await?;
        self.apply(CascadeEdit::SetCompletion {
            set: set_id,
            complete,
        })
        .await
    }

    /// Delete a set and cascade, in one commit.
    ///
    /// Removing the last incomplete set completes its movement.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authorization` if `actor` does not own the
    /// session, or `ServiceError::NotFound` if the set is missing.
    pub async fn delete_set(
        &self,
        set_id: SetInstanceId,
        actor: UserId,
    ) -> Result<CascadeReport, ServiceError> {
        self.authorize(actor, InstanceNode::Set(set_id)).await?;
        self.apply(CascadeEdit::DeleteSet(set_id)).await
    }

    pub(crate) async fn authorize(&self, actor: UserId, node: InstanceNode) -> Result<(), ServiceError> {
        let owner = self
            .instances
            .instance_owner(node)
            .await
            .context(node.kind(), node.raw_id())?;
        if owner != actor {
            return Err(ServiceError::forbidden(actor, node.kind(), node.raw_id()));
        }
        Ok(())
    }

    async fn apply(&self, edit: CascadeEdit) -> Result<CascadeReport, ServiceError> {
        let node = edit.node();
        let writes = self
            .instances
            .apply_edit(edit, self.clock.now())
            .await
            .context(node.kind(), node.raw_id())?;
        Ok(CascadeReport::committed(writes))
    }
}
