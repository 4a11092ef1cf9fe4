use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use coach_core::cascade::{
    CascadeEdit, InstanceWrite, MovementSnapshot, MovementSummary, PrescriptionSnapshot, SetState,
    plan_edit,
};
use coach_core::model::{
    Completion, DateShift, EnrollmentId, EnrollmentStatus, InstanceNode, MovementInstance,
    MovementInstanceId, MovementTemplate, MovementTemplateId, NewEnrollment, NewMovementInstance,
    NewPracticeInstance, NewPrescriptionInstance, NewProgram, NewScheduledPractice, NewSetInstance,
    PracticeHeader, PracticeInstance, PracticeInstanceId, PracticeOutline, PracticeTemplate,
    PracticeTemplateId, PrescriptionInstance, PrescriptionInstanceId, PrescriptionTemplate,
    PrescriptionTemplateId, Program, ProgramEnrollment, ProgramId, ProgramPracticeLink,
    ProgramPracticeLinkId, ScheduledPractice, ScheduledPracticeId, SetInstance, SetInstanceId,
    SetTemplate, SetTemplateId, UserId,
};

use crate::repository::{
    AdvanceCommit, Cascaded, EnrollmentCommit, EnrollmentRepository, InstanceRepository, ProgramRepository,
    ScheduleRepository, StatusChange, StorageError, TemplateRepository,
};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn count(len: usize) -> Result<u32, StorageError> {
    u32::try_from(len).map_err(|_| StorageError::Serialization("child count overflow".into()))
}

fn next_position(positions: impl Iterator<Item = u32>) -> u32 {
    positions.map(|p| p.saturating_add(1)).max().unwrap_or(0)
}

/// Everything the in-memory backend holds.
///
/// Multi-row commits work on a staged copy and swap it in only when every
/// step succeeded, so a failed commit leaves nothing behind.
#[derive(Debug, Clone, Default)]
struct State {
    last_id: u64,
    practice_templates: BTreeMap<PracticeTemplateId, PracticeTemplate>,
    programs: BTreeMap<ProgramId, Program>,
    enrollments: BTreeMap<EnrollmentId, ProgramEnrollment>,
    scheduled: BTreeMap<ScheduledPracticeId, ScheduledPractice>,
    practices: BTreeMap<PracticeInstanceId, PracticeInstance>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    //
    // ─── TEMPLATES ─────────────────────────────────────────────────────────
    //

    fn prescription_templates(&self) -> impl Iterator<Item = &PrescriptionTemplate> {
        self.practice_templates
            .values()
            .flat_map(|t| &t.prescriptions)
    }

    fn movement_templates(&self) -> impl Iterator<Item = &MovementTemplate> {
        self.prescription_templates().flat_map(|p| &p.movements)
    }

    //
    // ─── INSTANCES ─────────────────────────────────────────────────────────
    //

    fn prescription(&self, id: PrescriptionInstanceId) -> Option<&PrescriptionInstance> {
        self.practices
            .values()
            .flat_map(|p| &p.prescriptions)
            .find(|p| p.id == id)
    }

    fn movement(&self, id: MovementInstanceId) -> Option<&MovementInstance> {
        self.practices
            .values()
            .flat_map(|p| &p.prescriptions)
            .flat_map(|p| &p.movements)
            .find(|m| m.id == id)
    }

    fn set(&self, id: SetInstanceId) -> Option<&SetInstance> {
        self.practices
            .values()
            .flat_map(|p| p.sets())
            .find(|s| s.id == id)
    }

    fn prescription_mut(
        &mut self,
        id: PrescriptionInstanceId,
    ) -> Option<&mut PrescriptionInstance> {
        self.practices
            .values_mut()
            .flat_map(|p| &mut p.prescriptions)
            .find(|p| p.id == id)
    }

    fn movement_mut(&mut self, id: MovementInstanceId) -> Option<&mut MovementInstance> {
        self.practices
            .values_mut()
            .flat_map(|p| &mut p.prescriptions)
            .flat_map(|p| &mut p.movements)
            .find(|m| m.id == id)
    }

    fn set_mut(&mut self, id: SetInstanceId) -> Option<&mut SetInstance> {
        self.practices
            .values_mut()
            .flat_map(|p| &mut p.prescriptions)
            .flat_map(|p| &mut p.movements)
            .flat_map(|m| &mut m.sets)
            .find(|s| s.id == id)
    }

    fn build_practice(
        &mut self,
        new: &NewPracticeInstance,
    ) -> Result<PracticeInstance, StorageError> {
        let id = PracticeInstanceId::new(self.next_id());
        let mut prescriptions = Vec::with_capacity(new.prescriptions.len());
        for (position, child) in new.prescriptions.iter().enumerate() {
            prescriptions.push(self.build_prescription(id, count(position)?, child)?);
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

    fn build_prescription(
        &mut self,
        practice_id: PracticeInstanceId,
        position: u32,
        new: &NewPrescriptionInstance,
    ) -> Result<PrescriptionInstance, StorageError> {
        let id = PrescriptionInstanceId::new(self.next_id());
        let mut movements = Vec::with_capacity(new.movements.len());
        for (position, child) in new.movements.iter().enumerate() {
            movements.push(self.build_movement(id, count(position)?, child)?);
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

    fn build_movement(
        &mut self,
        prescription_id: PrescriptionInstanceId,
        position: u32,
        new: &NewMovementInstance,
    ) -> Result<MovementInstance, StorageError> {
        let id = MovementInstanceId::new(self.next_id());
        let mut sets = Vec::with_capacity(new.sets.len());
        for (position, child) in new.sets.iter().enumerate() {
            sets.push(self.build_set(id, count(position)?, child));
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

    fn build_set(
        &mut self,
        movement_id: MovementInstanceId,
        position: u32,
        new: &NewSetInstance,
    ) -> SetInstance {
        SetInstance {
            id: SetInstanceId::new(self.next_id()),
            movement_id,
            template_id: new.template_id,
            position,
            body: new.body.clone(),
            completion: Completion::incomplete(),
        }
    }

    fn apply_write(&mut self, write: &InstanceWrite) -> Result<(), StorageError> {
        match *write {
            InstanceWrite::SetCompletion { id, completion } => {
                self.set_mut(id).ok_or(StorageError::NotFound)?.completion = completion;
            }
            InstanceWrite::MovementCompletion { id, completion } => {
                self.movement_mut(id).ok_or(StorageError::NotFound)?.completion = completion;
            }
            InstanceWrite::PrescriptionCompletion { id, completion } => {
                self.prescription_mut(id)
                    .ok_or(StorageError::NotFound)?
                    .completion = completion;
            }
            InstanceWrite::PracticeCompletion { id, completion } => {
                self.practices
                    .get_mut(&id)
                    .ok_or(StorageError::NotFound)?
                    .completion = completion;
            }
            InstanceWrite::DeleteSet { id } => {
                let parent = self.set(id).ok_or(StorageError::NotFound)?.movement_id;
                self.movement_mut(parent)
                    .ok_or(StorageError::NotFound)?
                    .sets
                    .retain(|s| s.id != id);
            }
        }
        Ok(())
    }

    fn movement_snapshot(&self, id: MovementInstanceId) -> Result<MovementSnapshot, StorageError> {
        let movement = self.movement(id).ok_or(StorageError::NotFound)?;
        Ok(MovementSnapshot {
            id: movement.id,
            prescription_id: movement.prescription_id,
            completion: movement.completion,
            sets: movement
                .sets
                .iter()
                .map(|s| SetState {
                    id: s.id,
                    completion: s.completion,
                })
                .collect(),
        })
    }

    fn prescription_snapshot(
        &self,
        id: PrescriptionInstanceId,
    ) -> Result<PrescriptionSnapshot, StorageError> {
        let prescription = self.prescription(id).ok_or(StorageError::NotFound)?;
        let mut movements = Vec::with_capacity(prescription.movements.len());
        for m in &prescription.movements {
            movements.push(MovementSummary {
                id: m.id,
                completion: m.completion,
                set_count: count(m.sets.len())?,
            });
        }
        Ok(PrescriptionSnapshot {
            id: prescription.id,
            practice_id: prescription.practice_id,
            completion: prescription.completion,
            movements,
        })
    }

    /// Plan `edit` against the rows as they are now and apply the writes.
    fn cascade(
        &mut self,
        edit: CascadeEdit,
        now: DateTime<Utc>,
    ) -> Result<Vec<InstanceWrite>, StorageError> {
        let movement_id = match edit {
            CascadeEdit::Prescription(_) => None,
            CascadeEdit::Movement(id) => Some(id),
            CascadeEdit::SetCompletion { set, .. } | CascadeEdit::DeleteSet(set) => {
                Some(self.set(set).ok_or(StorageError::NotFound)?.movement_id)
            }
        };
        let movement = movement_id.map(|id| self.movement_snapshot(id)).transpose()?;
        let prescription_id = match (&movement, edit) {
            (Some(m), _) => m.prescription_id,
            (None, CascadeEdit::Prescription(id)) => id,
            (None, _) => return Err(StorageError::NotFound),
        };
        let prescription = self.prescription_snapshot(prescription_id)?;

        let writes = plan_edit(edit, prescription, movement, now).map_err(ser)?;
        for write in &writes {
            self.apply_write(write)?;
        }
        Ok(writes)
    }

    //
    // ─── ENROLLMENTS ───────────────────────────────────────────────────────
    //

    /// Replace an enrollment after a successful compare-and-set.
    fn bump_enrollment(
        &mut self,
        id: EnrollmentId,
        expected_revision: u64,
        status: EnrollmentStatus,
        link: Option<ProgramPracticeLinkId>,
    ) -> Result<ProgramEnrollment, StorageError> {
        let current = self.enrollments.get(&id).ok_or(StorageError::NotFound)?;
        if current.revision() != expected_revision {
            return Err(StorageError::Conflict);
        }
        let next = ProgramEnrollment::from_persisted(
            current.id(),
            current.program_id(),
            current.user_id(),
            current.enrolled_by_user_id(),
            status,
            link,
            expected_revision + 1,
        )
        .map_err(ser)?;
        self.enrollments.insert(id, next.clone());
        Ok(next)
    }

    fn push_scheduled(
        &mut self,
        enrollment_id: EnrollmentId,
        new: NewScheduledPractice,
    ) -> Result<ScheduledPractice, StorageError> {
        if !self.practice_templates.contains_key(&new.practice_template_id) {
            return Err(StorageError::NotFound);
        }
        let row = ScheduledPractice {
            id: ScheduledPracticeId::new(self.next_id()),
            enrollment_id,
            practice_template_id: new.practice_template_id,
            practice_instance_id: None,
            scheduled_date: new.scheduled_date,
        };
        self.scheduled.insert(row.id, row.clone());
        Ok(row)
    }

    fn sorted_rows(&self, filter: impl Fn(&ScheduledPractice) -> bool) -> Vec<ScheduledPractice> {
        let mut rows: Vec<_> = self.scheduled.values().filter(|r| filter(r)).cloned().collect();
        rows.sort_by_key(|r| (r.scheduled_date, r.id));
        rows
    }
}

/// In-memory repository implementation for tests and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run `f` on a staged copy and keep the result only if it succeeds.
    fn commit<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        *guard = staged;
        Ok(out)
    }
}

#[async_trait]
impl TemplateRepository for InMemoryRepository {
    async fn get_practice_template(
        &self,
        id: PracticeTemplateId,
    ) -> Result<PracticeTemplate, StorageError> {
        let guard = self.lock()?;
        guard
            .practice_templates
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_prescription_template(
        &self,
        id: PrescriptionTemplateId,
    ) -> Result<PrescriptionTemplate, StorageError> {
        let guard = self.lock()?;
        guard
            .prescription_templates()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_movement_template(
        &self,
        id: MovementTemplateId,
    ) -> Result<MovementTemplate, StorageError> {
        let guard = self.lock()?;
        guard
            .movement_templates()
            .find(|m| m.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn get_set_template(&self, id: SetTemplateId) -> Result<SetTemplate, StorageError> {
        let guard = self.lock()?;
        guard
            .movement_templates()
            .flat_map(|m| &m.sets)
            .find(|s| s.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn insert_practice_template(
        &self,
        outline: &PracticeOutline,
    ) -> Result<PracticeTemplate, StorageError> {
        self.commit(|state| {
            let id = PracticeTemplateId::new(state.next_id());
            let mut prescriptions = Vec::with_capacity(outline.prescriptions.len());
            for p in &outline.prescriptions {
                let pid = PrescriptionTemplateId::new(state.next_id());
                let mut movements = Vec::with_capacity(p.movements.len());
                for m in &p.movements {
                    let mid = MovementTemplateId::new(state.next_id());
                    let sets = m
                        .sets
                        .iter()
                        .map(|body| SetTemplate {
                            id: SetTemplateId::new(state.next_id()),
                            body: body.clone(),
                        })
                        .collect();
                    movements.push(MovementTemplate {
                        id: mid,
                        body: m.body.clone(),
                        sets,
                    });
                }
                prescriptions.push(PrescriptionTemplate {
                    id: pid,
                    body: p.body.clone(),
                    movements,
                });
            }
            let template = PracticeTemplate {
                id,
                title: outline.title.clone(),
                prescriptions,
            };
            state.practice_templates.insert(id, template.clone());
            Ok(template)
        })
    }
}

#[async_trait]
impl ProgramRepository for InMemoryRepository {
    async fn get_program(&self, id: ProgramId) -> Result<Program, StorageError> {
        let guard = self.lock()?;
        guard.programs.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn insert_program(&self, program: &NewProgram) -> Result<Program, StorageError> {
        self.commit(|state| {
            let id = ProgramId::new(state.next_id());
            let mut links = Vec::with_capacity(program.links().len());
            for link in program.links() {
                if !state.practice_templates.contains_key(&link.practice_template_id) {
                    return Err(StorageError::NotFound);
                }
                links.push(ProgramPracticeLink {
                    id: ProgramPracticeLinkId::new(state.next_id()),
                    program_id: id,
                    practice_template_id: link.practice_template_id,
                    sequence_order: link.sequence_order,
                    interval_days_after: link.interval_days_after,
                });
            }
            let stored = Program::from_persisted(id, program.title(), links).map_err(ser)?;
            state.programs.insert(id, stored.clone());
            Ok(stored)
        })
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn get_enrollment(&self, id: EnrollmentId) -> Result<ProgramEnrollment, StorageError> {
        let guard = self.lock()?;
        guard
            .enrollments
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_enrollments_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<ProgramEnrollment>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .enrollments
            .values()
            .filter(|e| e.user_id() == user)
            .cloned()
            .collect())
    }

    async fn create_enrollment(
        &self,
        enrollment: &NewEnrollment,
        first: NewScheduledPractice,
    ) -> Result<EnrollmentCommit, StorageError> {
        self.commit(|state| {
            let program = state
                .programs
                .get(&enrollment.program_id)
                .ok_or(StorageError::NotFound)?;
            if let Some(link) = enrollment.current_practice_link_id {
                program.link(link).map_err(ser)?;
            }
            let created = ProgramEnrollment::from_persisted(
                EnrollmentId::new(state.next_id()),
                enrollment.program_id,
                enrollment.user_id,
                enrollment.enrolled_by_user_id,
                enrollment.status,
                enrollment.current_practice_link_id,
                0,
            )
            .map_err(ser)?;
            state.enrollments.insert(created.id(), created.clone());
            let scheduled = state.push_scheduled(created.id(), first)?;
            Ok(EnrollmentCommit {
                enrollment: created,
                scheduled: Some(scheduled),
            })
        })
    }

    async fn update_status(
        &self,
        change: &StatusChange,
    ) -> Result<ProgramEnrollment, StorageError> {
        self.commit(|state| {
            let link = state
                .enrollments
                .get(&change.enrollment_id)
                .ok_or(StorageError::NotFound)?
                .current_practice_link_id();
            let updated = state.bump_enrollment(
                change.enrollment_id,
                change.expected_revision,
                change.status,
                link,
            )?;
            if let Some(from) = change.clear_unstarted_from {
                state.scheduled.retain(|_, r| {
                    r.enrollment_id != change.enrollment_id
                        || r.practice_instance_id.is_some()
                        || r.scheduled_date < from
                });
            }
            Ok(updated)
        })
    }

    async fn commit_advance(
        &self,
        commit: &AdvanceCommit,
    ) -> Result<EnrollmentCommit, StorageError> {
        self.commit(|state| {
            let enrollment = state.bump_enrollment(
                commit.enrollment_id,
                commit.expected_revision,
                commit.status,
                commit.current_practice_link_id,
            )?;
            if let Some((id, completion)) = commit.practice_completion {
                state.apply_write(&InstanceWrite::PracticeCompletion { id, completion })?;
            }
            let scheduled = commit
                .schedule
                .map(|new| state.push_scheduled(commit.enrollment_id, new))
                .transpose()?;
            Ok(EnrollmentCommit {
                enrollment,
                scheduled,
            })
        })
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryRepository {
    async fn list_scheduled(
        &self,
        enrollment_ids: &[EnrollmentId],
        from: NaiveDate,
    ) -> Result<Vec<ScheduledPractice>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.sorted_rows(|r| {
            r.scheduled_date >= from && enrollment_ids.contains(&r.enrollment_id)
        }))
    }

    async fn list_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<ScheduledPractice>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.sorted_rows(|r| r.enrollment_id == enrollment_id))
    }

    async fn get_scheduled(
        &self,
        id: ScheduledPracticeId,
    ) -> Result<ScheduledPractice, StorageError> {
        let guard = self.lock()?;
        guard.scheduled.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn apply_deferral(
        &self,
        enrollment_id: EnrollmentId,
        expected_revision: u64,
        shifts: &[DateShift],
    ) -> Result<ProgramEnrollment, StorageError> {
        self.commit(|state| {
            let current = state
                .enrollments
                .get(&enrollment_id)
                .ok_or(StorageError::NotFound)?;
            let (status, link) = (current.status(), current.current_practice_link_id());
            let updated = state.bump_enrollment(enrollment_id, expected_revision, status, link)?;
            for shift in shifts {
                let row = state
                    .scheduled
                    .get_mut(&shift.id)
                    .filter(|r| r.enrollment_id == enrollment_id)
                    .ok_or(StorageError::NotFound)?;
                row.scheduled_date = shift.to;
            }
            Ok(updated)
        })
    }

    async fn start_scheduled(
        &self,
        id: ScheduledPracticeId,
        practice: &NewPracticeInstance,
    ) -> Result<PracticeInstance, StorageError> {
        self.commit(|state| {
            let linked = state
                .scheduled
                .get(&id)
                .ok_or(StorageError::NotFound)?
                .practice_instance_id;
            if linked.is_some() {
                return Err(StorageError::Conflict);
            }
            let tree = state.build_practice(practice)?;
            state.practices.insert(tree.id, tree.clone());
            if let Some(row) = state.scheduled.get_mut(&id) {
                row.practice_instance_id = Some(tree.id);
            }
            Ok(tree)
        })
    }
}

#[async_trait]
impl InstanceRepository for InMemoryRepository {
    async fn insert_practice_tree(
        &self,
        practice: &NewPracticeInstance,
    ) -> Result<PracticeInstance, StorageError> {
        self.commit(|state| {
            let tree = state.build_practice(practice)?;
            state.practices.insert(tree.id, tree.clone());
            Ok(tree)
        })
    }

    async fn append_prescription(
        &self,
        practice_id: PracticeInstanceId,
        node: &NewPrescriptionInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<PrescriptionInstance>, StorageError> {
        self.commit(|state| {
            let position = next_position(
                state
                    .practices
                    .get(&practice_id)
                    .ok_or(StorageError::NotFound)?
                    .prescriptions
                    .iter()
                    .map(|p| p.position),
            );
            let built = state.build_prescription(practice_id, position, node)?;
            let id = built.id;
            if let Some(parent) = state.practices.get_mut(&practice_id) {
                parent.prescriptions.push(built);
            }
            let writes = state.cascade(CascadeEdit::Prescription(id), now)?;
            let node = state.prescription(id).cloned().ok_or(StorageError::NotFound)?;
            Ok(Cascaded { node, writes })
        })
    }

    async fn append_movement(
        &self,
        prescription_id: PrescriptionInstanceId,
        node: &NewMovementInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<MovementInstance>, StorageError> {
        self.commit(|state| {
            let position = next_position(
                state
                    .prescription(prescription_id)
                    .ok_or(StorageError::NotFound)?
                    .movements
                    .iter()
                    .map(|m| m.position),
            );
            let built = state.build_movement(prescription_id, position, node)?;
            let id = built.id;
            if let Some(parent) = state.prescription_mut(prescription_id) {
                parent.movements.push(built);
            }
            let writes = state.cascade(CascadeEdit::Movement(id), now)?;
            let node = state.movement(id).cloned().ok_or(StorageError::NotFound)?;
            Ok(Cascaded { node, writes })
        })
    }

    async fn append_set(
        &self,
        movement_id: MovementInstanceId,
        node: &NewSetInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<SetInstance>, StorageError> {
        self.commit(|state| {
            let position = next_position(
                state
                    .movement(movement_id)
                    .ok_or(StorageError::NotFound)?
                    .sets
                    .iter()
                    .map(|s| s.position),
            );
            let built = state.build_set(movement_id, position, node);
            if let Some(parent) = state.movement_mut(movement_id) {
                parent.sets.push(built.clone());
            }
            let writes = state.cascade(CascadeEdit::Movement(movement_id), now)?;
            Ok(Cascaded { node: built, writes })
        })
    }

    async fn get_practice_tree(
        &self,
        id: PracticeInstanceId,
    ) -> Result<PracticeInstance, StorageError> {
        let guard = self.lock()?;
        guard.practices.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn get_practice_header(
        &self,
        id: PracticeInstanceId,
    ) -> Result<PracticeHeader, StorageError> {
        let guard = self.lock()?;
        guard
            .practices
            .get(&id)
            .map(PracticeInstance::header)
            .ok_or(StorageError::NotFound)
    }

    async fn get_set(&self, id: SetInstanceId) -> Result<SetInstance, StorageError> {
        let guard = self.lock()?;
        guard.set(id).cloned().ok_or(StorageError::NotFound)
    }

    async fn instance_owner(&self, node: InstanceNode) -> Result<UserId, StorageError> {
        let guard = self.lock()?;
        guard
            .practices
            .values()
            .find(|p| match node {
                InstanceNode::Practice(id) => p.id == id,
                InstanceNode::Prescription(id) => p.prescriptions.iter().any(|x| x.id == id),
                InstanceNode::Movement(id) => p
                    .prescriptions
                    .iter()
                    .flat_map(|x| &x.movements)
                    .any(|m| m.id == id),
                InstanceNode::Set(id) => p.sets().any(|s| s.id == id),
            })
            .map(|p| p.user_id)
            .ok_or(StorageError::NotFound)
    }

    async fn apply_edit(
        &self,
        edit: CascadeEdit,
        now: DateTime<Utc>,
    ) -> Result<Vec<InstanceWrite>, StorageError> {
        self.commit(|state| state.cascade(edit, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::model::{
        MovementBody, MovementOutline, NewProgramLink, PrescriptionBody, PrescriptionOutline,
        SetBody,
    };
    use coach_core::time::fixed_now;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn outline() -> PracticeOutline {
        PracticeOutline {
            title: "Pull".into(),
            prescriptions: vec![PrescriptionOutline {
                body: PrescriptionBody {
                    block: "main".into(),
                    prescribed_rounds: Some(3),
                },
                movements: vec![MovementOutline {
                    body: MovementBody {
                        movement_class: "row".into(),
                        metric_unit: None,
                        metric_value: None,
                    },
                    sets: vec![SetBody::default(), SetBody::default()],
                }],
            }],
        }
    }

    async fn enrolled(repo: &InMemoryRepository) -> (Program, EnrollmentCommit) {
        let template = repo.insert_practice_template(&outline()).await.unwrap();
        let program = repo
            .insert_program(
                &NewProgram::new(
                    "Block",
                    vec![NewProgramLink {
                        practice_template_id: template.id,
                        sequence_order: 0,
                        interval_days_after: 0,
                    }],
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let user = UserId::random();
        let commit = repo
            .create_enrollment(
                &NewEnrollment::new(program.id(), user, user, Some(program.links()[0].id)),
                NewScheduledPractice {
                    practice_template_id: template.id,
                    scheduled_date: day(1),
                },
            )
            .await
            .unwrap();
        (program, commit)
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict() {
        let repo = InMemoryRepository::new();
        let (_, commit) = enrolled(&repo).await;
        let id = commit.enrollment.id();

        let change = StatusChange {
            enrollment_id: id,
            expected_revision: 0,
            status: EnrollmentStatus::Inactive,
            clear_unstarted_from: None,
        };
        let paused = repo.update_status(&change).await.unwrap();
        assert_eq!(paused.revision(), 1);

        let err = repo.update_status(&change).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert_eq!(repo.get_enrollment(id).await.unwrap().revision(), 1);
    }

    async fn session(repo: &InMemoryRepository) -> PracticeInstance {
        let template = repo.insert_practice_template(&outline()).await.unwrap();
        repo.insert_practice_tree(&NewPracticeInstance::from_template(
            &template,
            UserId::random(),
            day(2),
        ))
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn edit_on_a_missing_set_writes_nothing() {
        let repo = InMemoryRepository::new();
        let tree = session(&repo).await;

        let err = repo
            .apply_edit(CascadeEdit::DeleteSet(SetInstanceId::new(9_999)), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
        assert_eq!(repo.get_practice_tree(tree.id).await.unwrap(), tree);
    }

    #[tokio::test]
    async fn appended_children_follow_existing_positions() {
        let repo = InMemoryRepository::new();
        let tree = session(&repo).await;
        let movement = &tree.prescriptions[0].movements[0];

        let added = repo
            .append_set(
                movement.id,
                &NewSetInstance::from_body(SetBody::default()),
                fixed_now(),
            )
            .await
            .unwrap();
        assert_eq!(added.node.position, 2);
        assert!(added.writes.is_empty());

        let stored = repo.get_practice_tree(tree.id).await.unwrap();
        assert_eq!(stored.prescriptions[0].movements[0].sets.len(), 3);
    }

    #[tokio::test]
    async fn failed_cascade_discards_the_appended_set() {
        let repo = InMemoryRepository::new();
        let tree = session(&repo).await;
        let movement_id = tree.prescriptions[0].movements[0].id;

        // Point the movement at a prescription that does not exist, so the
        // cascade that follows the insert cannot load its parent.
        {
            let mut state = repo.lock().unwrap();
            let movement = state.movement_mut(movement_id).unwrap();
            movement.prescription_id = PrescriptionInstanceId::new(9_999);
        }

        let err = repo
            .append_set(
                movement_id,
                &NewSetInstance::from_body(SetBody::default()),
                fixed_now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));

        let stored = repo.get_practice_tree(tree.id).await.unwrap();
        assert_eq!(stored.prescriptions[0].movements[0].sets.len(), 2);
    }

    #[tokio::test]
    async fn completing_every_set_cascades_in_one_edit() {
        let repo = InMemoryRepository::new();
        let tree = session(&repo).await;
        let sets: Vec<_> = tree.sets().map(|s| s.id).collect();

        let first = repo
            .apply_edit(
                CascadeEdit::SetCompletion {
                    set: sets[0],
                    complete: true,
                },
                fixed_now(),
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let last = repo
            .apply_edit(
                CascadeEdit::SetCompletion {
                    set: sets[1],
                    complete: true,
                },
                fixed_now(),
            )
            .await
            .unwrap();
        assert_eq!(last.len(), 3);

        let stored = repo.get_practice_tree(tree.id).await.unwrap();
        assert!(stored.prescriptions[0].completion.is_complete());
        assert_eq!(
            stored.prescriptions[0].movements[0].completion,
            Completion::completed(fixed_now())
        );
    }

    #[tokio::test]
    async fn cancelling_keeps_started_and_past_rows() {
        let repo = InMemoryRepository::new();
        let (program, commit) = enrolled(&repo).await;
        let id = commit.enrollment.id();
        let template_id = program.links()[0].practice_template_id;

        let advanced = repo
            .commit_advance(&AdvanceCommit {
                enrollment_id: id,
                expected_revision: 0,
                status: EnrollmentStatus::Active,
                current_practice_link_id: commit.enrollment.current_practice_link_id(),
                practice_completion: None,
                schedule: Some(NewScheduledPractice {
                    practice_template_id: template_id,
                    scheduled_date: day(5),
                }),
            })
            .await
            .unwrap();
        assert_eq!(advanced.enrollment.revision(), 1);

        repo.update_status(&StatusChange {
            enrollment_id: id,
            expected_revision: 1,
            status: EnrollmentStatus::Cancelled,
            clear_unstarted_from: Some(day(3)),
        })
        .await
        .unwrap();

        let rows = repo.list_for_enrollment(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].scheduled_date, day(1));
    }
}
