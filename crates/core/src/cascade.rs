//! Bottom-up completion planning for Set → Movement → Prescription.
//!
//! Derived flags are always recomputed from the current children rather than
//! maintained with counters, so concurrent or reordered leaf updates converge
//! on the same state. Planning compares every computed flag against the
//! stored one and emits a write only when they differ; running it again on
//! the resulting state yields no writes.
//!
//! Practice-level completion is not derived here. It is declared by program
//! advancement, so a session can be finished with optional blocks left open.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::{
    Completion, InstanceNode, MovementInstanceId, PracticeInstanceId, PrescriptionInstanceId,
    SetInstanceId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CascadeError {
    #[error("movement {movement} is not part of prescription {prescription}")]
    ForeignMovement {
        movement: MovementInstanceId,
        prescription: PrescriptionInstanceId,
    },

    #[error("set {set} is not part of movement {movement}")]
    ForeignSet {
        set: SetInstanceId,
        movement: MovementInstanceId,
    },

    #[error("editing {node:?} needs the snapshot of its movement")]
    MissingMovement { node: InstanceNode },
}

//
// ─── SNAPSHOTS ─────────────────────────────────────────────────────────────────
//

/// Stored flag of one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetState {
    pub id: SetInstanceId,
    pub completion: Completion,
}

/// A movement together with the state of each of its sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementSnapshot {
    pub id: MovementInstanceId,
    pub prescription_id: PrescriptionInstanceId,
    pub completion: Completion,
    pub sets: Vec<SetState>,
}

/// A sibling movement as seen from its prescription: stored flag and set count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementSummary {
    pub id: MovementInstanceId,
    pub completion: Completion,
    pub set_count: u32,
}

/// A prescription with a summary of each of its movements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionSnapshot {
    pub id: PrescriptionInstanceId,
    pub practice_id: PracticeInstanceId,
    pub completion: Completion,
    pub movements: Vec<MovementSummary>,
}

impl MovementSnapshot {
    /// Apply a leaf completion change in memory.
    ///
    /// Returns the set write when the stored flag actually changes.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::ForeignSet` if the set is not one of this movement's.
    pub fn set_complete(
        &mut self,
        set: SetInstanceId,
        complete: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<InstanceWrite>, CascadeError> {
        let state = self
            .sets
            .iter_mut()
            .find(|s| s.id == set)
            .ok_or(CascadeError::ForeignSet {
                set,
                movement: self.id,
            })?;
        Ok(state.completion.transition(complete, now).map(|completion| {
            state.completion = completion;
            InstanceWrite::SetCompletion { id: set, completion }
        }))
    }

    /// Remove a set in memory, returning the delete write.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::ForeignSet` if the set is not one of this movement's.
    pub fn remove_set(&mut self, set: SetInstanceId) -> Result<InstanceWrite, CascadeError> {
        let before = self.sets.len();
        self.sets.retain(|s| s.id != set);
        if self.sets.len() == before {
            return Err(CascadeError::ForeignSet {
                set,
                movement: self.id,
            });
        }
        Ok(InstanceWrite::DeleteSet { id: set })
    }
}

//
// ─── WRITES ────────────────────────────────────────────────────────────────────
//

/// One mutation of the instance tree, committed in batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceWrite {
    SetCompletion {
        id: SetInstanceId,
        completion: Completion,
    },
    MovementCompletion {
        id: MovementInstanceId,
        completion: Completion,
    },
    PrescriptionCompletion {
        id: PrescriptionInstanceId,
        completion: Completion,
    },
    PracticeCompletion {
        id: PracticeInstanceId,
        completion: Completion,
    },
    DeleteSet {
        id: SetInstanceId,
    },
}

/// A change to a session tree that the cascade has to follow.
///
/// Storage reads the snapshots an edit needs, plans it with [`plan_edit`] and
/// applies the result in the same unit, so two edits never plan against the
/// same stale state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeEdit {
    /// Recompute a movement from its sets, then its prescription.
    Movement(MovementInstanceId),
    /// Recompute a prescription from the stored flags of its movements.
    Prescription(PrescriptionInstanceId),
    SetCompletion { set: SetInstanceId, complete: bool },
    DeleteSet(SetInstanceId),
}

impl CascadeEdit {
    /// The node the edit starts from.
    #[must_use]
    pub fn node(&self) -> InstanceNode {
        match *self {
            Self::Movement(id) => InstanceNode::Movement(id),
            Self::Prescription(id) => InstanceNode::Prescription(id),
            Self::SetCompletion { set, .. } | Self::DeleteSet(set) => InstanceNode::Set(set),
        }
    }
}

//
// ─── RULES ─────────────────────────────────────────────────────────────────────
//

/// A movement is complete iff it has no sets or every set is complete.
#[must_use]
pub fn movement_is_complete(sets: &[SetState]) -> bool {
    sets.iter().all(|s| s.completion.is_complete())
}

/// Plan the writes that bring `prescription` (and, if given, the `changed`
/// movement) in line with their children.
///
/// The changed movement is recomputed from its sets. Sibling movements are
/// not recomputed; only their stored flag is read, except that a sibling with
/// zero sets is auto-completed first so the prescription converges in one pass.
///
/// # Errors
///
/// Returns `CascadeError::ForeignMovement` if `changed` does not belong to the
/// prescription.
pub fn plan_cascade(
    prescription: &PrescriptionSnapshot,
    changed: Option<&MovementSnapshot>,
    now: DateTime<Utc>,
) -> Result<Vec<InstanceWrite>, CascadeError> {
    if let Some(movement) = changed {
        let belongs = movement.prescription_id == prescription.id
            && prescription.movements.iter().any(|m| m.id == movement.id);
        if !belongs {
            return Err(CascadeError::ForeignMovement {
                movement: movement.id,
                prescription: prescription.id,
            });
        }
    }

    let mut writes = Vec::new();
    let mut all_complete = true;

    for summary in &prescription.movements {
        let (stored, target) = match changed {
            Some(movement) if movement.id == summary.id => {
                (movement.completion, movement_is_complete(&movement.sets))
            }
            _ if summary.set_count == 0 => (summary.completion, true),
            _ => (summary.completion, summary.completion.is_complete()),
        };

        if let Some(completion) = stored.transition(target, now) {
            writes.push(InstanceWrite::MovementCompletion {
                id: summary.id,
                completion,
            });
        }
        all_complete &= target;
    }

    if let Some(completion) = prescription.completion.transition(all_complete, now) {
        writes.push(InstanceWrite::PrescriptionCompletion {
            id: prescription.id,
            completion,
        });
    }

    Ok(writes)
}

/// Plan `edit` and the cascade it triggers against one consistent read.
///
/// `movement` is the snapshot of the movement the edit touches (the parent of
/// the set for set edits); it is ignored for `CascadeEdit::Prescription`. The
/// leaf write, if any, comes first in the result.
///
/// # Errors
///
/// Returns `CascadeError::MissingMovement` if a movement-level edit comes
/// without its snapshot, or the errors of [`plan_cascade`] and the leaf edit.
pub fn plan_edit(
    edit: CascadeEdit,
    mut prescription: PrescriptionSnapshot,
    movement: Option<MovementSnapshot>,
    now: DateTime<Utc>,
) -> Result<Vec<InstanceWrite>, CascadeError> {
    if let CascadeEdit::Prescription(_) = edit {
        return plan_cascade(&prescription, None, now);
    }
    let mut movement = movement.ok_or(CascadeError::MissingMovement { node: edit.node() })?;

    let mut writes = Vec::new();
    match edit {
        CascadeEdit::SetCompletion { set, complete } => {
            writes.extend(movement.set_complete(set, complete, now)?);
        }
        CascadeEdit::DeleteSet(set) => {
            writes.push(movement.remove_set(set)?);
            let summary = prescription.movements.iter_mut().find(|m| m.id == movement.id);
            if let Some(summary) = summary {
                summary.set_count = summary.set_count.saturating_sub(1);
            }
        }
        CascadeEdit::Movement(_) | CascadeEdit::Prescription(_) => {}
    }
    writes.extend(plan_cascade(&prescription, Some(&movement), now)?);
    Ok(writes)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    const P: u64 = 1;

    /// Apply planned writes in memory, as a commit would.
    fn apply_to_snapshots(
        writes: &[InstanceWrite],
        prescription: &mut PrescriptionSnapshot,
        movement: Option<&mut MovementSnapshot>,
    ) {
        let mut movement = movement;
        for write in writes {
            match *write {
                InstanceWrite::MovementCompletion { id, completion } => {
                    if let Some(m) = prescription.movements.iter_mut().find(|m| m.id == id) {
                        m.completion = completion;
                    }
                    if let Some(m) = movement.as_deref_mut().filter(|m| m.id == id) {
                        m.completion = completion;
                    }
                }
                InstanceWrite::PrescriptionCompletion { id, completion } if id == prescription.id => {
                    prescription.completion = completion;
                }
                InstanceWrite::SetCompletion { id, completion } => {
                    if let Some(s) = movement
                        .as_deref_mut()
                        .and_then(|m| m.sets.iter_mut().find(|s| s.id == id))
                    {
                        s.completion = completion;
                    }
                }
                InstanceWrite::DeleteSet { id } => {
                    if let Some(m) = movement.as_deref_mut() {
                        m.sets.retain(|s| s.id != id);
                    }
                }
                _ => {}
            }
        }
        if let Some(m) = movement.as_deref() {
            if let Some(summary) = prescription.movements.iter_mut().find(|s| s.id == m.id) {
                summary.set_count = u32::try_from(m.sets.len()).unwrap_or(u32::MAX);
            }
        }
    }

    fn set(id: u64, complete: bool) -> SetState {
        SetState {
            id: SetInstanceId::new(id),
            completion: if complete {
                Completion::completed(fixed_now())
            } else {
                Completion::incomplete()
            },
        }
    }

    fn movement(id: u64, sets: Vec<SetState>) -> MovementSnapshot {
        MovementSnapshot {
            id: MovementInstanceId::new(id),
            prescription_id: PrescriptionInstanceId::new(P),
            completion: Completion::incomplete(),
            sets,
        }
    }

    fn prescription(movements: &[&MovementSnapshot]) -> PrescriptionSnapshot {
        PrescriptionSnapshot {
            id: PrescriptionInstanceId::new(P),
            practice_id: PracticeInstanceId::new(1),
            completion: Completion::incomplete(),
            movements: movements
                .iter()
                .map(|m| MovementSummary {
                    id: m.id,
                    completion: m.completion,
                    set_count: u32::try_from(m.sets.len()).unwrap(),
                })
                .collect(),
        }
    }

    /// Set one leaf, plan, and apply; mirrors a single committed request.
    fn complete_set(
        p: &mut PrescriptionSnapshot,
        m: &mut MovementSnapshot,
        set: u64,
        complete: bool,
    ) -> Vec<InstanceWrite> {
        let mut writes: Vec<_> = m
            .set_complete(SetInstanceId::new(set), complete, fixed_now())
            .unwrap()
            .into_iter()
            .collect();
        writes.extend(plan_cascade(p, Some(m), fixed_now()).unwrap());
        apply_to_snapshots(&writes, p, Some(m));
        writes
    }

    #[test]
    fn movement_completes_only_when_every_set_does() {
        let mut m = movement(10, vec![set(1, false), set(2, false)]);
        let mut p = prescription(&[&m]);

        complete_set(&mut p, &mut m, 1, true);
        assert!(!m.completion.is_complete());

        complete_set(&mut p, &mut m, 2, true);
        assert!(m.completion.is_complete());
        assert_eq!(m.completion.completed_at(), Some(fixed_now()));
        assert!(p.completion.is_complete());

        complete_set(&mut p, &mut m, 2, false);
        assert!(!m.completion.is_complete());
        assert_eq!(m.completion.completed_at(), None);
        assert!(!p.completion.is_complete());
    }

    #[test]
    fn second_run_performs_no_writes() {
        let mut m = movement(10, vec![set(1, true)]);
        let mut p = prescription(&[&m]);

        let first = plan_cascade(&p, Some(&m), fixed_now()).unwrap();
        assert_eq!(first.len(), 2);
        apply_to_snapshots(&first, &mut p, Some(&mut m));

        assert!(plan_cascade(&p, Some(&m), fixed_now()).unwrap().is_empty());
    }

    #[test]
    fn order_of_sibling_completions_does_not_matter() {
        let run = |order: [u64; 2]| {
            let mut m = movement(10, vec![set(1, false), set(2, false)]);
            let mut p = prescription(&[&m]);
            for id in order {
                complete_set(&mut p, &mut m, id, true);
            }
            (m.completion, p.completion)
        };
        assert_eq!(run([1, 2]), run([2, 1]));
    }

    #[test]
    fn empty_movement_completes_on_first_evaluation() {
        let m = movement(10, Vec::new());
        let p = prescription(&[&m]);
        let writes = plan_cascade(&p, Some(&m), fixed_now()).unwrap();
        assert!(writes.contains(&InstanceWrite::MovementCompletion {
            id: MovementInstanceId::new(10),
            completion: Completion::completed(fixed_now()),
        }));
    }

    #[test]
    fn zero_set_siblings_are_auto_completed_before_the_prescription() {
        let mut busy = movement(10, vec![set(1, false)]);
        let empty = movement(11, Vec::new());
        let mut p = prescription(&[&busy, &empty]);

        let writes = complete_set(&mut p, &mut busy, 1, true);
        assert!(writes.contains(&InstanceWrite::MovementCompletion {
            id: MovementInstanceId::new(11),
            completion: Completion::completed(fixed_now()),
        }));
        assert!(p.completion.is_complete());
    }

    #[test]
    fn siblings_with_sets_are_read_not_recomputed() {
        let m = movement(10, vec![set(1, true)]);
        let mut sibling = movement(11, vec![set(2, true)]);
        sibling.completion = Completion::incomplete();
        let p = prescription(&[&m, &sibling]);

        let writes = plan_cascade(&p, Some(&m), fixed_now()).unwrap();
        assert_eq!(
            writes,
            vec![InstanceWrite::MovementCompletion {
                id: MovementInstanceId::new(10),
                completion: Completion::completed(fixed_now()),
            }]
        );
    }

    #[test]
    fn deleting_the_last_incomplete_set_completes_the_movement() {
        let mut m = movement(10, vec![set(1, true), set(2, false)]);
        let mut p = prescription(&[&m]);

        let mut writes = vec![m.remove_set(SetInstanceId::new(2)).unwrap()];
        writes.extend(plan_cascade(&p, Some(&m), fixed_now()).unwrap());
        apply_to_snapshots(&writes, &mut p, Some(&mut m));

        assert!(m.completion.is_complete());
        assert!(p.completion.is_complete());
        assert_eq!(p.movements[0].set_count, 1);
    }

    #[test]
    fn edits_plan_the_leaf_write_before_the_cascade() {
        let m = movement(10, vec![set(1, true), set(2, false)]);
        let p = prescription(&[&m]);

        let writes = plan_edit(
            CascadeEdit::SetCompletion {
                set: SetInstanceId::new(2),
                complete: true,
            },
            p.clone(),
            Some(m.clone()),
            fixed_now(),
        )
        .unwrap();
        assert_eq!(writes.len(), 3);
        assert!(matches!(writes[0], InstanceWrite::SetCompletion { .. }));

        let writes = plan_edit(
            CascadeEdit::DeleteSet(SetInstanceId::new(2)),
            p.clone(),
            Some(m),
            fixed_now(),
        )
        .unwrap();
        assert_eq!(writes[0], InstanceWrite::DeleteSet { id: SetInstanceId::new(2) });
        assert!(writes.contains(&InstanceWrite::PrescriptionCompletion {
            id: PrescriptionInstanceId::new(P),
            completion: Completion::completed(fixed_now()),
        }));

        let err = plan_edit(
            CascadeEdit::Movement(MovementInstanceId::new(10)),
            p,
            None,
            fixed_now(),
        )
        .unwrap_err();
        assert!(matches!(err, CascadeError::MissingMovement { .. }));
    }

    #[test]
    fn foreign_nodes_are_rejected() {
        let m = movement(10, Vec::new());
        let other = movement(99, Vec::new());
        let p = prescription(&[&m]);
        assert!(matches!(
            plan_cascade(&p, Some(&other), fixed_now()).unwrap_err(),
            CascadeError::ForeignMovement { .. }
        ));

        let mut m = m;
        assert!(matches!(
            m.remove_set(SetInstanceId::new(5)).unwrap_err(),
            CascadeError::ForeignSet { .. }
        ));
    }
}
