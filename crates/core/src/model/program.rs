use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{PracticeTemplateId, ProgramId, ProgramPracticeLinkId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgramError {
    #[error("program title cannot be empty")]
    EmptyTitle,

    #[error("sequence order {0} is used by more than one link")]
    DuplicateSequenceOrder(u32),

    #[error("link {link} belongs to program {owner}, not {program}")]
    ForeignLink {
        link: ProgramPracticeLinkId,
        owner: ProgramId,
        program: ProgramId,
    },

    #[error("link {link} is not part of program {program}")]
    UnknownLink {
        link: ProgramPracticeLinkId,
        program: ProgramId,
    },
}

//
// ─── LINKS ─────────────────────────────────────────────────────────────────────
//

/// One ordered slot of a program.
///
/// `sequence_order` is a sparse sort key: only its relative order matters, so
/// new slots can be inserted between existing ones without renumbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramPracticeLink {
    pub id: ProgramPracticeLinkId,
    pub program_id: ProgramId,
    pub practice_template_id: PracticeTemplateId,
    pub sequence_order: u32,
    /// Days from this session to the next one in the program.
    pub interval_days_after: u32,
}

/// A link about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProgramLink {
    pub practice_template_id: PracticeTemplateId,
    pub sequence_order: u32,
    pub interval_days_after: u32,
}

fn ensure_unique_orders(orders: impl IntoIterator<Item = u32>) -> Result<(), ProgramError> {
    let mut seen = HashSet::new();
    for order in orders {
        if !seen.insert(order) {
            return Err(ProgramError::DuplicateSequenceOrder(order));
        }
    }
    Ok(())
}

//
// ─── PROGRAM ───────────────────────────────────────────────────────────────────
//

/// A program together with its links, sorted by `sequence_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Program {
    id: ProgramId,
    title: String,
    links: Vec<ProgramPracticeLink>,
}

impl Program {
    /// Rehydrate a program from persisted rows.
    ///
    /// # Errors
    ///
    /// Returns `ProgramError::ForeignLink` if a link belongs to another program
    /// and `ProgramError::DuplicateSequenceOrder` if two links share an order.
    pub fn from_persisted(
        id: ProgramId,
        title: impl Into<String>,
        mut links: Vec<ProgramPracticeLink>,
    ) -> Result<Self, ProgramError> {
        if let Some(foreign) = links.iter().find(|l| l.program_id != id) {
            return Err(ProgramError::ForeignLink {
                link: foreign.id,
                owner: foreign.program_id,
                program: id,
            });
        }
        ensure_unique_orders(links.iter().map(|l| l.sequence_order))?;
        links.sort_by_key(|l| l.sequence_order);

        Ok(Self {
            id,
            title: title.into(),
            links,
        })
    }

    #[must_use]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Links in session order.
    #[must_use]
    pub fn links(&self) -> &[ProgramPracticeLink] {
        &self.links
    }

    /// The link a new enrollment starts on.
    #[must_use]
    pub fn first_link(&self) -> Option<&ProgramPracticeLink> {
        self.links.first()
    }

    /// Look up a link of this program.
    ///
    /// # Errors
    ///
    /// Returns `ProgramError::UnknownLink` if the id is not one of this program's links.
    pub fn link(&self, id: ProgramPracticeLinkId) -> Result<&ProgramPracticeLink, ProgramError> {
        self.links
            .iter()
            .find(|l| l.id == id)
            .ok_or(ProgramError::UnknownLink {
                link: id,
                program: self.id,
            })
    }

    /// The link with the smallest `sequence_order` strictly greater than `order`.
    ///
    /// `None` as input means "before the first link".
    #[must_use]
    pub fn next_after(&self, order: Option<u32>) -> Option<&ProgramPracticeLink> {
        self.links
            .iter()
            .filter(|l| order.is_none_or(|o| l.sequence_order > o))
            .min_by_key(|l| l.sequence_order)
    }
}

/// A program about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProgram {
    title: String,
    links: Vec<NewProgramLink>,
}

impl NewProgram {
    /// Validate a new program.
    ///
    /// # Errors
    ///
    /// Returns `ProgramError::EmptyTitle` for a blank title and
    /// `ProgramError::DuplicateSequenceOrder` if two links share an order.
    pub fn new(title: impl Into<String>, links: Vec<NewProgramLink>) -> Result<Self, ProgramError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(ProgramError::EmptyTitle);
        }
        ensure_unique_orders(links.iter().map(|l| l.sequence_order))?;
        Ok(Self { title, links })
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn links(&self) -> &[NewProgramLink] {
        &self.links
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
