use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error type for parsing ID from string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

/// Declares a storage-assigned numeric identifier.
///
/// Every id gets `new`/`value`, a `Name(n)` debug form, a bare `Display`
/// and a `FromStr` that rejects anything but an unsigned integer.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the underlying u64 value
            #[must_use]
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self::new).map_err(|_| ParseIdError {
                    kind: stringify!($name),
                })
            }
        }
    };
}

// ─── Program side ──────────────────────────────────────────────────────────────

numeric_id!(
    /// Unique identifier for a Program
    ProgramId
);
numeric_id!(
    /// Unique identifier for one ordered slot of a Program
    ProgramPracticeLinkId
);
numeric_id!(
    /// Unique identifier for a ProgramEnrollment
    EnrollmentId
);
numeric_id!(
    /// Unique identifier for a ScheduledPractice row
    ScheduledPracticeId
);

// ─── Templates ─────────────────────────────────────────────────────────────────

numeric_id!(PracticeTemplateId);
numeric_id!(PrescriptionTemplateId);
numeric_id!(MovementTemplateId);
numeric_id!(SetTemplateId);

// ─── Instances ─────────────────────────────────────────────────────────────────

numeric_id!(PracticeInstanceId);
numeric_id!(PrescriptionInstanceId);
numeric_id!(MovementInstanceId);
numeric_id!(SetInstanceId);

// ─── Users ─────────────────────────────────────────────────────────────────────

/// Identifier of a user account.
///
/// Accounts live in an external identity system, so this is an opaque UUID
/// rather than a storage-assigned number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseIdError { kind: "UserId" })
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
