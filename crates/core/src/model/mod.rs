mod completion;
mod draft;
mod enrollment;
mod ids;
mod instance;
mod program;
mod scheduled;
mod template;

pub use completion::{Completion, CompletionError};
pub use draft::{
    DraftError, MAX_CHILDREN, MovementBody, MovementDraft, MovementOutline, PracticeDraft,
    PracticeOutline, PrescriptionBody, PrescriptionDraft, PrescriptionOutline, SetBody, SetDraft,
};
pub use enrollment::{EnrollmentError, EnrollmentStatus, NewEnrollment, ProgramEnrollment};
pub use ids::{
    EnrollmentId, MovementInstanceId, MovementTemplateId, ParseIdError, PracticeInstanceId,
    PracticeTemplateId, PrescriptionInstanceId, PrescriptionTemplateId, ProgramId,
    ProgramPracticeLinkId, ScheduledPracticeId, SetInstanceId, SetTemplateId, UserId,
};
pub use instance::{
    InstanceNode, MovementInstance, NewMovementInstance, NewPracticeInstance,
    NewPrescriptionInstance, NewSetInstance, PracticeHeader, PracticeInstance,
    PrescriptionInstance, SetInstance,
};
pub use program::{NewProgram, NewProgramLink, Program, ProgramError, ProgramPracticeLink};
pub use scheduled::{DateShift, DeferMode, NewScheduledPractice, ScheduleError, ScheduledPractice};
pub use template::{MovementTemplate, PracticeTemplate, PrescriptionTemplate, SetTemplate};
