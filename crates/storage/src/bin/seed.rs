use chrono::{DateTime, Utc};
use clap::Parser;
use coach_core::Clock;
use coach_core::model::{
    MovementDraft, NewEnrollment, NewProgram, NewProgramLink, NewScheduledPractice, PracticeDraft,
    PrescriptionDraft, SetDraft, UserId,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use storage::repository::Storage;

/// Seed a database with a sample program and a self-enrollment.
#[derive(Debug, Parser)]
#[command(name = "seed")]
struct Args {
    /// `SQLite` URL.
    #[arg(long = "db", env = "COACH_DB_URL", default_value = "sqlite:dev.sqlite3")]
    db_url: String,

    /// User to enroll; a random one when omitted.
    #[arg(long, env = "COACH_USER_ID")]
    user_id: Option<Uuid>,

    #[arg(long, env = "COACH_PROGRAM_TITLE", default_value = "Foundations")]
    program_title: String,

    /// Number of sessions in the program.
    #[arg(
        long,
        env = "COACH_SESSIONS",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=50)
    )]
    sessions: u32,

    /// Days between consecutive sessions.
    #[arg(long, env = "COACH_INTERVAL_DAYS", default_value_t = 2)]
    interval_days: u32,

    /// Fixed current time (RFC 3339) for deterministic seeding.
    #[arg(long, env = "COACH_NOW")]
    now: Option<DateTime<Utc>>,
}

fn session_draft(program_title: &str, index: u32) -> PracticeDraft {
    let working_set = SetDraft {
        reps: Some(5),
        load_unit: Some("kg".into()),
        ..SetDraft::default()
    };
    PracticeDraft {
        title: format!("{program_title} session {}", index + 1),
        prescriptions: vec![
            PrescriptionDraft {
                block: "warm-up".into(),
                prescribed_rounds: None,
                movements: vec![MovementDraft {
                    movement_class: "mobility flow".into(),
                    metric_unit: Some("min".into()),
                    metric_value: Some(5.0),
                    sets: Vec::new(),
                }],
            },
            PrescriptionDraft {
                block: "strength".into(),
                prescribed_rounds: Some(3),
                movements: vec![
                    MovementDraft {
                        movement_class: "squat".into(),
                        metric_unit: None,
                        metric_value: None,
                        sets: vec![working_set.clone(); 3],
                    },
                    MovementDraft {
                        movement_class: "row".into(),
                        metric_unit: None,
                        metric_value: None,
                        sets: vec![working_set; 3],
                    },
                ],
            },
        ],
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let today = Clock::pinned_or_system(args.now).today();

    let storage = Storage::sqlite(&args.db_url).await?;

    let mut links = Vec::with_capacity(usize::try_from(args.sessions)?);
    for index in 0..args.sessions {
        let outline = session_draft(&args.program_title, index).validate()?;
        let template = storage.templates.insert_practice_template(&outline).await?;
        links.push(NewProgramLink {
            practice_template_id: template.id,
            sequence_order: index,
            interval_days_after: args.interval_days,
        });
    }
    let program = storage
        .programs
        .insert_program(&NewProgram::new(args.program_title.clone(), links)?)
        .await?;

    let first = program.first_link().ok_or("program has no sessions")?;
    let user = args.user_id.map_or_else(UserId::random, UserId::new);
    let created = storage
        .enrollments
        .create_enrollment(
            &NewEnrollment::new(program.id(), user, user, Some(first.id)),
            NewScheduledPractice {
                practice_template_id: first.practice_template_id,
                scheduled_date: today,
            },
        )
        .await?;

    tracing::info!(
        program = %program.id(),
        enrollment = %created.enrollment.id(),
        user = %user,
        sessions = program.links().len(),
        "seeded program"
    );
    println!(
        "seeded program {} ({} sessions) and enrollment {} for user {user}",
        program.id(),
        program.links().len(),
        created.enrollment.id()
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("seed failed: {err}");
        std::process::exit(1);
    }
}
