use anyhow::{Context, Result};
use campus2career::collections::{Applications, Colleges, Notices, Postings, Shortlisted};
use campus2career::models::{ApplicationStatus, Id, PostingKind, PostingStatus, StudentProfile};
use campus2career::workflows::{self, NewPosting};
use campus2career::{collections, Collection, Config, Hub, SqliteBackend, Store};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "campus2career")]
#[command(about = "Internship postings, applications and approvals shared between dashboards")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to the shared database file
    #[arg(long, global = true, env = "C2C_DB")]
    db: Option<PathBuf>,

    /// Poll interval for `watch`, in milliseconds
    #[arg(long, global = true, env = "C2C_POLL_MS")]
    poll_ms: Option<u64>,

    /// Age in seconds at which universal postings go live without review
    #[arg(long, global = true, env = "C2C_AUTO_APPROVE_SECS")]
    auto_approve_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and seed the default colleges
    Init,

    /// Post an internship (universal unless colleges are given)
    Post {
        /// Internship title
        title: String,

        /// Posting company
        #[arg(short, long)]
        company: String,

        /// Restrict to these colleges (repeatable); requires admin approval
        #[arg(long = "college")]
        colleges: Vec<String>,

        #[arg(long)]
        duration: Option<String>,

        #[arg(long)]
        stipend: Option<String>,

        /// Remote, on-site or a city
        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// List internship postings
    Postings {
        /// Only postings visible to students of this college
        #[arg(long)]
        college: Option<String>,

        /// Filter by status (pending, active, closed, rejected)
        #[arg(short, long)]
        status: Option<PostingStatus>,
    },

    /// Approve a pending internship (admin)
    Approve { id: Id },

    /// Reject a pending internship (admin)
    Reject {
        id: Id,

        #[arg(short, long)]
        reason: String,
    },

    /// Close an internship to further applications
    Close { id: Id },

    /// Activate universal postings whose review delay has passed
    Activate,

    /// Apply to an internship as a student
    Apply {
        /// Internship ID
        posting: Id,

        #[command(flatten)]
        student: StudentArgs,
    },

    /// List applications
    Applications {
        /// Filter by status (pending, applied, shortlisted, hired, rejected)
        #[arg(short, long)]
        status: Option<ApplicationStatus>,

        /// Filter by student ID
        #[arg(long)]
        student: Option<String>,
    },

    /// Move an application to a new status (industry)
    Status {
        /// Application ID
        id: Id,

        /// shortlisted, hired or rejected
        status: ApplicationStatus,
    },

    /// List shortlisted candidates
    Shortlisted,

    /// Show notifications for one or more recipients
    Notifications {
        /// e.g. student:asha, company:Infosys, college:IIT Delhi, admin, students
        #[arg(required = true)]
        recipients: Vec<String>,

        /// Only unread notifications
        #[arg(long)]
        unread: bool,
    },

    /// Mark a notification as read
    Read { id: Id },

    /// Manage a student's skills
    Skills {
        /// Student ID
        student: String,

        #[command(subcommand)]
        command: Option<SkillCommands>,
    },

    /// Manage colleges (admin)
    Colleges {
        #[command(subcommand)]
        command: CollegeCommands,
    },

    /// Publish or list notices (admin)
    Notice {
        #[command(subcommand)]
        command: NoticeCommands,
    },

    /// Rate a candidate (industry)
    Rate {
        /// Application ID
        application: Id,

        /// 1 to 5
        rating: u8,

        #[arg(short, long)]
        comment: Option<String>,
    },

    /// Fold data stored under legacy keys into the canonical collections
    Migrate,

    /// Recompute application counts and repair the shortlist
    Reconcile,

    /// Print the raw stored JSON of a collection
    Dump { collection: Collection },

    /// Print changes to collections as they happen, until Ctrl-C
    Watch {
        /// Collections to watch (default: all)
        collections: Vec<Collection>,

        /// Also activate due universal postings on every tick
        #[arg(long)]
        auto_approve: bool,
    },
}

#[derive(Args)]
struct StudentArgs {
    /// Student ID
    #[arg(long = "student")]
    id: String,

    /// Display name
    #[arg(long)]
    name: String,

    #[arg(long)]
    college: String,

    #[arg(long)]
    cgpa: Option<f32>,
}

#[derive(Subcommand)]
enum SkillCommands {
    /// List skills (the default when no subcommand is given)
    List,
    /// Add a skill
    Add { skill: String },
    /// Remove a skill
    Remove { skill: String },
}

#[derive(Subcommand)]
enum CollegeCommands {
    List,
    Add {
        name: String,

        #[arg(short, long)]
        location: String,
    },
    Remove { id: Id },
}

#[derive(Subcommand)]
enum NoticeCommands {
    Publish { content: String },
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::with_overrides(
        cli.global.db,
        cli.global.poll_ms,
        cli.global.auto_approve_secs,
    );
    let backend = SqliteBackend::open(&config.db_path)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    let hub = Hub::new(Store::new(backend));

    let result = run(cli.command, &hub, &config);
    for toast in hub.take_toasts() {
        eprintln!("! {}", toast.message);
    }
    result
}

fn run(command: Commands, hub: &Hub, config: &Config) -> Result<()> {
    let now = Utc::now();

    match command {
        Commands::Init => {
            let seeded = workflows::seed_colleges(hub, now.date_naive())?;
            println!("Database ready at {}", config.db_path.display());
            if seeded > 0 {
                println!("Seeded {} colleges.", seeded);
            }
        }

        Commands::Post {
            title,
            company,
            colleges,
            duration,
            stipend,
            mode,
            description,
        } => {
            let kind = if colleges.is_empty() {
                PostingKind::Universal
            } else {
                PostingKind::CollegeSpecific
            };
            let posting = workflows::post_internship(
                hub,
                NewPosting {
                    title,
                    company,
                    kind,
                    target_colleges: colleges.into_iter().collect(),
                    duration,
                    stipend,
                    mode,
                    description,
                },
                now,
            )?;
            println!("Posted internship #{} ({}).", posting.id, posting.kind);
            match posting.kind {
                PostingKind::Universal => println!(
                    "It goes live after {}s; run `activate` or `watch --auto-approve`.",
                    config.auto_approve_after.as_secs()
                ),
                PostingKind::CollegeSpecific => println!("Waiting for admin approval."),
            }
        }

        Commands::Postings { college, status } => {
            let postings = match &college {
                Some(college) => workflows::available_postings(hub, college)?,
                None => hub.load::<Postings>()?,
            };
            let postings: Vec<_> = postings
                .into_iter()
                .filter(|p| status.is_none_or(|s| p.status == s))
                .collect();
            if postings.is_empty() {
                println!("No internships found.");
            } else {
                println!(
                    "{:<6} {:<9} {:<17} {:<28} {:<16} {:>5}",
                    "ID", "STATUS", "TYPE", "TITLE", "COMPANY", "APPS"
                );
                println!("{}", "-".repeat(86));
                for p in postings {
                    println!(
                        "{:<6} {:<9} {:<17} {:<28} {:<16} {:>5}",
                        p.id,
                        p.status,
                        p.kind,
                        truncate(&p.title, 26),
                        truncate(&p.company, 14),
                        p.applications_count
                    );
                }
            }
        }

        Commands::Approve { id } => {
            let posting = workflows::approve_posting(hub, id, now)?;
            println!("Approved '{}' at {}.", posting.title, posting.company);
        }

        Commands::Reject { id, reason } => {
            let posting = workflows::reject_posting(hub, id, &reason, now)?;
            println!("Rejected '{}'.", posting.title);
        }

        Commands::Close { id } => {
            let posting = workflows::close_posting(hub, id)?;
            println!("Closed '{}'.", posting.title);
        }

        Commands::Activate => {
            let ids = workflows::activate_due_postings(hub, now, config.auto_approve_after)?;
            if ids.is_empty() {
                println!("No postings due for activation.");
            } else {
                for id in ids {
                    println!("Activated internship #{}", id);
                }
            }
        }

        Commands::Apply { posting, student } => {
            let profile = StudentProfile {
                id: student.id,
                name: student.name,
                college: student.college,
                cgpa: student.cgpa,
            };
            let application = workflows::apply(hub, &profile, posting, now)?;
            println!(
                "Application #{} submitted for {} at {}.",
                application.id, application.role, application.company
            );
        }

        Commands::Applications { status, student } => {
            let applications: Vec<_> = hub
                .load::<Applications>()?
                .into_iter()
                .filter(|a| status.is_none_or(|s| a.status == s))
                .filter(|a| student.as_deref().is_none_or(|s| a.student_id == s))
                .collect();
            if applications.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<12} {:<20} {:<18} {:<24} {:<10}",
                    "ID", "STATUS", "STUDENT", "COLLEGE", "ROLE", "APPLIED"
                );
                println!("{}", "-".repeat(94));
                for a in applications {
                    println!(
                        "{:<6} {:<12} {:<20} {:<18} {:<24} {:<10}",
                        a.id,
                        a.status,
                        truncate(&a.student_name, 18),
                        truncate(&a.college, 16),
                        truncate(&format!("{} @ {}", a.role, a.company), 22),
                        a.applied_date.with_timezone(&Local).format("%Y-%m-%d")
                    );
                }
            }
        }

        Commands::Status { id, status } => {
            let application = workflows::transition_application(hub, id, status, now)?;
            println!(
                "Application #{} ({}) is now {}.",
                application.id, application.student_name, application.status
            );
        }

        Commands::Shortlisted => {
            let candidates = hub.load::<Shortlisted>()?;
            if candidates.is_empty() {
                println!("No shortlisted candidates yet.");
            }
            for c in candidates {
                println!("#{} {} ({})", c.id, c.name, c.college);
                println!("  Applied for: {} at {}", c.role, c.company);
                if let Some(cgpa) = c.cgpa {
                    println!("  CGPA: {:.1}", cgpa);
                }
                if !c.skills.is_empty() {
                    println!("  Skills: {}", c.skills.join(", "));
                }
                println!("  Email: {}", c.email);
            }
        }

        Commands::Notifications { recipients, unread } => {
            let notifications: Vec<_> = workflows::notifications_for(hub, &recipients)?
                .into_iter()
                .filter(|n| !unread || !n.read)
                .collect();
            if notifications.is_empty() {
                println!("No notifications.");
            }
            for n in notifications {
                let marker = if n.read { " " } else { "*" };
                println!(
                    "{} #{:<4} [{:?}] {} ({})",
                    marker,
                    n.id,
                    n.kind,
                    n.title,
                    n.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                );
                for line in textwrap::wrap(&n.message, 72) {
                    println!("         {}", line);
                }
            }
        }

        Commands::Read { id } => {
            workflows::mark_read(hub, id)?;
            println!("Marked notification #{} as read.", id);
        }

        Commands::Skills { student, command } => {
            let skills = match command.unwrap_or(SkillCommands::List) {
                SkillCommands::List => workflows::skills_for(hub, &student)?,
                SkillCommands::Add { skill } => workflows::add_skill(hub, &student, &skill)?,
                SkillCommands::Remove { skill } => workflows::remove_skill(hub, &student, &skill)?,
            };
            println!("Skills for {}:", student);
            for skill in skills {
                println!("  - {}", skill);
            }
        }

        Commands::Colleges { command } => match command {
            CollegeCommands::List => {
                let colleges = hub.load::<Colleges>()?;
                if colleges.is_empty() {
                    println!("No colleges found.");
                } else {
                    println!("{:<6} {:<30} {:<24} {:>9}", "ID", "NAME", "LOCATION", "STUDENTS");
                    println!("{}", "-".repeat(72));
                    for c in colleges {
                        println!(
                            "{:<6} {:<30} {:<24} {:>9}",
                            c.id,
                            truncate(&c.name, 28),
                            truncate(&c.location, 22),
                            c.students_count
                        );
                    }
                }
            }
            CollegeCommands::Add { name, location } => {
                let college = workflows::add_college(hub, &name, &location, now.date_naive())?;
                println!("Added college '{}' (ID: {})", college.name, college.id);
            }
            CollegeCommands::Remove { id } => {
                let college = workflows::remove_college(hub, id)?;
                println!("Removed college '{}'.", college.name);
            }
        },

        Commands::Notice { command } => match command {
            NoticeCommands::Publish { content } => {
                let notice = workflows::publish_notice(hub, &content, now)?;
                println!("Published notice #{}.", notice.id);
            }
            NoticeCommands::List => {
                let notices = hub.load::<Notices>()?;
                if notices.is_empty() {
                    println!("No notices.");
                }
                for notice in notices {
                    println!(
                        "#{} ({})",
                        notice.id,
                        notice.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                    );
                    println!("{}\n", textwrap::fill(&notice.content, 72));
                }
            }
        },

        Commands::Rate {
            application,
            rating,
            comment,
        } => {
            let feedback =
                workflows::rate_candidate(hub, application, rating, comment.as_deref(), now)?;
            println!(
                "Rated {} {}/5 (feedback #{}).",
                feedback.student_name, feedback.rating, feedback.id
            );
        }

        Commands::Migrate => {
            let store = hub.store();
            let now = Utc::now();
            let reports = [
                (Collection::Applications, collections::migrate::<Applications>(store, now)?),
                (Collection::Postings, collections::migrate::<Postings>(store, now)?),
                (
                    Collection::Notifications,
                    collections::migrate::<collections::Notifications>(store, now)?,
                ),
                (Collection::Shortlisted, collections::migrate::<Shortlisted>(store, now)?),
            ];
            let mut any = false;
            for (collection, report) in reports {
                if report.legacy_keys.is_empty() && report.retained.is_empty() {
                    continue;
                }
                any = true;
                println!(
                    "{}: moved {} ({} renumbered), duplicates {}, skipped {}",
                    collection,
                    report.moved,
                    report.renumbered,
                    report.duplicates,
                    report.skipped
                );
                if !report.legacy_keys.is_empty() {
                    println!("  removed: {}", report.legacy_keys.join(", "));
                }
                if !report.retained.is_empty() {
                    println!("  kept (unreadable records remain): {}", report.retained.join(", "));
                }
            }
            if !any {
                println!("No legacy keys found.");
            }
        }

        Commands::Reconcile => {
            let fixed = workflows::reconcile_application_counts(hub)?;
            println!("Corrected {} posting(s).", fixed);
            let repair = workflows::reconcile_shortlist(hub, Utc::now())?;
            println!(
                "Shortlist: added {}, removed {}.",
                repair.added.len(),
                repair.removed.len()
            );
        }

        Commands::Dump { collection } => match hub.store().get_raw(collection.key())? {
            Some(raw) => {
                let value: serde_json::Value = serde_json::from_str(&raw)
                    .with_context(|| format!("'{}' does not hold valid JSON", collection))?;
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            None => println!("[]"),
        },

        Commands::Watch {
            collections,
            auto_approve,
        } => {
            let collections = if collections.is_empty() {
                Collection::ALL.to_vec()
            } else {
                collections
            };
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(watch(hub, &collections, config, auto_approve))?;
        }
    }

    Ok(())
}

async fn watch(
    hub: &Hub,
    collections: &[Collection],
    config: &Config,
    auto_approve: bool,
) -> Result<()> {
    let reader = hub.clone();
    let mount = hub.mount(collections, config.poll_interval, move |change| {
        let size = reader
            .store()
            .get::<Vec<serde_json::Value>>(change.collection.key(), Vec::new());
        let stamp = Local::now().format("%H:%M:%S");
        match size {
            Ok(items) => println!(
                "[{}] {} changed ({:?}): {} item(s)",
                stamp,
                change.collection,
                change.origin,
                items.len()
            ),
            Err(e) => eprintln!("[{}] {} changed but could not be read: {}", stamp, change.collection, e),
        }
    });

    let names: Vec<String> = collections.iter().map(|c| c.to_string()).collect();
    println!(
        "Watching {} every {}ms. Press Ctrl-C to stop.",
        names.join(", "),
        config.poll_interval.as_millis()
    );

    let mut ticker = tokio::time::interval(config.poll_interval.max(Duration::from_millis(50)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick(), if auto_approve => {
                match workflows::activate_due_postings(hub, Utc::now(), config.auto_approve_after) {
                    Ok(ids) => {
                        for id in ids {
                            println!("Activated internship #{}", id);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "auto-approval skipped"),
                }
                for toast in hub.take_toasts() {
                    eprintln!("! {}", toast.message);
                }
            }
        }
    }

    mount.unmount().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
