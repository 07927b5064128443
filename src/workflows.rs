use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::collections::{
    Applications, Collection, Colleges, FeedbackLog, Notices, Notifications, Postings, Shortlisted,
    Skills,
};
use crate::error::ActionError;
use crate::hub::Hub;
use crate::models::{
    next_id, Application, ApplicationStatus, ALL_STUDENTS, College, Feedback, Id, InternshipPosting, Notice,
    Notification, NotificationKind, PostingKind, PostingStatus, ShortlistedCandidate,
    StudentProfile, StudentSkills,
};

pub type Result<T> = std::result::Result<T, ActionError>;

pub const ADMIN: &str = "admin";

pub const DEFAULT_SKILLS: [&str; 5] = [
    "C++",
    "Python",
    "Data Structures",
    "Web Development",
    "Database Management",
];

const DEFAULT_COLLEGES: [(&str, &str, u32); 4] = [
    ("IIT Delhi", "New Delhi", 1250),
    ("NIT Patna", "Patna, Bihar", 890),
    ("IIT Bombay", "Mumbai, Maharashtra", 1500),
    ("BITS Pilani", "Pilani, Rajasthan", 720),
];

pub fn student_recipient(student_id: &str) -> String {
    format!("student:{}", student_id)
}

pub fn company_recipient(company: &str) -> String {
    format!("company:{}", company)
}

pub fn college_recipient(college: &str) -> String {
    format!("college:{}", college)
}

fn not_blank(value: &str, what: &'static str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ActionError::Blank(what));
    }
    Ok(trimmed.to_string())
}

// --- Notifications ---

pub fn notify(
    hub: &Hub,
    recipient: &str,
    title: &str,
    message: &str,
    kind: NotificationKind,
    now: DateTime<Utc>,
) -> Result<Notification> {
    let notification = hub.update::<Notifications, _>(|items| {
        let notification = Notification {
            id: next_id(items),
            recipient: recipient.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            timestamp: now,
            kind,
            read: false,
        };
        items.push(notification.clone());
        notification
    })?;
    Ok(notification)
}

/// Notifications addressed to any of `recipients`, newest first. Any
/// `student:` recipient also receives those sent to all students.
pub fn notifications_for(hub: &Hub, recipients: &[String]) -> Result<Vec<Notification>> {
    let any_student = recipients.iter().any(|r| r.starts_with("student:"));
    let mut items: Vec<Notification> = hub
        .load::<Notifications>()?
        .into_iter()
        .filter(|n| {
            recipients.iter().any(|r| *r == n.recipient)
                || (any_student && n.recipient == ALL_STUDENTS)
        })
        .collect();
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    Ok(items)
}

pub fn mark_read(hub: &Hub, id: Id) -> Result<()> {
    let mut items = hub.load::<Notifications>()?;
    let item = items
        .iter_mut()
        .find(|n| n.id == id)
        .ok_or(ActionError::NotFound { what: "notification", id })?;
    if item.read {
        return Ok(());
    }
    item.read = true;
    hub.save::<Notifications>(&items)?;
    Ok(())
}

// --- Postings ---

#[derive(Debug, Clone)]
pub struct NewPosting {
    pub title: String,
    pub company: String,
    pub kind: PostingKind,
    pub target_colleges: BTreeSet<String>,
    pub duration: Option<String>,
    pub stipend: Option<String>,
    pub mode: Option<String>,
    pub description: Option<String>,
}

/// Record a new posting as pending. College-specific postings wait for an
/// admin; universal ones wait for [`activate_due_postings`].
pub fn post_internship(hub: &Hub, new: NewPosting, now: DateTime<Utc>) -> Result<InternshipPosting> {
    let title = not_blank(&new.title, "title")?;
    let company = not_blank(&new.company, "company")?;
    let target_colleges = match new.kind {
        PostingKind::Universal => BTreeSet::new(),
        PostingKind::CollegeSpecific if new.target_colleges.is_empty() => {
            return Err(ActionError::NoTargetColleges);
        }
        PostingKind::CollegeSpecific => new.target_colleges,
    };

    let posting = hub.update::<Postings, _>(|items| {
        let posting = InternshipPosting {
            id: next_id(items),
            title,
            company,
            kind: new.kind,
            target_colleges,
            status: PostingStatus::Pending,
            applications_count: 0,
            posted_at: now,
            duration: new.duration,
            stipend: new.stipend,
            mode: new.mode,
            description: new.description,
            rejection_reason: None,
        };
        items.push(posting.clone());
        posting
    })?;
    tracing::info!(id = posting.id, kind = %posting.kind, "internship posted");

    if posting.kind == PostingKind::CollegeSpecific {
        let colleges: Vec<&str> = posting.target_colleges.iter().map(String::as_str).collect();
        notify(
            hub,
            ADMIN,
            "Internship awaiting approval",
            &format!(
                "{} at {} for {}",
                posting.title,
                posting.company,
                colleges.join(", ")
            ),
            NotificationKind::Info,
            now,
        )?;
    }
    Ok(posting)
}

/// Activate pending universal postings older than `delay`. Returns their ids.
pub fn activate_due_postings(hub: &Hub, now: DateTime<Utc>, delay: Duration) -> Result<Vec<Id>> {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    let mut postings = hub.load::<Postings>()?;
    let mut activated = Vec::new();
    for posting in postings.iter_mut().filter(|p| {
        p.kind == PostingKind::Universal
            && p.status == PostingStatus::Pending
            && now.signed_duration_since(p.posted_at) >= delay
    }) {
        posting.status = PostingStatus::Active;
        activated.push(posting.clone());
    }
    if activated.is_empty() {
        return Ok(Vec::new());
    }
    hub.save::<Postings>(&postings)?;

    for posting in &activated {
        notify(
            hub,
            &company_recipient(&posting.company),
            "Internship approved",
            &format!("{} is now live for all students.", posting.title),
            NotificationKind::Success,
            now,
        )?;
    }
    Ok(activated.iter().map(|p| p.id).collect())
}

pub fn approve_posting(hub: &Hub, id: Id, now: DateTime<Utc>) -> Result<InternshipPosting> {
    let posting = set_posting_status(hub, id, |posting| {
        if posting.status != PostingStatus::Pending {
            return Err(ActionError::NotPending { id });
        }
        posting.status = PostingStatus::Active;
        Ok(())
    })?;
    tracing::info!(id, "internship approved");

    notify(
        hub,
        &company_recipient(&posting.company),
        "Internship approved",
        &format!("{} is now visible to students.", posting.title),
        NotificationKind::Success,
        now,
    )?;
    for college in &posting.target_colleges {
        notify(
            hub,
            &college_recipient(college),
            "New internship posted",
            &format!("{} at {} is now available.", posting.title, posting.company),
            NotificationKind::Info,
            now,
        )?;
    }
    Ok(posting)
}

pub fn reject_posting(hub: &Hub, id: Id, reason: &str, now: DateTime<Utc>) -> Result<InternshipPosting> {
    let reason = not_blank(reason, "rejection reason")?;
    let posting = set_posting_status(hub, id, |posting| {
        if posting.status != PostingStatus::Pending {
            return Err(ActionError::NotPending { id });
        }
        posting.status = PostingStatus::Rejected;
        posting.rejection_reason = Some(reason.clone());
        Ok(())
    })?;

    notify(
        hub,
        &company_recipient(&posting.company),
        "Internship rejected",
        &format!("{} was rejected: {}", posting.title, reason),
        NotificationKind::Warning,
        now,
    )?;
    Ok(posting)
}

pub fn close_posting(hub: &Hub, id: Id) -> Result<InternshipPosting> {
    set_posting_status(hub, id, |posting| {
        posting.status = PostingStatus::Closed;
        Ok(())
    })
}

fn set_posting_status(
    hub: &Hub,
    id: Id,
    change: impl FnOnce(&mut InternshipPosting) -> Result<()>,
) -> Result<InternshipPosting> {
    let mut postings = hub.load::<Postings>()?;
    let posting = postings
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or(ActionError::NotFound { what: "internship", id })?;
    change(posting)?;
    let updated = posting.clone();
    hub.save::<Postings>(&postings)?;
    Ok(updated)
}

/// Postings a student of `college` can currently apply to.
pub fn available_postings(hub: &Hub, college: &str) -> Result<Vec<InternshipPosting>> {
    Ok(hub
        .load::<Postings>()?
        .into_iter()
        .filter(|p| p.is_visible_to(college))
        .collect())
}

// --- Applications ---
//
// Writes spanning two collections (an application plus its posting's counter,
// a status change plus the shortlist) are not atomic. The reconcile functions
// below bring them back in step.

pub fn apply(
    hub: &Hub,
    student: &StudentProfile,
    posting_id: Id,
    now: DateTime<Utc>,
) -> Result<Application> {
    let posting = hub
        .load::<Postings>()?
        .into_iter()
        .find(|p| p.id == posting_id)
        .ok_or(ActionError::NotFound { what: "internship", id: posting_id })?;
    if !posting.is_visible_to(&student.college) {
        return Err(ActionError::NotVisible {
            posting: posting_id,
            college: student.college.clone(),
        });
    }

    let mut applications = hub.load::<Applications>()?;
    if applications
        .iter()
        .any(|a| a.internship_id == posting_id && a.student_id == student.id)
    {
        return Err(ActionError::AlreadyApplied {
            student: student.id.clone(),
            posting: posting_id,
        });
    }
    let application = Application {
        id: next_id(&applications),
        internship_id: posting_id,
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        college: student.college.clone(),
        cgpa: student.cgpa,
        role: posting.title.clone(),
        company: posting.company.clone(),
        location: posting.mode.clone(),
        applied_date: now,
        status: ApplicationStatus::Applied,
    };
    applications.push(application.clone());
    hub.save::<Applications>(&applications)?;

    hub.update::<Postings, _>(|postings| {
        if let Some(p) = postings.iter_mut().find(|p| p.id == posting_id) {
            p.applications_count += 1;
        }
    })?;

    notify(
        hub,
        &company_recipient(&posting.company),
        "New application",
        &format!("{} from {} applied for {}.", student.name, student.college, posting.title),
        NotificationKind::Info,
        now,
    )?;
    tracing::info!(application = application.id, internship = posting_id, "application submitted");
    Ok(application)
}

/// Move an application to `to`, keeping the shortlist projection in step.
///
/// Shortlisting an already shortlisted application only re-writes its
/// shortlist entry, so a transition whose second save failed can be retried.
pub fn transition_application(
    hub: &Hub,
    id: Id,
    to: ApplicationStatus,
    now: DateTime<Utc>,
) -> Result<Application> {
    let mut applications = hub.load::<Applications>()?;
    let application = applications
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or(ActionError::NotFound { what: "application", id })?;
    let from = application.status;
    let repeat = from == to && to == ApplicationStatus::Shortlisted;
    if !repeat && !from.can_move_to(to) {
        return Err(ActionError::InvalidTransition { from, to });
    }
    application.status = to;
    let application = application.clone();
    if !repeat {
        hub.save::<Applications>(&applications)?;
    }

    if to == ApplicationStatus::Shortlisted {
        let skills = skills_of(hub, &application.student_id)?;
        let candidate = shortlist_entry(&application, skills, now);
        hub.update::<Shortlisted, _>(|items| {
            items.retain(|c| c.id != candidate.id);
            items.push(candidate);
        })?;
    } else if from == ApplicationStatus::Shortlisted && to == ApplicationStatus::Rejected {
        hub.update::<Shortlisted, _>(|items| items.retain(|c| c.id != id))?;
    }
    if repeat {
        return Ok(application);
    }

    let (title, kind) = match to {
        ApplicationStatus::Shortlisted => ("You have been shortlisted", NotificationKind::Success),
        ApplicationStatus::Hired => ("Offer received", NotificationKind::Success),
        ApplicationStatus::Rejected => ("Application update", NotificationKind::Warning),
        ApplicationStatus::Pending | ApplicationStatus::Applied => {
            ("Application update", NotificationKind::Info)
        }
    };
    notify(
        hub,
        &student_recipient(&application.student_id),
        title,
        &format!("{} at {}: {}", application.role, application.company, to),
        kind,
        now,
    )?;
    Ok(application)
}

fn skills_of(hub: &Hub, student_id: &str) -> Result<Vec<String>> {
    Ok(hub
        .load::<Skills>()?
        .into_iter()
        .find(|s| s.student_id == student_id)
        .map(|s| s.skills)
        .unwrap_or_default())
}

fn shortlist_entry(
    application: &Application,
    skills: Vec<String>,
    now: DateTime<Utc>,
) -> ShortlistedCandidate {
    let handle: String = application
        .student_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(".")
        .to_lowercase();
    ShortlistedCandidate {
        id: application.id,
        internship_id: application.internship_id,
        name: application.student_name.clone(),
        college: application.college.clone(),
        role: application.role.clone(),
        company: application.company.clone(),
        cgpa: application.cgpa,
        skills,
        email: format!("{}@student.campus2career.in", handle),
        phone: None,
        shortlisted_at: now,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShortlistRepair {
    pub added: Vec<Id>,
    pub removed: Vec<Id>,
}

/// Bring the shortlist back in step with application statuses.
///
/// Every shortlisted or hired application gets an entry. Entries whose
/// application was rejected or never got past applied are dropped. Entries
/// with no application behind them (migrated from older builds) are kept.
pub fn reconcile_shortlist(hub: &Hub, now: DateTime<Utc>) -> Result<ShortlistRepair> {
    let applications = hub.load::<Applications>()?;
    let mut shortlist = hub.load::<Shortlisted>()?;
    let mut repair = ShortlistRepair::default();

    shortlist.retain(|candidate| {
        let keep = applications
            .iter()
            .find(|a| a.id == candidate.id)
            .is_none_or(|a| on_shortlist(a.status));
        if !keep {
            repair.removed.push(candidate.id);
        }
        keep
    });

    for application in applications.iter().filter(|a| on_shortlist(a.status)) {
        if shortlist.iter().any(|c| c.id == application.id) {
            continue;
        }
        let skills = skills_of(hub, &application.student_id)?;
        shortlist.push(shortlist_entry(application, skills, now));
        repair.added.push(application.id);
    }

    if repair != ShortlistRepair::default() {
        tracing::info!(added = ?repair.added, removed = ?repair.removed, "repaired shortlist");
        hub.save::<Shortlisted>(&shortlist)?;
    }
    Ok(repair)
}

fn on_shortlist(status: ApplicationStatus) -> bool {
    matches!(status, ApplicationStatus::Shortlisted | ApplicationStatus::Hired)
}

/// Set each posting's `applicationsCount` to the number of applications that
/// reference it. Returns how many postings were corrected.
pub fn reconcile_application_counts(hub: &Hub) -> Result<usize> {
    let mut counts: HashMap<Id, u32> = HashMap::new();
    for application in hub.load::<Applications>()? {
        *counts.entry(application.internship_id).or_default() += 1;
    }

    let mut postings = hub.load::<Postings>()?;
    let mut fixed = 0;
    for posting in &mut postings {
        let actual = counts.get(&posting.id).copied().unwrap_or(0);
        if posting.applications_count != actual {
            tracing::info!(
                id = posting.id,
                stored = posting.applications_count,
                actual,
                "correcting application count"
            );
            posting.applications_count = actual;
            fixed += 1;
        }
    }
    if fixed > 0 {
        hub.save::<Postings>(&postings)?;
    }
    Ok(fixed)
}

pub fn rate_candidate(
    hub: &Hub,
    application_id: Id,
    rating: u8,
    comment: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Feedback> {
    if !(1..=5).contains(&rating) {
        return Err(ActionError::InvalidRating(rating));
    }
    let application = hub
        .load::<Applications>()?
        .into_iter()
        .find(|a| a.id == application_id)
        .ok_or(ActionError::NotFound { what: "application", id: application_id })?;

    let feedback = hub.update::<FeedbackLog, _>(|items| {
        let feedback = Feedback {
            id: next_id(items),
            application_id,
            student_name: application.student_name.clone(),
            company: application.company.clone(),
            rating,
            comment: comment.map(str::trim).filter(|c| !c.is_empty()).map(String::from),
            timestamp: now,
        };
        items.push(feedback.clone());
        feedback
    })?;

    notify(
        hub,
        &student_recipient(&application.student_id),
        "New feedback",
        &format!("{} rated you {}/5 for {}.", application.company, rating, application.role),
        NotificationKind::Info,
        now,
    )?;
    Ok(feedback)
}

// --- Skills ---

/// The student's skills, seeded with the defaults the first time they are read.
pub fn skills_for(hub: &Hub, student_id: &str) -> Result<Vec<String>> {
    let mut all = hub.load::<Skills>()?;
    if let Some(entry) = all.iter().find(|s| s.student_id == student_id) {
        return Ok(entry.skills.clone());
    }
    let skills: Vec<String> = DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect();
    all.push(StudentSkills {
        student_id: student_id.to_string(),
        skills: skills.clone(),
    });
    hub.save::<Skills>(&all)?;
    Ok(skills)
}

pub fn add_skill(hub: &Hub, student_id: &str, skill: &str) -> Result<Vec<String>> {
    let skill = not_blank(skill, "skill")?;
    edit_skills(hub, student_id, |skills| {
        if !skills.iter().any(|s| s.eq_ignore_ascii_case(&skill)) {
            skills.push(skill);
        }
    })
}

pub fn remove_skill(hub: &Hub, student_id: &str, skill: &str) -> Result<Vec<String>> {
    let skill = skill.trim();
    edit_skills(hub, student_id, |skills| {
        skills.retain(|s| !s.eq_ignore_ascii_case(skill))
    })
}

fn edit_skills(
    hub: &Hub,
    student_id: &str,
    edit: impl FnOnce(&mut Vec<String>),
) -> Result<Vec<String>> {
    // Seed first so an edit applies on top of the defaults
    skills_for(hub, student_id)?;
    let skills = hub.update::<Skills, _>(|all| {
        let entry = all.iter_mut().find(|s| s.student_id == student_id);
        match entry {
            Some(entry) => {
                edit(&mut entry.skills);
                entry.skills.clone()
            }
            None => {
                // Another writer removed the entry between the seed and this edit
                let mut skills: Vec<String> = DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect();
                edit(&mut skills);
                all.push(StudentSkills {
                    student_id: student_id.to_string(),
                    skills: skills.clone(),
                });
                skills
            }
        }
    })?;
    Ok(skills)
}

// --- Admin ---

/// Write the default college list if the collection has never been written.
pub fn seed_colleges(hub: &Hub, today: NaiveDate) -> Result<usize> {
    if hub.store().get_raw(Collection::Colleges.key())?.is_some() {
        return Ok(0);
    }
    let colleges: Vec<College> = DEFAULT_COLLEGES
        .iter()
        .enumerate()
        .map(|(i, (name, location, students))| College {
            id: i as Id + 1,
            name: name.to_string(),
            location: location.to_string(),
            students_count: *students,
            added_date: today,
        })
        .collect();
    hub.save::<Colleges>(&colleges)?;
    Ok(colleges.len())
}

pub fn add_college(hub: &Hub, name: &str, location: &str, today: NaiveDate) -> Result<College> {
    let name = not_blank(name, "college name")?;
    let location = not_blank(location, "location")?;
    let mut colleges = hub.load::<Colleges>()?;
    if colleges.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
        return Err(ActionError::Duplicate { what: "college", name });
    }
    let college = College {
        id: next_id(&colleges),
        name,
        location,
        students_count: 0,
        added_date: today,
    };
    colleges.push(college.clone());
    hub.save::<Colleges>(&colleges)?;
    Ok(college)
}

pub fn remove_college(hub: &Hub, id: Id) -> Result<College> {
    let mut colleges = hub.load::<Colleges>()?;
    let index = colleges
        .iter()
        .position(|c| c.id == id)
        .ok_or(ActionError::NotFound { what: "college", id })?;
    let removed = colleges.remove(index);
    hub.save::<Colleges>(&colleges)?;
    Ok(removed)
}

/// Publish a notice to every student and faculty member. Newest notices come first.
pub fn publish_notice(hub: &Hub, content: &str, now: DateTime<Utc>) -> Result<Notice> {
    let content = not_blank(content, "notice")?;
    let notice = hub.update::<Notices, _>(|items| {
        let notice = Notice {
            id: next_id(items),
            content,
            timestamp: now,
        };
        items.insert(0, notice.clone());
        notice
    })?;
    Ok(notice)
}
