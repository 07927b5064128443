use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub type Id = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Applied,
    Shortlisted,
    Hired,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Shortlisted => "shortlisted",
            ApplicationStatus::Hired => "hired",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    /// Legal moves an industry actor can make on an application.
    pub fn can_move_to(self, to: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, to),
            (Pending | Applied, Shortlisted)
                | (Pending | Applied, Rejected)
                | (Shortlisted, Hired)
                | (Shortlisted, Rejected)
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "applied" => Ok(ApplicationStatus::Applied),
            "shortlisted" => Ok(ApplicationStatus::Shortlisted),
            "hired" => Ok(ApplicationStatus::Hired),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(format!(
                "unknown status '{}' (pending, applied, shortlisted, hired, rejected)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: Id,
    pub internship_id: Id,
    pub student_id: String,
    pub student_name: String,
    pub college: String,
    #[serde(default)]
    pub cgpa: Option<f32>,
    pub role: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    pub applied_date: DateTime<Utc>,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostingKind {
    Universal,
    CollegeSpecific,
}

impl fmt::Display for PostingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostingKind::Universal => f.write_str("universal"),
            PostingKind::CollegeSpecific => f.write_str("college-specific"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    Pending,
    #[serde(alias = "approved")]
    Active,
    Closed,
    Rejected,
}

impl fmt::Display for PostingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PostingStatus::Pending => "pending",
            PostingStatus::Active => "active",
            PostingStatus::Closed => "closed",
            PostingStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for PostingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PostingStatus::Pending),
            "active" | "approved" => Ok(PostingStatus::Active),
            "closed" => Ok(PostingStatus::Closed),
            "rejected" => Ok(PostingStatus::Rejected),
            other => Err(format!(
                "unknown posting status '{}' (pending, active, closed, rejected)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternshipPosting {
    pub id: Id,
    pub title: String,
    pub company: String,
    #[serde(rename = "type")]
    pub kind: PostingKind,
    #[serde(default, alias = "selectedColleges")]
    pub target_colleges: BTreeSet<String>,
    pub status: PostingStatus,
    #[serde(default, alias = "applications")]
    pub applications_count: u32,
    #[serde(alias = "postedDate")]
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub stipend: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl InternshipPosting {
    /// Whether a student of `college` may see and apply to this posting.
    pub fn is_visible_to(&self, college: &str) -> bool {
        self.status == PostingStatus::Active
            && match self.kind {
                PostingKind::Universal => true,
                PostingKind::CollegeSpecific => self
                    .target_colleges
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(college)),
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
}

/// Recipient of notifications meant for every student.
pub const ALL_STUDENTS: &str = "students";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Id,
    /// Actor the notification is addressed to, e.g. `student:asha` or `company:Infosys`.
    pub recipient: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSkills {
    pub student_id: String,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortlistedCandidate {
    /// Same id as the application it was derived from.
    pub id: Id,
    pub internship_id: Id,
    pub name: String,
    pub college: String,
    pub role: String,
    pub company: String,
    #[serde(default)]
    pub cgpa: Option<f32>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub shortlisted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct College {
    pub id: Id,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub students_count: u32,
    pub added_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: Id,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: Id,
    pub application_id: Id,
    pub student_name: String,
    pub company: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Who is acting when a student applies. Not persisted; there is no real session.
#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub college: String,
    pub cgpa: Option<f32>,
}

/// Anything stored in a collection keyed by a numeric id.
pub trait HasId {
    fn id(&self) -> Id;
}

macro_rules! has_id {
    ($($ty:ty),*) => {
        $(impl HasId for $ty {
            fn id(&self) -> Id {
                self.id
            }
        })*
    };
}

has_id!(
    Application,
    InternshipPosting,
    Notification,
    ShortlistedCandidate,
    College,
    Notice,
    Feedback
);

/// Next free id in a collection: one past the largest in use.
pub fn next_id<T: HasId>(items: &[T]) -> Id {
    items.iter().map(HasId::id).max().map_or(1, |max| max + 1)
}
