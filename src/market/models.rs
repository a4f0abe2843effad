use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Declares an enum stored as an INTEGER column and exposed as a snake_case
/// string over JSON. `FromStr` accepts either the label or the integer code.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $code:literal => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(self) -> i64 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                if let Ok(code) = s.parse::<i64>() {
                    return Self::from_code(code)
                        .ok_or_else(|| format!("Invalid {}: {}", stringify!($name), s));
                }
                match s.to_ascii_lowercase().as_str() {
                    $($label => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.code()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let code = i64::column_result(value)?;
                Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
            }
        }
    };
}

int_enum! {
    /// Account type. Codes match the `users.role` column.
    pub enum Role {
        Instructor = 0 => "instructor",
        Business = 1 => "business",
        Alumni = 2 => "alumni",
        Student = 3 => "student",
        Admin = 4 => "admin",
    }
}

impl Role {
    /// Roles a visitor may pick when registering.
    pub fn self_registrable(self) -> bool {
        !matches!(self, Role::Admin)
    }

    /// Roles allowed to post projects.
    pub fn can_post_projects(self) -> bool {
        matches!(self, Role::Instructor | Role::Business | Role::Admin)
    }

    /// Roles allowed to apply to jobs.
    pub fn can_apply_to_jobs(self) -> bool {
        matches!(self, Role::Student | Role::Alumni)
    }

    /// Staff see pending projects in public listings.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Instructor | Role::Admin)
    }
}

int_enum! {
    pub enum ProjectStatus {
        Pending = 0 => "pending",
        Approved = 1 => "approved",
        Taken = 2 => "taken",
        Finished = 3 => "finished",
    }
}

int_enum! {
    pub enum JobStatus {
        Draft = 0 => "draft",
        Open = 1 => "open",
        Closed = 2 => "closed",
    }
}

int_enum! {
    pub enum ApplicationStatus {
        Pending = 0 => "pending",
        Accepted = 1 => "accepted",
        Rejected = 2 => "rejected",
    }
}

int_enum! {
    pub enum RequestStatus {
        Pending = 0 => "pending",
        Accepted = 1 => "accepted",
        Denied = 2 => "denied",
    }
}

// ── Records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
    pub permission: i64,
    pub bio: Option<String>,
    pub instructor_id: Option<i64>,
    pub graduation: Option<String>,
    pub created_at: String,
}

/// Minimal view of a user embedded in other records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub project_link: Option<String>,
    pub github_link: Option<String>,
    pub owner_email: String,
    pub owner_role: Role,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub instructor_id: i64,
    pub project_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamWithMembers {
    #[serde(flatten)]
    pub team: Team,
    pub project_name: Option<String>,
    pub members: Vec<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstructorRequest {
    pub id: i64,
    pub student_id: i64,
    pub instructor_id: i64,
    pub status: RequestStatus,
    pub student_email: String,
    pub student_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub link: Option<String>,
    pub status: JobStatus,
    pub user_name: Option<String>,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobApplication {
    pub id: i64,
    pub job_id: i64,
    pub user_id: i64,
    pub message: String,
    pub status: ApplicationStatus,
    pub job_title: String,
    pub job_owner_id: i64,
    pub applicant_email: String,
    pub applicant_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub message_id: i64,
    pub room: Room,
    pub user_id: i64,
    pub email: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminMessage {
    pub id: i64,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub message: String,
    pub timestamp: String,
}

// ── Chat rooms ───────────────────────────────────────────────────────

/// A chat channel scoped to one project or one job application.
///
/// Serialized as `project-<id>` / `application-<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Room {
    Project(i64),
    Application(i64),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Project(id) => write!(f, "project-{id}"),
            Room::Application(id) => write!(f, "application-{id}"),
        }
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid room: {s}"))?;
        let id: i64 = id.parse().map_err(|_| format!("Invalid room id: {s}"))?;
        if id <= 0 {
            return Err(format!("Invalid room id: {s}"));
        }
        match kind {
            "project" => Ok(Room::Project(id)),
            "application" => Ok(Room::Application(id)),
            _ => Err(format!("Invalid room kind: {kind}")),
        }
    }
}

impl TryFrom<String> for Room {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Room> for String {
    fn from(room: Room) -> Self {
        room.to_string()
    }
}

// ── API view types ───────────────────────────────────────────────────

/// One page of results plus paging metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// Validated paging window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u32,
    pub per_page: u32,
}

impl Paging {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: Option<u32>, per_page: Option<u32>, default_per_page: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(default_per_page)
                .clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn wrap<T>(&self, items: Vec<T>, total: u64) -> Page<T> {
        let per_page = u64::from(self.per_page);
        let total_pages = total.div_ceil(per_page).max(1);
        Page {
            items,
            page: self.page,
            per_page: self.per_page,
            total,
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
        }
    }
}

/// Per-value counts of a status-like column, unaffected by list filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Counts(pub std::collections::BTreeMap<String, u64>);

#[cfg(test)]
impl Counts {
    pub(crate) fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountedPage<T> {
    #[serde(flatten)]
    pub page: Page<T>,
    pub counts: Counts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub project: Project,
    pub teams: Vec<TeamWithMembers>,
    pub can_chat: bool,
    pub can_edit_links: bool,
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user: User,
    pub projects: Vec<Project>,
    pub jobs: Vec<Job>,
    pub applications: Vec<JobApplication>,
    pub team: Option<TeamWithMembers>,
    pub instructor: Option<UserSummary>,
    pub instructor_request: Option<InstructorRequest>,
    pub instructors: Vec<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMgtData {
    pub students: Vec<UserSummary>,
    pub unassigned_students: Vec<UserSummary>,
    pub teams: Vec<TeamWithMembers>,
    pub pending_requests: Vec<InstructorRequest>,
    pub denied_requests: Vec<InstructorRequest>,
    pub available_projects: Vec<Project>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessJobs {
    pub business: BusinessProfile,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessProfile {
    pub id: i64,
    pub name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    pub users_by_role: Counts,
    pub projects_by_status: Counts,
    pub jobs_by_status: Counts,
    pub pending_requests: u64,
    pub admin_messages: u64,
}
