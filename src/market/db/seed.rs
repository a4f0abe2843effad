use anyhow::{Context, Result};
use rusqlite::params;
use tracing::info;

use super::MarketDb;
use crate::market::models::{JobStatus, ProjectStatus, Role};
use crate::market::password::Hasher;

/// Password shared by every seeded account.
pub const SEED_PASSWORD: &str = "1";

const INSTRUCTORS: &[(&str, &str)] = &[
    ("Iris Instructor", "instructor1@example.com"),
    ("Ivan Instructor", "instructor2@example.com"),
];

const BUSINESSES: &[(&str, &str, &str)] = &[
    (
        "Acme Labs",
        "business1@example.com",
        "Hardware prototyping and embedded software.",
    ),
    (
        "Northwind Digital",
        "business2@example.com",
        "Web and mobile products for local retailers.",
    ),
];

const STUDENTS: &[(&str, &str)] = &[
    ("Sam Student", "student1@example.com"),
    ("Sara Student", "student2@example.com"),
    ("Sean Student", "student3@example.com"),
    ("Sofia Student", "student4@example.com"),
    ("Stan Student", "student5@example.com"),
];

const PROJECT_TOPICS: &[&str] = &[
    "Inventory tracker",
    "Booking system",
    "Sensor dashboard",
    "Customer portal",
    "Delivery planner",
];

const JOBS: &[(&str, &str, JobStatus)] = &[
    ("Junior Rust developer", "Build backend services with our platform team.", JobStatus::Open),
    ("QA intern", "Write and maintain automated test suites.", JobStatus::Open),
    ("Data analyst", "Turn sales data into weekly reports.", JobStatus::Open),
    ("Frontend developer", "Ship features in our customer-facing web app.", JobStatus::Open),
    ("Embedded intern", "Bring up firmware on new sensor boards.", JobStatus::Open),
    ("DevOps engineer", "Own CI pipelines and deployment tooling.", JobStatus::Draft),
];

impl MarketDb {
    /// Fill an empty database with demo accounts, projects, and jobs.
    pub fn seed(&self, hasher: &Hasher) -> Result<()> {
        let hash = hasher.hash(SEED_PASSWORD)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin seed transaction")?;

        let insert_user = |name: &str,
                           email: &str,
                           role: Role,
                           bio: Option<&str>,
                           instructor_id: Option<i64>|
         -> Result<i64> {
            tx.execute(
                "INSERT INTO users (name, email, password, role, permission, bio, instructor_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    name,
                    email,
                    hash,
                    role,
                    i64::from(role == Role::Business),
                    bio,
                    instructor_id
                ],
            )
            .with_context(|| format!("Failed to seed user {}", email))?;
            Ok(tx.last_insert_rowid())
        };

        let instructor_ids = INSTRUCTORS
            .iter()
            .map(|(name, email)| insert_user(*name, *email, Role::Instructor, None, None))
            .collect::<Result<Vec<_>>>()?;
        let business_ids = BUSINESSES
            .iter()
            .map(|(name, email, bio)| insert_user(*name, *email, Role::Business, Some(*bio), None))
            .collect::<Result<Vec<_>>>()?;
        for (i, (name, email)) in STUDENTS.iter().enumerate() {
            let instructor = instructor_ids[i % instructor_ids.len()];
            insert_user(*name, *email, Role::Student, None, Some(instructor))?;
        }
        insert_user("Alex Alumnus", "alumni1@example.com", Role::Alumni, None, None)?;
        insert_user("Ada Admin", "admin@example.com", Role::Admin, None, None)?;

        for n in 1..=25 {
            let owner = business_ids[n % business_ids.len()];
            let topic = PROJECT_TOPICS[n % PROJECT_TOPICS.len()];
            tx.execute(
                "INSERT INTO projects (user_id, name, description, status) VALUES (?1, ?2, ?3, ?4)",
                params![
                    owner,
                    format!("{} #{}", topic, n),
                    format!("Sample project {} for the {} idea.", n, topic.to_lowercase()),
                    ProjectStatus::Pending
                ],
            )
            .with_context(|| format!("Failed to seed project {}", n))?;
        }

        for (i, (title, description, status)) in JOBS.iter().enumerate() {
            tx.execute(
                "INSERT INTO jobs (user_id, title, description, status) VALUES (?1, ?2, ?3, ?4)",
                params![business_ids[i % business_ids.len()], title, description, status],
            )
            .with_context(|| format!("Failed to seed job {}", title))?;
        }

        tx.commit().context("Failed to commit seed data")?;
        info!(
            users = INSTRUCTORS.len() + BUSINESSES.len() + STUDENTS.len() + 2,
            projects = 25,
            jobs = JOBS.len(),
            "Seeded database"
        );
        Ok(())
    }
}
