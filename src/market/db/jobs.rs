use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{MarketDb, ensure_role, like_pattern, optional_text, required};
use crate::errors::MarketError;
use crate::market::models::*;

const JOB_SELECT: &str = "SELECT j.id, j.user_id, j.title, j.description, j.link, j.status,
     u.name, u.email, j.created_at
     FROM jobs j JOIN users u ON j.user_id = u.id";

const APPLICATION_SELECT: &str = "SELECT a.id, a.job_id, a.user_id, a.message, a.status,
     j.title, j.user_id, u.email, u.name, a.created_at
     FROM job_applications a
     JOIN jobs j ON a.job_id = j.id
     JOIN users u ON a.user_id = u.id";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        link: row.get(4)?,
        status: row.get(5)?,
        user_name: row.get(6)?,
        email: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn application_from_row(row: &Row<'_>) -> rusqlite::Result<JobApplication> {
    Ok(JobApplication {
        id: row.get(0)?,
        job_id: row.get(1)?,
        user_id: row.get(2)?,
        message: row.get(3)?,
        status: row.get(4)?,
        job_title: row.get(5)?,
        job_owner_id: row.get(6)?,
        applicant_email: row.get(7)?,
        applicant_name: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Drafts and closed jobs are only visible to their poster and admins.
fn job_visible_to(job: &Job, viewer: Option<&User>) -> bool {
    job.status == JobStatus::Open
        || viewer.is_some_and(|v| v.role == Role::Admin || v.id == job.user_id)
}

impl MarketDb {
    // ── Jobs ─────────────────────────────────────────────────────────

    /// New jobs start as drafts.
    pub fn create_job(
        &self,
        owner: &User,
        title: &str,
        description: &str,
        link: Option<&str>,
    ) -> Result<Job> {
        ensure_role(owner, &[Role::Business], "Only business users can post jobs")?;
        let title = required(title, "Job title")?;
        let description = required(description, "Job description")?;
        self.conn
            .execute(
                "INSERT INTO jobs (user_id, title, description, link, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![owner.id, title, description, optional_text(link), JobStatus::Draft],
            )
            .context("Failed to insert job")?;
        let id = self.conn.last_insert_rowid();
        self.require_job(id)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        self.conn
            .query_row(
                &format!("{} WHERE j.id = ?1", JOB_SELECT),
                params![id],
                job_from_row,
            )
            .optional()
            .context("Failed to query job")
    }

    pub fn require_job(&self, id: i64) -> Result<Job> {
        self.get_job(id)?
            .ok_or_else(|| MarketError::not_found("Job", id).into())
    }

    /// A job as seen by `viewer`; hidden jobs read as missing.
    pub fn view_job(&self, id: i64, viewer: Option<&User>) -> Result<Job> {
        let job = self.require_job(id)?;
        if !job_visible_to(&job, viewer) {
            return Err(MarketError::not_found("Job", id).into());
        }
        Ok(job)
    }

    fn require_own_job(&self, id: i64, user: &User) -> Result<Job> {
        let job = self.require_job(id)?;
        if job.user_id != user.id {
            return Err(MarketError::forbidden(
                "You do not have permission to manage this job",
            )
            .into());
        }
        Ok(job)
    }

    pub fn update_job(
        &self,
        id: i64,
        editor: &User,
        title: &str,
        description: &str,
        status: JobStatus,
        link: Option<&str>,
    ) -> Result<Job> {
        self.require_own_job(id, editor)?;
        let title = required(title, "Job title")?;
        let description = required(description, "Job description")?;
        self.conn
            .execute(
                "UPDATE jobs SET title = ?1, description = ?2, status = ?3, link = ?4
                 WHERE id = ?5",
                params![title, description, status, optional_text(link), id],
            )
            .context("Failed to update job")?;
        self.require_job(id)
    }

    pub fn delete_job(&self, id: i64, owner: &User) -> Result<()> {
        self.require_own_job(id, owner)?;
        self.conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])
            .context("Failed to delete job")?;
        Ok(())
    }

    /// Open jobs, newest first.
    pub fn list_open_jobs(&self, paging: Paging, q: Option<&str>) -> Result<Page<Job>> {
        let pattern = like_pattern(q);
        let filter = "j.status = ?1 AND (?2 IS NULL OR j.title LIKE ?2 OR j.description LIKE ?2)";
        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM jobs j WHERE {}", filter),
                params![JobStatus::Open, pattern],
                |row| row.get(0),
            )
            .context("Failed to count jobs")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE {} ORDER BY j.id DESC LIMIT ?3 OFFSET ?4",
                JOB_SELECT, filter
            ))
            .context("Failed to prepare list_open_jobs")?;
        let items = stmt
            .query_map(
                params![JobStatus::Open, pattern, paging.per_page, paging.offset()],
                job_from_row,
            )
            .context("Failed to query jobs")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read job row")?;
        Ok(paging.wrap(items, total as u64))
    }

    pub fn list_jobs_by_owner(&self, user_id: i64, only_open: bool) -> Result<Vec<Job>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE j.user_id = ?1 AND (NOT ?2 OR j.status = ?3) ORDER BY j.id DESC",
                JOB_SELECT
            ))
            .context("Failed to prepare list_jobs_by_owner")?;
        let rows = stmt
            .query_map(params![user_id, only_open, JobStatus::Open], job_from_row)
            .context("Failed to query jobs")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read job row")
    }

    /// A business's public page. The business itself and admins also see
    /// drafts and closed jobs.
    pub fn business_jobs(&self, business_id: i64, viewer: Option<&User>) -> Result<BusinessJobs> {
        let business = self
            .get_user(business_id)?
            .filter(|u| u.role == Role::Business)
            .ok_or_else(|| MarketError::not_found("Business", business_id))?;
        let sees_all = viewer.is_some_and(|v| v.role == Role::Admin || v.id == business.id);
        Ok(BusinessJobs {
            jobs: self.list_jobs_by_owner(business.id, !sees_all)?,
            business: BusinessProfile {
                id: business.id,
                name: business.name,
                bio: business.bio,
            },
        })
    }

    /// Back-office listing in id order, with global status counts.
    pub fn list_jobs_admin(
        &self,
        paging: Paging,
        q: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<CountedPage<Job>> {
        let pattern = like_pattern(q);
        let filter = "(?1 IS NULL OR j.title LIKE ?1 OR j.description LIKE ?1)
             AND (?2 IS NULL OR j.status = ?2)";
        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM jobs j WHERE {}", filter),
                params![pattern, status],
                |row| row.get(0),
            )
            .context("Failed to count jobs")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE {} ORDER BY j.id ASC LIMIT ?3 OFFSET ?4",
                JOB_SELECT, filter
            ))
            .context("Failed to prepare list_jobs_admin")?;
        let items = stmt
            .query_map(
                params![pattern, status, paging.per_page, paging.offset()],
                job_from_row,
            )
            .context("Failed to query jobs")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read job row")?;

        Ok(CountedPage {
            page: paging.wrap(items, total as u64),
            counts: self.job_status_counts()?,
        })
    }

    pub fn job_status_counts(&self) -> Result<Counts> {
        self.count_by(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
            JobStatus::ALL,
        )
    }

    pub fn set_job_status(&self, id: i64, status: JobStatus) -> Result<Job> {
        let count = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1 WHERE id = ?2",
                params![status, id],
            )
            .context("Failed to update job status")?;
        if count == 0 {
            return Err(MarketError::not_found("Job", id).into());
        }
        self.require_job(id)
    }

    pub fn admin_delete_job(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])
            .context("Failed to delete job")?;
        Ok(count > 0)
    }

    // ── Applications ─────────────────────────────────────────────────

    pub fn apply_to_job(
        &self,
        applicant: &User,
        job_id: i64,
        message: &str,
    ) -> Result<JobApplication> {
        if !applicant.role.can_apply_to_jobs() {
            return Err(MarketError::forbidden("Only students and alumni can apply to jobs").into());
        }
        let job = self.view_job(job_id, Some(applicant))?;
        if job.status != JobStatus::Open {
            return Err(MarketError::conflict("This job is not accepting applications").into());
        }
        let exists: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM job_applications WHERE job_id = ?1 AND user_id = ?2",
                params![job_id, applicant.id],
                |row| row.get(0),
            )
            .context("Failed to check existing application")?;
        if exists {
            return Err(MarketError::conflict("You have already applied to this job").into());
        }

        self.conn
            .execute(
                "INSERT INTO job_applications (job_id, user_id, message, status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![job_id, applicant.id, message.trim(), ApplicationStatus::Pending],
            )
            .context("Failed to insert application")?;
        let id = self.conn.last_insert_rowid();
        self.query_application(id)?
            .context("Application not found after insert")
    }

    fn query_application(&self, id: i64) -> Result<Option<JobApplication>> {
        self.conn
            .query_row(
                &format!("{} WHERE a.id = ?1", APPLICATION_SELECT),
                params![id],
                application_from_row,
            )
            .optional()
            .context("Failed to query application")
    }

    fn query_applications(&self, sql: &str, id: i64) -> Result<Vec<JobApplication>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare application query")?;
        let rows = stmt
            .query_map(params![id], application_from_row)
            .context("Failed to query applications")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read application row")
    }

    /// Applicant, job owner, or admin.
    pub fn get_application(&self, viewer: &User, id: i64) -> Result<JobApplication> {
        let application = self
            .query_application(id)?
            .ok_or_else(|| MarketError::not_found("Application", id))?;
        if !application_visible_to(&application, viewer) {
            return Err(MarketError::forbidden("You do not have access to this application").into());
        }
        Ok(application)
    }

    pub fn applications_for_job(&self, viewer: &User, job_id: i64) -> Result<Vec<JobApplication>> {
        let job = self.require_job(job_id)?;
        if viewer.role != Role::Admin && job.user_id != viewer.id {
            return Err(MarketError::forbidden(
                "Only the job poster can view its applications",
            )
            .into());
        }
        self.query_applications(
            &format!("{} WHERE a.job_id = ?1 ORDER BY a.id", APPLICATION_SELECT),
            job_id,
        )
    }

    pub fn list_applications_by_user(&self, user_id: i64) -> Result<Vec<JobApplication>> {
        self.query_applications(
            &format!("{} WHERE a.user_id = ?1 ORDER BY a.id DESC", APPLICATION_SELECT),
            user_id,
        )
    }

    /// The job owner decides on an application.
    pub fn set_application_status(
        &self,
        owner: &User,
        id: i64,
        status: ApplicationStatus,
    ) -> Result<JobApplication> {
        let application = self
            .query_application(id)?
            .ok_or_else(|| MarketError::not_found("Application", id))?;
        if application.job_owner_id != owner.id {
            return Err(MarketError::forbidden(
                "Only the job poster can update applications",
            )
            .into());
        }
        self.conn
            .execute(
                "UPDATE job_applications SET status = ?1 WHERE id = ?2",
                params![status, id],
            )
            .context("Failed to update application status")?;
        self.query_application(id)?
            .context("Application vanished after update")
    }

    pub fn withdraw_application(&self, applicant: &User, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM job_applications WHERE id = ?1 AND user_id = ?2",
                params![id, applicant.id],
            )
            .context("Failed to withdraw application")?;
        if count == 0 {
            return Err(MarketError::not_found("Application", id).into());
        }
        Ok(())
    }

    pub fn can_access_application(&self, user: &User, id: i64) -> Result<bool> {
        Ok(self
            .query_application(id)?
            .is_some_and(|a| application_visible_to(&a, user)))
    }
}

fn application_visible_to(application: &JobApplication, user: &User) -> bool {
    user.role == Role::Admin
        || user.id == application.user_id
        || user.id == application.job_owner_id
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{db, user};
    use super::*;

    fn open_job(db: &MarketDb, owner: &User, title: &str) -> Job {
        let job = db.create_job(owner, title, "desc", None).unwrap();
        db.set_job_status(job.id, JobStatus::Open).unwrap()
    }

    #[test]
    fn test_jobs_start_as_drafts_and_need_business() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Student);

        let job = db
            .create_job(&business, "Intern", "Help out", Some(" https://apply "))
            .unwrap();
        assert_eq!(job.status, JobStatus::Draft);
        assert_eq!(job.link.as_deref(), Some("https://apply"));
        assert_eq!(job.email, "b@x.com");

        assert!(db.create_job(&student, "x", "y", None).is_err());
        assert!(db.create_job(&business, "", "y", None).is_err());
    }

    #[test]
    fn test_drafts_hidden_from_others() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Student);
        let admin = user(&db, "a@x.com", Role::Admin);
        let job = db.create_job(&business, "Intern", "Help", None).unwrap();

        assert!(db.view_job(job.id, None).is_err());
        assert!(db.view_job(job.id, Some(&student)).is_err());
        assert!(db.view_job(job.id, Some(&business)).is_ok());
        assert!(db.view_job(job.id, Some(&admin)).is_ok());
    }

    #[test]
    fn test_open_listing_searches_and_pages() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        open_job(&db, &business, "Rust developer");
        open_job(&db, &business, "Designer");
        db.create_job(&business, "Rust draft", "d", None).unwrap();

        let paging = Paging::new(None, None, 25);
        let all = db.list_open_jobs(paging, None).unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.items[0].title, "Designer");

        let rust = db.list_open_jobs(paging, Some("rust")).unwrap();
        assert_eq!(rust.total, 1);
    }

    #[test]
    fn test_owner_updates_and_deletes() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let other = user(&db, "c@x.com", Role::Business);
        let job = db.create_job(&owner, "Intern", "Help", None).unwrap();

        assert!(db
            .update_job(job.id, &other, "T", "D", JobStatus::Open, None)
            .is_err());
        let job = db
            .update_job(job.id, &owner, "Senior", "Lead", JobStatus::Closed, None)
            .unwrap();
        assert_eq!(job.status, JobStatus::Closed);
        assert_eq!(job.title, "Senior");

        assert!(db.delete_job(job.id, &other).is_err());
        db.delete_job(job.id, &owner).unwrap();
        assert!(db.get_job(job.id).unwrap().is_none());
    }

    #[test]
    fn test_business_page_shows_open_jobs_to_visitors() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        open_job(&db, &business, "Open");
        db.create_job(&business, "Draft", "d", None).unwrap();

        assert_eq!(db.business_jobs(business.id, None).unwrap().jobs.len(), 1);
        assert_eq!(
            db.business_jobs(business.id, Some(&business))
                .unwrap()
                .jobs
                .len(),
            2
        );
        let student = user(&db, "s@x.com", Role::Student);
        assert!(db.business_jobs(student.id, None).is_err());
    }

    #[test]
    fn test_admin_listing_has_global_counts() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        open_job(&db, &business, "One");
        db.create_job(&business, "Two", "d", None).unwrap();

        let page = db
            .list_jobs_admin(Paging::new(None, None, 6), None, Some(JobStatus::Open))
            .unwrap();
        assert_eq!(page.page.total, 1);
        assert_eq!(page.counts.get("open"), 1);
        assert_eq!(page.counts.get("draft"), 1);
        assert_eq!(page.counts.get("closed"), 0);
    }

    #[test]
    fn test_apply_once_to_open_jobs() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Student);
        let draft = db.create_job(&business, "Draft", "d", None).unwrap();
        let job = open_job(&db, &business, "Open");

        assert!(db.apply_to_job(&student, draft.id, "hi").is_err());
        assert!(db.apply_to_job(&business, job.id, "hi").is_err());

        let application = db.apply_to_job(&student, job.id, " Hire me ").unwrap();
        assert_eq!(application.message, "Hire me");
        assert_eq!(application.status, ApplicationStatus::Pending);
        assert_eq!(application.job_owner_id, business.id);

        let err = db.apply_to_job(&student, job.id, "again").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::Conflict(_))
        ));
    }

    #[test]
    fn test_application_access_and_decisions() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Alumni);
        let outsider = user(&db, "o@x.com", Role::Student);
        let job = open_job(&db, &business, "Open");
        let application = db.apply_to_job(&student, job.id, "").unwrap();

        assert!(db.can_access_application(&business, application.id).unwrap());
        assert!(db.can_access_application(&student, application.id).unwrap());
        assert!(!db.can_access_application(&outsider, application.id).unwrap());
        assert!(db.get_application(&outsider, application.id).is_err());

        assert!(db.applications_for_job(&student, job.id).is_err());
        assert_eq!(db.applications_for_job(&business, job.id).unwrap().len(), 1);

        assert!(db
            .set_application_status(&student, application.id, ApplicationStatus::Accepted)
            .is_err());
        let decided = db
            .set_application_status(&business, application.id, ApplicationStatus::Accepted)
            .unwrap();
        assert_eq!(decided.status, ApplicationStatus::Accepted);
        assert_eq!(db.list_applications_by_user(student.id).unwrap().len(), 1);
    }

    #[test]
    fn test_withdraw_only_own_application() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Student);
        let other = user(&db, "o@x.com", Role::Student);
        let job = open_job(&db, &business, "Open");
        let application = db.apply_to_job(&student, job.id, "").unwrap();

        assert!(db.withdraw_application(&other, application.id).is_err());
        db.withdraw_application(&student, application.id).unwrap();
        assert!(db.list_applications_by_user(student.id).unwrap().is_empty());
    }
}
