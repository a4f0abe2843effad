use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{MarketDb, like_pattern, optional_text, required};
use crate::errors::MarketError;
use crate::market::models::*;

const PROJECT_SELECT: &str = "SELECT p.id, p.user_id, p.name, p.description, p.status,
     p.project_link, p.github_link, u.email, u.role, p.created_at
     FROM projects p JOIN users u ON p.user_id = u.id";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        project_link: row.get(5)?,
        github_link: row.get(6)?,
        owner_email: row.get(7)?,
        owner_role: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl MarketDb {
    // ── Project CRUD ─────────────────────────────────────────────────

    /// Instructor and admin postings are approved immediately; business
    /// postings wait for approval.
    pub fn create_project(&self, owner: &User, name: &str, description: &str) -> Result<Project> {
        if !owner.role.can_post_projects() {
            return Err(MarketError::forbidden(
                "You do not have permission to create projects",
            )
            .into());
        }
        let name = required(name, "Project name")?;
        let description = required(description, "Project description")?;
        let status = if owner.role.is_staff() {
            ProjectStatus::Approved
        } else {
            ProjectStatus::Pending
        };
        self.conn
            .execute(
                "INSERT INTO projects (user_id, name, description, status) VALUES (?1, ?2, ?3, ?4)",
                params![owner.id, name, description, status],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.require_project(id)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                &format!("{} WHERE p.id = ?1", PROJECT_SELECT),
                params![id],
                project_from_row,
            )
            .optional()
            .context("Failed to query project")
    }

    pub fn require_project(&self, id: i64) -> Result<Project> {
        self.get_project(id)?
            .ok_or_else(|| MarketError::not_found("Project", id).into())
    }

    /// Public listing, newest first. Pending projects are hidden unless
    /// `include_pending`.
    pub fn list_projects(
        &self,
        paging: Paging,
        q: Option<&str>,
        status: Option<ProjectStatus>,
        include_pending: bool,
    ) -> Result<Page<Project>> {
        let pattern = like_pattern(q);
        let filter = "(?1 IS NULL OR p.name LIKE ?1 OR p.description LIKE ?1)
             AND (?2 IS NULL OR p.status = ?2)
             AND (?3 OR p.status <> 0)";
        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM projects p WHERE {}", filter),
                params![pattern, status, include_pending],
                |row| row.get(0),
            )
            .context("Failed to count projects")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE {} ORDER BY p.id DESC LIMIT ?4 OFFSET ?5",
                PROJECT_SELECT, filter
            ))
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map(
                params![pattern, status, include_pending, paging.per_page, paging.offset()],
                project_from_row,
            )
            .context("Failed to query projects")?;
        let items = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read project row")?;
        Ok(paging.wrap(items, total as u64))
    }

    /// Back-office listing in id order, with global status counts.
    pub fn list_projects_admin(
        &self,
        paging: Paging,
        q: Option<&str>,
        status: Option<ProjectStatus>,
    ) -> Result<CountedPage<Project>> {
        let pattern = like_pattern(q);
        let filter = "(?1 IS NULL OR p.name LIKE ?1 OR p.description LIKE ?1)
             AND (?2 IS NULL OR p.status = ?2)";
        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM projects p WHERE {}", filter),
                params![pattern, status],
                |row| row.get(0),
            )
            .context("Failed to count projects")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE {} ORDER BY p.id ASC LIMIT ?3 OFFSET ?4",
                PROJECT_SELECT, filter
            ))
            .context("Failed to prepare list_projects_admin")?;
        let items = stmt
            .query_map(
                params![pattern, status, paging.per_page, paging.offset()],
                project_from_row,
            )
            .context("Failed to query projects")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read project row")?;

        Ok(CountedPage {
            page: paging.wrap(items, total as u64),
            counts: self.project_status_counts()?,
        })
    }

    pub fn project_status_counts(&self) -> Result<Counts> {
        self.count_by(
            "SELECT status, COUNT(*) FROM projects GROUP BY status",
            ProjectStatus::ALL,
        )
    }

    pub fn list_projects_by_owner(&self, user_id: i64) -> Result<Vec<Project>> {
        self.query_projects(
            &format!("{} WHERE p.user_id = ?1 ORDER BY p.id DESC", PROJECT_SELECT),
            params![user_id],
        )
    }

    pub fn list_projects_by_status(&self, status: ProjectStatus) -> Result<Vec<Project>> {
        self.query_projects(
            &format!("{} WHERE p.status = ?1 ORDER BY p.id", PROJECT_SELECT),
            params![status],
        )
    }

    fn query_projects(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare project query")?;
        let rows = stmt
            .query_map(params, project_from_row)
            .context("Failed to query projects")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read project row")
    }

    pub fn update_project(
        &self,
        id: i64,
        editor: &User,
        name: &str,
        description: &str,
    ) -> Result<Project> {
        let project = self.require_project(id)?;
        if project.user_id != editor.id {
            return Err(MarketError::forbidden(
                "You do not have permission to edit this project",
            )
            .into());
        }
        let name = required(name, "Project name")?;
        let description = required(description, "Project description")?;
        self.conn
            .execute(
                "UPDATE projects SET name = ?1, description = ?2 WHERE id = ?3 AND user_id = ?4",
                params![name, description, id, editor.id],
            )
            .context("Failed to update project")?;
        self.require_project(id)
    }

    pub fn update_project_links(
        &self,
        id: i64,
        editor: &User,
        project_link: Option<&str>,
        github_link: Option<&str>,
    ) -> Result<Project> {
        self.require_project(id)?;
        if !self.can_edit_links(editor, id)? {
            return Err(MarketError::forbidden(
                "You do not have permission to edit these links",
            )
            .into());
        }
        self.conn
            .execute(
                "UPDATE projects SET project_link = ?1, github_link = ?2 WHERE id = ?3",
                params![optional_text(project_link), optional_text(github_link), id],
            )
            .context("Failed to update project links")?;
        self.require_project(id)
    }

    /// Toggle pending <-> approved. Projects already taken or finished
    /// cannot be toggled.
    pub fn approve_project(&self, id: i64, approver: &User) -> Result<Project> {
        if !approver.role.is_staff() {
            return Err(MarketError::forbidden(
                "You do not have permission to perform this action",
            )
            .into());
        }
        let project = self.require_project(id)?;
        let next = match project.status {
            ProjectStatus::Pending => ProjectStatus::Approved,
            ProjectStatus::Approved => ProjectStatus::Pending,
            other => {
                return Err(MarketError::conflict(format!(
                    "Project is {} and cannot change approval",
                    other
                ))
                .into());
            }
        };
        self.set_project_status(id, next)
    }

    pub fn finish_project(&self, id: i64, user: &User) -> Result<Project> {
        let project = self.require_project(id)?;
        let allowed = user.role == Role::Admin
            || project.user_id == user.id
            || self.instructs_team_on(user.id, id)?;
        if !allowed {
            return Err(MarketError::forbidden(
                "You do not have permission to finish this project",
            )
            .into());
        }
        if project.status != ProjectStatus::Taken {
            return Err(MarketError::conflict("Only a taken project can be finished").into());
        }
        self.set_project_status(id, ProjectStatus::Finished)
    }

    pub fn set_project_status(&self, id: i64, status: ProjectStatus) -> Result<Project> {
        let count = self
            .conn
            .execute(
                "UPDATE projects SET status = ?1 WHERE id = ?2",
                params![status, id],
            )
            .context("Failed to update project status")?;
        if count == 0 {
            return Err(MarketError::not_found("Project", id).into());
        }
        self.require_project(id)
    }

    /// Owner-only delete.
    pub fn delete_project(&self, id: i64, owner: &User) -> Result<()> {
        let project = self.require_project(id)?;
        if project.user_id != owner.id {
            return Err(MarketError::forbidden(
                "You do not have permission to delete this project",
            )
            .into());
        }
        self.conn
            .execute(
                "DELETE FROM projects WHERE id = ?1 AND user_id = ?2",
                params![id, owner.id],
            )
            .context("Failed to delete project")?;
        Ok(())
    }

    pub fn admin_delete_project(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    // ── Access checks ────────────────────────────────────────────────

    /// Admins, the owner, instructors of an assigned team, and members of
    /// an assigned team.
    pub fn can_chat(&self, user: &User, project_id: i64) -> Result<bool> {
        if user.role == Role::Admin {
            return Ok(true);
        }
        let owner: Option<i64> = self
            .conn
            .query_row(
                "SELECT user_id FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query project owner")?;
        match owner {
            None => Ok(false),
            Some(owner) if owner == user.id => Ok(true),
            Some(_) => Ok(self.instructs_team_on(user.id, project_id)?
                || self.member_of_team_on(user.id, project_id)?),
        }
    }

    pub fn can_edit_links(&self, user: &User, project_id: i64) -> Result<bool> {
        self.can_chat(user, project_id)
    }

    pub(super) fn instructs_team_on(&self, user_id: i64, project_id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM teams WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .context("Failed to check team instructor")
    }

    fn member_of_team_on(&self, user_id: i64, project_id: i64) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM team_members m JOIN teams t ON m.team_id = t.id
                 WHERE t.project_id = ?1 AND m.user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .context("Failed to check team membership")
    }

    /// Project page data. Pending projects are only visible to their owner
    /// and staff.
    pub fn project_detail(&self, id: i64, viewer: Option<&User>) -> Result<ProjectDetail> {
        let project = self.require_project(id)?;
        if project.status == ProjectStatus::Pending {
            let visible = viewer.is_some_and(|v| v.role.is_staff() || v.id == project.user_id);
            if !visible {
                return Err(MarketError::not_found("Project", id).into());
            }
        }
        let teams = self.teams_for_project(id)?;
        let (can_chat, can_edit_links) = match viewer {
            Some(viewer) => (self.can_chat(viewer, id)?, self.can_edit_links(viewer, id)?),
            None => (false, false),
        };
        let chat_history = if can_chat {
            self.chat_history(Room::Project(id))?
        } else {
            Vec::new()
        };
        Ok(ProjectDetail {
            project,
            teams,
            can_chat,
            can_edit_links,
            chat_history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{db, user};
    use super::*;

    #[test]
    fn test_business_projects_start_pending_instructor_projects_approved() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let instructor = user(&db, "i@x.com", Role::Instructor);

        let p1 = db.create_project(&business, "Shop", "An online shop").unwrap();
        assert_eq!(p1.status, ProjectStatus::Pending);
        assert_eq!(p1.owner_email, "b@x.com");

        let p2 = db.create_project(&instructor, "Lab", "A lab project").unwrap();
        assert_eq!(p2.status, ProjectStatus::Approved);
    }

    #[test]
    fn test_students_cannot_post_projects() {
        let db = db();
        let student = user(&db, "s@x.com", Role::Student);
        let err = db.create_project(&student, "x", "y").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::Forbidden(_))
        ));
    }

    #[test]
    fn test_name_and_description_required() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let err = db.create_project(&business, " ", "desc").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::BadRequest(_))
        ));
    }

    #[test]
    fn test_public_listing_hides_pending() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let instructor = user(&db, "i@x.com", Role::Instructor);
        db.create_project(&business, "Pending one", "desc").unwrap();
        db.create_project(&instructor, "Approved one", "desc").unwrap();

        let paging = Paging::new(None, None, 25);
        let public = db.list_projects(paging, None, None, false).unwrap();
        assert_eq!(public.total, 1);
        assert_eq!(public.items[0].name, "Approved one");

        let staff = db.list_projects(paging, None, None, true).unwrap();
        assert_eq!(staff.total, 2);
        // newest first
        assert_eq!(staff.items[0].name, "Approved one");
    }

    #[test]
    fn test_listing_filters_by_query_and_status() {
        let db = db();
        let instructor = user(&db, "i@x.com", Role::Instructor);
        db.create_project(&instructor, "Robot arm", "hardware").unwrap();
        db.create_project(&instructor, "Web shop", "software").unwrap();
        let paging = Paging::new(None, None, 25);

        let found = db.list_projects(paging, Some("robot"), None, true).unwrap();
        assert_eq!(found.total, 1);
        let found = db.list_projects(paging, Some("ware"), None, true).unwrap();
        assert_eq!(found.total, 2);
        let found = db
            .list_projects(paging, None, Some(ProjectStatus::Taken), true)
            .unwrap();
        assert_eq!(found.total, 0);
    }

    #[test]
    fn test_admin_listing_counts_ignore_filters() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        for i in 0..7 {
            db.create_project(&business, &format!("P{}", i), "desc").unwrap();
        }
        db.set_project_status(1, ProjectStatus::Approved).unwrap();

        let paging = Paging::new(Some(2), Some(3), 6);
        let page = db
            .list_projects_admin(paging, None, Some(ProjectStatus::Pending))
            .unwrap();
        assert_eq!(page.page.total, 6);
        assert_eq!(page.page.total_pages, 2);
        assert_eq!(page.page.items.len(), 3);
        assert_eq!(page.counts.get("pending"), 6);
        assert_eq!(page.counts.get("approved"), 1);
        assert_eq!(page.counts.get("taken"), 0);
    }

    #[test]
    fn test_only_owner_updates_and_deletes() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let other = user(&db, "o@x.com", Role::Business);
        let project = db.create_project(&owner, "Name", "Desc").unwrap();

        assert!(db.update_project(project.id, &other, "N", "D").is_err());
        let updated = db.update_project(project.id, &owner, "New", "Better").unwrap();
        assert_eq!(updated.name, "New");

        assert!(db.delete_project(project.id, &other).is_err());
        db.delete_project(project.id, &owner).unwrap();
        assert!(db.get_project(project.id).unwrap().is_none());
    }

    #[test]
    fn test_approve_toggles_and_refuses_taken() {
        let db = db();
        let business = user(&db, "b@x.com", Role::Business);
        let instructor = user(&db, "i@x.com", Role::Instructor);
        let project = db.create_project(&business, "Name", "Desc").unwrap();

        assert!(db.approve_project(project.id, &business).is_err());
        let p = db.approve_project(project.id, &instructor).unwrap();
        assert_eq!(p.status, ProjectStatus::Approved);
        let p = db.approve_project(project.id, &instructor).unwrap();
        assert_eq!(p.status, ProjectStatus::Pending);

        db.set_project_status(project.id, ProjectStatus::Taken).unwrap();
        let err = db.approve_project(project.id, &instructor).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MarketError>(),
            Some(MarketError::Conflict(_))
        ));
    }

    #[test]
    fn test_finish_requires_taken() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let project = db.create_project(&owner, "Name", "Desc").unwrap();
        assert!(db.finish_project(project.id, &owner).is_err());
        db.set_project_status(project.id, ProjectStatus::Taken).unwrap();
        let p = db.finish_project(project.id, &owner).unwrap();
        assert_eq!(p.status, ProjectStatus::Finished);
    }

    #[test]
    fn test_chat_access_follows_team_assignment() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let instructor = user(&db, "i@x.com", Role::Instructor);
        let student = user(&db, "s@x.com", Role::Student);
        let outsider = user(&db, "o@x.com", Role::Student);
        let admin = user(&db, "a@x.com", Role::Admin);

        let project = db.create_project(&owner, "Name", "Desc").unwrap();
        db.set_project_status(project.id, ProjectStatus::Approved).unwrap();
        assert!(db.can_chat(&owner, project.id).unwrap());
        assert!(db.can_chat(&admin, project.id).unwrap());
        assert!(!db.can_chat(&instructor, project.id).unwrap());

        let team = db.create_group(&instructor, "Team A", project.id).unwrap();
        db.assign_user_to_team(&instructor, student.id, Some(team.id)).unwrap();

        assert!(db.can_chat(&instructor, project.id).unwrap());
        assert!(db.can_chat(&student, project.id).unwrap());
        assert!(!db.can_chat(&outsider, project.id).unwrap());
        assert!(!db.can_chat(&owner, 999).unwrap());
    }

    #[test]
    fn test_links_editable_by_team_member() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let instructor = user(&db, "i@x.com", Role::Instructor);
        let student = user(&db, "s@x.com", Role::Student);
        let project = db.create_project(&owner, "Name", "Desc").unwrap();
        db.set_project_status(project.id, ProjectStatus::Approved).unwrap();

        assert!(db
            .update_project_links(project.id, &student, Some("https://x"), None)
            .is_err());

        let team = db.create_group(&instructor, "T", project.id).unwrap();
        db.assign_user_to_team(&instructor, student.id, Some(team.id)).unwrap();
        let p = db
            .update_project_links(project.id, &student, Some(" https://demo "), Some(""))
            .unwrap();
        assert_eq!(p.project_link.as_deref(), Some("https://demo"));
        assert_eq!(p.github_link, None);
    }

    #[test]
    fn test_pending_detail_hidden_from_public() {
        let db = db();
        let owner = user(&db, "b@x.com", Role::Business);
        let student = user(&db, "s@x.com", Role::Student);
        let project = db.create_project(&owner, "Name", "Desc").unwrap();

        assert!(db.project_detail(project.id, None).is_err());
        assert!(db.project_detail(project.id, Some(&student)).is_err());
        let detail = db.project_detail(project.id, Some(&owner)).unwrap();
        assert!(detail.can_chat);
        assert!(detail.teams.is_empty());
    }
}
