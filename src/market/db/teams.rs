use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::users::summary_at;
use super::{MarketDb, ensure_role, optional_text, required};
use crate::errors::MarketError;
use crate::market::models::*;

const TEAM_SELECT: &str = "SELECT t.id, t.name, t.user_id, t.project_id, t.created_at, p.name
     FROM teams t LEFT JOIN projects p ON t.project_id = p.id";

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<(Team, Option<String>)> {
    Ok((
        Team {
            id: row.get(0)?,
            name: row.get(1)?,
            instructor_id: row.get(2)?,
            project_id: row.get(3)?,
            created_at: row.get(4)?,
        },
        row.get(5)?,
    ))
}

const INSTRUCTORS_ONLY: &str = "Access restricted to instructors";

impl MarketDb {
    // ── Team queries ─────────────────────────────────────────────────

    pub fn get_team(&self, id: i64) -> Result<Option<Team>> {
        self.conn
            .query_row(
                &format!("{} WHERE t.id = ?1", TEAM_SELECT),
                params![id],
                team_from_row,
            )
            .optional()
            .context("Failed to query team")
            .map(|found| found.map(|(team, _)| team))
    }

    fn require_team(&self, id: i64) -> Result<Team> {
        self.get_team(id)?
            .ok_or_else(|| MarketError::not_found("Team", id).into())
    }

    /// The team must exist and belong to `instructor`.
    fn require_own_team(&self, instructor: &User, id: i64) -> Result<Team> {
        let team = self.require_team(id)?;
        if team.instructor_id != instructor.id {
            return Err(MarketError::forbidden("This team belongs to another instructor").into());
        }
        Ok(team)
    }

    pub fn team_members(&self, team_id: i64) -> Result<Vec<UserSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.name, u.email, u.role FROM team_members m
                 JOIN users u ON m.user_id = u.id
                 WHERE m.team_id = ?1 ORDER BY u.id",
            )
            .context("Failed to prepare team_members")?;
        let rows = stmt
            .query_map(params![team_id], |row| summary_at(row, 0))
            .context("Failed to query team members")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read team member row")
    }

    fn query_teams(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TeamWithMembers>> {
        let teams = {
            let mut stmt = self.conn.prepare(sql).context("Failed to prepare team query")?;
            let rows = stmt
                .query_map(params, team_from_row)
                .context("Failed to query teams")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read team row")?
        };
        teams
            .into_iter()
            .map(|(team, project_name)| {
                let members = self.team_members(team.id)?;
                Ok(TeamWithMembers {
                    team,
                    project_name,
                    members,
                })
            })
            .collect()
    }

    pub fn teams_for_project(&self, project_id: i64) -> Result<Vec<TeamWithMembers>> {
        self.query_teams(
            &format!("{} WHERE t.project_id = ?1 ORDER BY t.id", TEAM_SELECT),
            params![project_id],
        )
    }

    pub fn teams_by_instructor(&self, instructor_id: i64) -> Result<Vec<TeamWithMembers>> {
        self.query_teams(
            &format!("{} WHERE t.user_id = ?1 ORDER BY t.id", TEAM_SELECT),
            params![instructor_id],
        )
    }

    pub fn team_of_user(&self, user_id: i64) -> Result<Option<TeamWithMembers>> {
        let mut teams = self.query_teams(
            &format!(
                "{} WHERE t.id = (SELECT team_id FROM team_members WHERE user_id = ?1)",
                TEAM_SELECT
            ),
            params![user_id],
        )?;
        Ok(teams.pop())
    }

    // ── Group management ─────────────────────────────────────────────

    /// Create a team on an approved (or already taken) project and mark the
    /// project taken, atomically.
    pub fn create_group(&self, instructor: &User, name: &str, project_id: i64) -> Result<Team> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let name = required(name, "Group name")?;
        let project = self.require_project(project_id)?;
        if !matches!(project.status, ProjectStatus::Approved | ProjectStatus::Taken) {
            return Err(MarketError::conflict(format!(
                "Project is {} and cannot be assigned",
                project.status
            ))
            .into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO teams (name, user_id, project_id) VALUES (?1, ?2, ?3)",
            params![name, instructor.id, project_id],
        )
        .context("Failed to insert team")?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE projects SET status = ?1 WHERE id = ?2",
            params![ProjectStatus::Taken, project_id],
        )
        .context("Failed to mark project taken")?;
        tx.commit().context("Failed to commit team creation")?;

        self.require_team(id)
    }

    pub fn update_group(&self, instructor: &User, team_id: i64, name: &str) -> Result<Team> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let name = optional_text(Some(name))
            .ok_or_else(|| MarketError::bad_request("New group name cannot be empty"))?;
        self.require_own_team(instructor, team_id)?;
        self.conn
            .execute(
                "UPDATE teams SET name = ?1 WHERE id = ?2",
                params![name, team_id],
            )
            .context("Failed to rename team")?;
        self.require_team(team_id)
    }

    /// Delete a team. When it was the last team on a taken project, the
    /// project goes back to approved.
    pub fn delete_group(&self, instructor: &User, team_id: i64) -> Result<()> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let team = self.require_own_team(instructor, team_id)?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM teams WHERE id = ?1", params![team_id])
            .context("Failed to delete team")?;
        if let Some(project_id) = team.project_id {
            release_project_if_unassigned(&tx, project_id)?;
        }
        tx.commit().context("Failed to commit team deletion")?;
        Ok(())
    }

    /// Move a team onto another project. The new project becomes taken; the
    /// old one reverts to approved if no team remains on it.
    pub fn assign_project_to_group(
        &self,
        instructor: &User,
        team_id: i64,
        project_id: i64,
    ) -> Result<Team> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let team = self.require_own_team(instructor, team_id)?;
        let project = self.require_project(project_id)?;
        if team.project_id == Some(project_id) {
            return Ok(team);
        }
        if !matches!(project.status, ProjectStatus::Approved | ProjectStatus::Taken) {
            return Err(MarketError::conflict(format!(
                "Project is {} and cannot be assigned",
                project.status
            ))
            .into());
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE teams SET project_id = ?1 WHERE id = ?2",
            params![project_id, team_id],
        )
        .context("Failed to reassign team")?;
        tx.execute(
            "UPDATE projects SET status = ?1 WHERE id = ?2",
            params![ProjectStatus::Taken, project_id],
        )
        .context("Failed to mark project taken")?;
        if let Some(old) = team.project_id {
            release_project_if_unassigned(&tx, old)?;
        }
        tx.commit().context("Failed to commit project assignment")?;

        self.require_team(team_id)
    }

    /// Put a student into a team, or take them out of any team with `None`.
    pub fn assign_user_to_team(
        &self,
        instructor: &User,
        user_id: i64,
        team_id: Option<i64>,
    ) -> Result<()> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let user = self.require_user(user_id)?;
        if user.role != Role::Student {
            return Err(MarketError::bad_request("Only students can join teams").into());
        }
        if let Some(team_id) = team_id {
            self.require_own_team(instructor, team_id)?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "DELETE FROM team_members WHERE user_id = ?1",
            params![user_id],
        )
        .context("Failed to clear team membership")?;
        if let Some(team_id) = team_id {
            tx.execute(
                "INSERT INTO team_members (team_id, user_id) VALUES (?1, ?2)",
                params![team_id, user_id],
            )
            .context("Failed to insert team member")?;
        }
        tx.commit().context("Failed to commit team membership")?;
        Ok(())
    }

    // ── Student accounts ─────────────────────────────────────────────

    /// Create a student linked to `instructor`, with a pre-hashed default password.
    pub fn create_student(
        &self,
        instructor: &User,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
    ) -> Result<User> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let email = required(email, "Email")?;
        let name = optional_text(name);
        self.create_user(
            name.as_deref(),
            email,
            password_hash,
            Role::Student,
            Some(instructor.id),
        )
    }

    /// Instructors may only delete student accounts.
    pub fn delete_student(&self, instructor: &User, user_id: i64) -> Result<()> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let count = self
            .conn
            .execute(
                "DELETE FROM users WHERE id = ?1 AND role = ?2",
                params![user_id, Role::Student],
            )
            .context("Failed to delete student")?;
        if count == 0 {
            return Err(MarketError::not_found("Student", user_id).into());
        }
        Ok(())
    }

    pub fn user_mgt_data(&self, instructor: &User) -> Result<UserMgtData> {
        ensure_role(instructor, &[Role::Instructor], INSTRUCTORS_ONLY)?;
        let students = self.students_where("u.instructor_id = ?1", params![instructor.id])?;
        let unassigned_students = self.students_where("u.instructor_id IS NULL", [])?;
        Ok(UserMgtData {
            students,
            unassigned_students,
            teams: self.teams_by_instructor(instructor.id)?,
            pending_requests: self.requests_for_instructor(instructor.id, RequestStatus::Pending)?,
            denied_requests: self.requests_for_instructor(instructor.id, RequestStatus::Denied)?,
            available_projects: self.list_projects_by_status(ProjectStatus::Approved)?,
        })
    }

    fn students_where<P: rusqlite::Params>(
        &self,
        condition: &str,
        params: P,
    ) -> Result<Vec<UserSummary>> {
        let sql = format!(
            "SELECT u.id, u.name, u.email, u.role FROM users u
             WHERE u.role = {} AND {} ORDER BY u.id",
            Role::Student.code(),
            condition
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare students query")?;
        let rows = stmt
            .query_map(params, |row| summary_at(row, 0))
            .context("Failed to query students")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read student row")
    }
}

pub(super) fn release_project_if_unassigned(
    conn: &rusqlite::Connection,
    project_id: i64,
) -> Result<()> {
    let remaining: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teams WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .context("Failed to count teams")?;
    if remaining == 0 {
        conn.execute(
            "UPDATE projects SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![ProjectStatus::Approved, project_id, ProjectStatus::Taken],
        )
        .context("Failed to release project")?;
    }
    Ok(())
}
