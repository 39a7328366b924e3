//! View/rule repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist views together with their ordered rules.
//! - Keep rule filter specs as opaque stored strings, byte-for-byte.
//!
//! # Invariants
//! - Creating a view and its rules is one transaction.
//! - Rules load in `position` order; soft-deleted rules stay on the row set
//!   (the view excludes them at resolve time).
//! - View listings exclude soft-deleted views.

use crate::model::view::{LifecycleStatus, Rule, View};
use crate::model::{ProjectId, RuleId, ViewId};
use crate::repo::observation_repo::{RepoError, RepoResult, VISIBLE_SQL};
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

const VIEW_SELECT_SQL: &str = "SELECT
    uuid,
    project,
    name,
    description,
    creator,
    isprivate,
    status,
    created_at
FROM views";

/// Repository interface for view and rule persistence.
pub trait ViewRepository {
    /// Persists a view and every rule it currently owns.
    fn create_view(&mut self, view: &View) -> RepoResult<ViewId>;

    /// Loads one view with all of its rules (including soft-deleted ones).
    fn get_view(&self, id: ViewId, include_deleted: bool) -> RepoResult<Option<View>>;

    /// Lists a project's visible views.
    fn list_views(&self, project: ProjectId) -> RepoResult<Vec<View>>;

    /// Appends one rule to an existing view.
    fn add_rule(&mut self, view: ViewId, rule: &Rule) -> RepoResult<()>;

    /// Soft-deletes one rule.
    fn soft_delete_rule(&mut self, rule: RuleId) -> RepoResult<()>;

    /// Soft-deletes a view; its rules stay untouched.
    fn soft_delete_view(&mut self, view: ViewId) -> RepoResult<()>;
}

/// SQLite-backed view repository.
///
/// Holds a shared connection borrow so it can coexist with the observation
/// repository on the same database.
pub struct SqliteViewRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteViewRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ViewRepository for SqliteViewRepository<'_> {
    fn create_view(&mut self, view: &View) -> RepoResult<ViewId> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO views (
                uuid,
                project,
                name,
                description,
                creator,
                isprivate,
                status,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                view.id().to_string(),
                view.project().to_string(),
                view.name(),
                view.description(),
                view.creator().to_string(),
                view.is_private() as i64,
                view.status().as_str(),
                view.created_at(),
            ],
        )?;

        for (position, rule) in view.rules().iter().enumerate() {
            insert_rule(&tx, view.id(), rule, position as i64)?;
        }

        tx.commit()?;
        Ok(view.id())
    }

    fn get_view(&self, id: ViewId, include_deleted: bool) -> RepoResult<Option<View>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VIEW_SELECT_SQL}
             WHERE uuid = ?1
               AND (?2 = 1 OR {VISIBLE_SQL});"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), include_deleted as i64])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let parts = parse_view_row(row)?;
        let rules = load_rules(self.conn, id)?;
        Ok(Some(parts.into_view(rules)))
    }

    fn list_views(&self, project: ProjectId) -> RepoResult<Vec<View>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VIEW_SELECT_SQL}
             WHERE project = ?1
               AND {VISIBLE_SQL}
             ORDER BY created_at ASC, uuid ASC;"
        ))?;

        let mut rows = stmt.query(params![project.to_string()])?;
        let mut parts = Vec::new();
        while let Some(row) = rows.next()? {
            parts.push(parse_view_row(row)?);
        }

        let mut views = Vec::with_capacity(parts.len());
        for part in parts {
            let rules = load_rules(self.conn, part.id)?;
            views.push(part.into_view(rules));
        }

        Ok(views)
    }

    fn add_rule(&mut self, view: ViewId, rule: &Rule) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM views WHERE uuid = ?1);",
            params![view.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(RepoError::NotFound(view));
        }

        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM rules WHERE view = ?1;",
            params![view.to_string()],
            |row| row.get(0),
        )?;
        insert_rule(&tx, view, rule, position)?;

        tx.commit()?;
        Ok(())
    }

    fn soft_delete_rule(&mut self, rule: RuleId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE rules SET status = 'deleted' WHERE uuid = ?1;",
            params![rule.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(rule));
        }

        Ok(())
    }

    fn soft_delete_view(&mut self, view: ViewId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE views SET status = 'deleted' WHERE uuid = ?1;",
            params![view.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(view));
        }

        Ok(())
    }
}

struct ViewParts {
    id: ViewId,
    project: ProjectId,
    name: String,
    description: Option<String>,
    creator: Uuid,
    isprivate: bool,
    status: LifecycleStatus,
    created_at: i64,
}

impl ViewParts {
    fn into_view(self, rules: Vec<Rule>) -> View {
        View::from_parts(
            self.id,
            self.project,
            self.name,
            self.description,
            self.creator,
            self.isprivate,
            self.status,
            self.created_at,
            rules,
        )
    }
}

fn parse_view_row(row: &Row<'_>) -> RepoResult<ViewParts> {
    let status_text: String = row.get("status")?;
    let status = LifecycleStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in views.status"))
    })?;

    let isprivate = match row.get::<_, i64>("isprivate")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid isprivate value `{other}` in views.isprivate"
            )));
        }
    };

    Ok(ViewParts {
        id: parse_uuid(row, "uuid")?,
        project: parse_uuid(row, "project")?,
        name: row.get("name")?,
        description: row.get("description")?,
        creator: parse_uuid(row, "creator")?,
        isprivate,
        status,
        created_at: row.get("created_at")?,
    })
}

fn load_rules(conn: &Connection, view: ViewId) -> RepoResult<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT uuid, observation_type, filters, status
         FROM rules
         WHERE view = ?1
         ORDER BY position ASC, uuid ASC;",
    )?;

    let mut rows = stmt.query(params![view.to_string()])?;
    let mut rules = Vec::new();
    while let Some(row) = rows.next()? {
        let status_text: String = row.get("status")?;
        let status = LifecycleStatus::parse(&status_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid status `{status_text}` in rules.status"))
        })?;

        let filters = match row.get::<_, Option<String>>("filters")? {
            Some(text) => Some(decode_filters(&text)?),
            None => None,
        };

        rules.push(Rule::from_parts(
            parse_uuid(row, "uuid")?,
            parse_uuid(row, "observation_type")?,
            filters,
            status,
        ));
    }

    Ok(rules)
}

fn insert_rule(conn: &Connection, view: ViewId, rule: &Rule, position: i64) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO rules (uuid, view, observation_type, filters, status, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            rule.id().to_string(),
            view.to_string(),
            rule.observation_type().to_string(),
            rule.filters().map(encode_filters).transpose()?,
            rule.status().as_str(),
            position,
        ],
    )?;
    Ok(())
}

fn encode_filters(filters: &BTreeMap<String, String>) -> RepoResult<String> {
    serde_json::to_string(filters)
        .map_err(|err| RepoError::InvalidData(format!("unencodable rule filters: {err}")))
}

fn decode_filters(text: &str) -> RepoResult<BTreeMap<String, String>> {
    serde_json::from_str(text)
        .map_err(|err| RepoError::InvalidData(format!("invalid rule filters JSON: {err}")))
}

fn parse_uuid(row: &Row<'_>, column: &str) -> RepoResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{text}` in column {column}")))
}
