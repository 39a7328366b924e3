//! Observation repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist observations together with their append-only revisions.
//! - Execute compiled predicates against a project's observation set.
//! - Guard concurrent writers via compare-and-swap on `version`.
//!
//! # Invariants
//! - Creating an observation and its first revision is one transaction.
//! - `store_update` only applies when the persisted version still equals the
//!   version the caller loaded; otherwise nothing is written.
//! - Revisions are inserted, never updated or deleted.
//! - All read paths exclude `deleted` rows via [`VISIBLE_SQL`] unless a
//!   caller explicitly opts in.

use crate::db::DbError;
use crate::filter::predicate::Predicate;
use crate::model::observation::{Observation, ObservationStatus, Revision};
use crate::model::schema::AttributeMap;
use crate::model::{ObservationId, ProjectId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Shared visibility fragment; the only place soft-delete reads are decided.
pub(crate) const VISIBLE_SQL: &str = "status != 'deleted'";

const OBSERVATION_SELECT_SQL: &str = "SELECT
    uuid,
    project,
    observation_type,
    location,
    creator,
    status,
    version,
    attributes,
    created_at,
    updated_at
FROM observations";

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// No visible row with the given id.
    NotFound(Uuid),
    /// Compare-and-swap failed: another writer committed first.
    ConcurrentUpdate { id: ObservationId, expected: u64 },
    /// Persisted state cannot be decoded.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::ConcurrentUpdate { id, expected } => write!(
                f,
                "observation {id} no longer at version {expected}; reload and retry"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for observation persistence.
///
/// Implementations must make `store_update` atomic with respect to other
/// writers of the same observation.
pub trait ObservationRepository {
    /// Persists a freshly created observation and its revisions.
    fn create_observation(&mut self, observation: &Observation) -> RepoResult<ObservationId>;

    /// Loads one observation with its full revision history.
    fn get_observation(
        &self,
        id: ObservationId,
        include_deleted: bool,
    ) -> RepoResult<Option<Observation>>;

    /// Persists the outcome of an accepted update.
    ///
    /// `expected_version` is the version the caller loaded before applying
    /// the update engine; the write only happens if the persisted row still
    /// carries it.
    fn store_update(&mut self, observation: &Observation, expected_version: u64)
        -> RepoResult<()>;

    /// Soft-deletes an observation; history is retained.
    fn mark_deleted(&mut self, id: ObservationId, now_ms: i64) -> RepoResult<()>;

    /// Executes a compiled predicate against a project's visible observations.
    fn query(&self, project: ProjectId, predicate: &Predicate) -> RepoResult<Vec<Observation>>;
}

/// SQLite-backed observation repository.
///
/// Holds a shared connection borrow so it can coexist with other
/// repositories on the same database; multi-statement writes run inside
/// explicit transactions.
pub struct SqliteObservationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteObservationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ObservationRepository for SqliteObservationRepository<'_> {
    fn create_observation(&mut self, observation: &Observation) -> RepoResult<ObservationId> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO observations (
                uuid,
                project,
                observation_type,
                location,
                creator,
                status,
                version,
                attributes,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                observation.id().to_string(),
                observation.project().to_string(),
                observation.observation_type().to_string(),
                observation.location().to_string(),
                observation.creator().to_string(),
                observation.status().as_str(),
                observation.version() as i64,
                encode_attributes(observation.attributes())?,
                observation.created_at(),
                observation.updated_at(),
            ],
        )?;

        for revision in observation.revisions() {
            insert_revision(&tx, observation.id(), revision)?;
        }

        tx.commit()?;
        Ok(observation.id())
    }

    fn get_observation(
        &self,
        id: ObservationId,
        include_deleted: bool,
    ) -> RepoResult<Option<Observation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OBSERVATION_SELECT_SQL}
             WHERE uuid = ?1
               AND (?2 = 1 OR {VISIBLE_SQL});"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), include_deleted as i64])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let parts = parse_observation_row(row)?;
        let revisions = load_revisions(self.conn, id)?;
        Ok(Some(parts.into_observation(revisions)))
    }

    fn store_update(
        &mut self,
        observation: &Observation,
        expected_version: u64,
    ) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let changed = tx.execute(
            "UPDATE observations
             SET
                status = ?2,
                version = ?3,
                attributes = ?4,
                updated_at = ?5
             WHERE uuid = ?1
               AND version = ?6
               AND status != 'deleted';",
            params![
                observation.id().to_string(),
                observation.status().as_str(),
                observation.version() as i64,
                encode_attributes(observation.attributes())?,
                observation.updated_at(),
                expected_version as i64,
            ],
        )?;

        if changed == 0 {
            let exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM observations WHERE uuid = ?1);",
                params![observation.id().to_string()],
                |row| row.get(0),
            )?;
            return Err(if exists {
                RepoError::ConcurrentUpdate {
                    id: observation.id(),
                    expected: expected_version,
                }
            } else {
                RepoError::NotFound(observation.id())
            });
        }

        for revision in observation
            .revisions()
            .iter()
            .filter(|revision| revision.version > expected_version)
        {
            insert_revision(&tx, observation.id(), revision)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn mark_deleted(&mut self, id: ObservationId, now_ms: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE observations
             SET status = 'deleted', updated_at = ?2
             WHERE uuid = ?1;",
            params![id.to_string(), now_ms],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn query(&self, project: ProjectId, predicate: &Predicate) -> RepoResult<Vec<Observation>> {
        let mut sql = format!(
            "{OBSERVATION_SELECT_SQL} WHERE project = ? AND {VISIBLE_SQL} AND ("
        );
        let mut binds: Vec<Value> = vec![Value::Text(project.to_string())];
        predicate_sql(predicate, &mut sql, &mut binds);
        sql.push_str(") ORDER BY updated_at DESC, uuid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut parts = Vec::new();
        while let Some(row) = rows.next()? {
            parts.push(parse_observation_row(row)?);
        }

        let mut observations = Vec::with_capacity(parts.len());
        for part in parts {
            let revisions = load_revisions(self.conn, part.id)?;
            observations.push(part.into_observation(revisions));
        }

        Ok(observations)
    }
}

/// Lowers a predicate into a parameterized SQL fragment.
///
/// Attribute access goes through `json_extract` with the path supplied as a
/// bind value; numeric terms cast to REAL so comparison is numeric, date and
/// text terms compare the stored strings directly.
pub(crate) fn predicate_sql(predicate: &Predicate, sql: &mut String, binds: &mut Vec<Value>) {
    match predicate {
        Predicate::Nothing => sql.push_str("0 = 1"),
        Predicate::TypeIs(type_id) => {
            sql.push_str("observation_type = ?");
            binds.push(Value::Text(type_id.to_string()));
        }
        Predicate::TextEq { key, value } | Predicate::DateEq { key, value } => {
            sql.push_str("json_extract(attributes, ?) = ?");
            binds.push(json_path(key));
            binds.push(Value::Text(value.clone()));
        }
        Predicate::TextIn { key, values } => {
            if values.is_empty() {
                sql.push_str("0 = 1");
                return;
            }
            sql.push_str("json_extract(attributes, ?) IN (");
            binds.push(json_path(key));
            push_placeholders(sql, values.len());
            binds.extend(values.iter().map(|value| Value::Text(value.clone())));
            sql.push(')');
        }
        Predicate::NumberEq { key, value } => {
            sql.push_str("CAST(json_extract(attributes, ?) AS REAL) = ?");
            binds.push(json_path(key));
            binds.push(Value::Real(*value));
        }
        Predicate::NumberIn { key, values } => {
            if values.is_empty() {
                sql.push_str("0 = 1");
                return;
            }
            sql.push_str("CAST(json_extract(attributes, ?) AS REAL) IN (");
            binds.push(json_path(key));
            push_placeholders(sql, values.len());
            binds.extend(values.iter().map(|value| Value::Real(*value)));
            sql.push(')');
        }
        Predicate::NumberBetween { key, min, max } => {
            sql.push('(');
            let mut wrote = false;
            if let Some(min) = min {
                sql.push_str("CAST(json_extract(attributes, ?) AS REAL) >= ?");
                binds.push(json_path(key));
                binds.push(Value::Real(*min));
                wrote = true;
            }
            if let Some(max) = max {
                if wrote {
                    sql.push_str(" AND ");
                }
                sql.push_str("CAST(json_extract(attributes, ?) AS REAL) <= ?");
                binds.push(json_path(key));
                binds.push(Value::Real(*max));
                wrote = true;
            }
            if !wrote {
                sql.push_str("1 = 1");
            }
            sql.push(')');
        }
        Predicate::DateBetween { key, min, max } => {
            sql.push('(');
            let mut wrote = false;
            if let Some(min) = min {
                sql.push_str("json_extract(attributes, ?) >= ?");
                binds.push(json_path(key));
                binds.push(Value::Text(min.clone()));
                wrote = true;
            }
            if let Some(max) = max {
                if wrote {
                    sql.push_str(" AND ");
                }
                sql.push_str("json_extract(attributes, ?) <= ?");
                binds.push(json_path(key));
                binds.push(Value::Text(max.clone()));
                wrote = true;
            }
            if !wrote {
                sql.push_str("1 = 1");
            }
            sql.push(')');
        }
        Predicate::AllOf(terms) => compose_terms(terms, " AND ", "1 = 1", sql, binds),
        Predicate::AnyOf(terms) => compose_terms(terms, " OR ", "0 = 1", sql, binds),
    }
}

fn compose_terms(
    terms: &[Predicate],
    join: &str,
    identity: &str,
    sql: &mut String,
    binds: &mut Vec<Value>,
) {
    if terms.is_empty() {
        sql.push_str(identity);
        return;
    }
    sql.push('(');
    for (index, term) in terms.iter().enumerate() {
        if index > 0 {
            sql.push_str(join);
        }
        predicate_sql(term, sql, binds);
    }
    sql.push(')');
}

fn push_placeholders(sql: &mut String, count: usize) {
    for index in 0..count {
        if index > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
    }
}

fn json_path(key: &str) -> Value {
    Value::Text(format!("$.{key}"))
}

struct ObservationParts {
    id: ObservationId,
    project: ProjectId,
    observation_type: Uuid,
    location: Uuid,
    creator: Uuid,
    status: ObservationStatus,
    version: u64,
    attributes: AttributeMap,
    created_at: i64,
    updated_at: i64,
}

impl ObservationParts {
    fn into_observation(self, revisions: Vec<Revision>) -> Observation {
        Observation::from_parts(
            self.id,
            self.project,
            self.observation_type,
            self.location,
            self.creator,
            self.status,
            self.version,
            self.attributes,
            self.created_at,
            self.updated_at,
            revisions,
        )
    }
}

fn parse_observation_row(row: &Row<'_>) -> RepoResult<ObservationParts> {
    let status_text: String = row.get("status")?;
    let status = ObservationStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in observations.status"
        ))
    })?;

    let version: i64 = row.get("version")?;
    let version = u64::try_from(version).map_err(|_| {
        RepoError::InvalidData(format!("invalid version `{version}` in observations.version"))
    })?;

    Ok(ObservationParts {
        id: parse_uuid_column(row, "uuid")?,
        project: parse_uuid_column(row, "project")?,
        observation_type: parse_uuid_column(row, "observation_type")?,
        location: parse_uuid_column(row, "location")?,
        creator: parse_uuid_column(row, "creator")?,
        status,
        version,
        attributes: decode_attributes(&row.get::<_, String>("attributes")?)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn load_revisions(conn: &Connection, id: ObservationId) -> RepoResult<Vec<Revision>> {
    let mut stmt = conn.prepare(
        "SELECT version, updating_user, attributes, created_at
         FROM revisions
         WHERE observation = ?1
         ORDER BY version ASC;",
    )?;

    let mut rows = stmt.query(params![id.to_string()])?;
    let mut revisions = Vec::new();
    while let Some(row) = rows.next()? {
        let version: i64 = row.get("version")?;
        let version = u64::try_from(version).map_err(|_| {
            RepoError::InvalidData(format!("invalid version `{version}` in revisions.version"))
        })?;
        revisions.push(Revision {
            version,
            updating_user: parse_uuid_column(row, "updating_user")?,
            created_at: row.get("created_at")?,
            attributes: decode_attributes(&row.get::<_, String>("attributes")?)?,
        });
    }

    Ok(revisions)
}

fn insert_revision(
    conn: &Connection,
    observation: ObservationId,
    revision: &Revision,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO revisions (observation, version, updating_user, attributes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            observation.to_string(),
            revision.version as i64,
            revision.updating_user.to_string(),
            encode_attributes(&revision.attributes)?,
            revision.created_at,
        ],
    )?;
    Ok(())
}

fn encode_attributes(attributes: &AttributeMap) -> RepoResult<String> {
    serde_json::to_string(attributes)
        .map_err(|err| RepoError::InvalidData(format!("unencodable attributes: {err}")))
}

fn decode_attributes(text: &str) -> RepoResult<AttributeMap> {
    serde_json::from_str(text)
        .map_err(|err| RepoError::InvalidData(format!("invalid attributes JSON: {err}")))
}

fn parse_uuid_column(row: &Row<'_>, column: &str) -> RepoResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{text}` in column {column}")))
}
