use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cache::ReportHandle;
use crate::error::{ClovrError, Result};
use crate::history::{BuildId, BuildOutcome};
use crate::identity::ReportIdentity;
use crate::target::CoverageTarget;

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = include_str!("../schema.sql");

/// Open (or create) the clovr database at the given path.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// Ensure the schema is initialized. Safe to call on an already-initialized DB.
/// A database stamped with any other version than `SCHEMA_VERSION` is
/// rejected.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
            info!(version = SCHEMA_VERSION, "initialised database schema");
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) if v > SCHEMA_VERSION => {
            return Err(ClovrError::Other(format!(
                "Database schema version {} is newer than this binary supports ({}). \
                 Please upgrade clovr.",
                v, SCHEMA_VERSION
            )));
        }
        // Version 1 is the first schema; nothing older can exist.
        Some(v) => {
            return Err(ClovrError::Other(format!(
                "No migration path from schema version {} to {}. \
                 Consider deleting the database and re-publishing.",
                v, SCHEMA_VERSION
            )));
        }
    }
    Ok(())
}

/// A build row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRow {
    pub id: BuildId,
    pub outcome: BuildOutcome,
    pub created_at: String,
}

/// Register a new build. Without an explicit number the build gets the next
/// number after the latest one.
pub fn create_build(conn: &Connection, number: Option<u64>) -> Result<BuildId> {
    let number = match number {
        Some(n) => n,
        None => {
            let max: Option<u64> =
                conn.query_row("SELECT MAX(number) FROM build", [], |row| row.get(0))?;
            max.map_or(1, |m| m + 1)
        }
    };
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO build (number, outcome, created_at) VALUES (?1, ?2, ?3)",
        params![number, BuildOutcome::Success.as_str(), now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ClovrError::Other(format!("Build #{} already exists.", number))
        }
        other => ClovrError::Sqlite(other),
    })?;
    Ok(BuildId(number))
}

pub fn set_outcome(conn: &Connection, build: BuildId, outcome: BuildOutcome) -> Result<()> {
    let changed = conn.execute(
        "UPDATE build SET outcome = ?1 WHERE number = ?2",
        params![outcome.as_str(), build.0],
    )?;
    if changed == 0 {
        return Err(ClovrError::BuildNotFound(build.0));
    }
    Ok(())
}

pub fn get_build(conn: &Connection, build: BuildId) -> Result<Option<BuildRow>> {
    let row = conn
        .query_row(
            "SELECT number, outcome, created_at FROM build WHERE number = ?1",
            params![build.0],
            |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    row.map(|(number, outcome, created_at)| -> Result<BuildRow> {
        Ok(BuildRow {
            id: BuildId(number),
            outcome: outcome.parse()?,
            created_at,
        })
    })
    .transpose()
}

/// Every build, oldest first.
pub fn list_builds(conn: &Connection) -> Result<Vec<BuildRow>> {
    let mut stmt =
        conn.prepare("SELECT number, outcome, created_at FROM build ORDER BY number")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut result = Vec::new();
    for row in rows {
        let (number, outcome, created_at) = row?;
        result.push(BuildRow {
            id: BuildId(number),
            outcome: outcome.parse()?,
            created_at,
        });
    }
    Ok(result)
}

pub fn latest_build(conn: &Connection) -> Result<Option<BuildId>> {
    let max: Option<u64> = conn.query_row("SELECT MAX(number) FROM build", [], |row| row.get(0))?;
    Ok(max.map(BuildId))
}

/// Record a published report. A build carries each identity at most once.
pub fn attach_report(conn: &mut Connection, handle: &ReportHandle) -> Result<()> {
    let tx = conn.transaction()?;

    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM build WHERE number = ?1)",
        params![handle.build.0],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(ClovrError::BuildNotFound(handle.build.0));
    }

    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO report (build_number, identity, workspace_path, report_path, healthy, unhealthy, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            handle.build.0,
            handle.identity.as_str(),
            handle.workspace_path,
            handle.report_path.to_string_lossy().into_owned(),
            target_to_json(handle.healthy_target.as_ref())?,
            target_to_json(handle.unhealthy_target.as_ref())?,
            now,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ClovrError::DuplicateIdentity {
                build: handle.build.0,
                identity: handle.identity.to_string(),
            }
        }
        other => ClovrError::Sqlite(other),
    })?;
    tx.commit()?;
    Ok(())
}

/// Report handles of one build, in publishing order.
pub fn reports_for_build(conn: &Connection, build: BuildId) -> Result<Vec<ReportHandle>> {
    let mut stmt = conn.prepare(
        "SELECT identity, workspace_path, report_path, healthy, unhealthy \
         FROM report WHERE build_number = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![build.0], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut result = Vec::new();
    for row in rows {
        let (identity, workspace_path, report_path, healthy, unhealthy) = row?;
        result.push(ReportHandle {
            build,
            identity: ReportIdentity::parse(&identity)?,
            workspace_path,
            report_path: PathBuf::from(report_path),
            healthy_target: target_from_json(healthy.as_deref())?,
            unhealthy_target: target_from_json(unhealthy.as_deref())?,
        });
    }
    Ok(result)
}

pub fn identities_for_build(conn: &Connection, build: BuildId) -> Result<Vec<ReportIdentity>> {
    let mut stmt =
        conn.prepare("SELECT identity FROM report WHERE build_number = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![build.0], |row| row.get::<_, String>(0))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(ReportIdentity::parse(&row?)?);
    }
    Ok(result)
}

fn target_to_json(target: Option<&CoverageTarget>) -> Result<Option<String>> {
    target
        .map(|t| serde_json::to_string(t).map_err(|e| ClovrError::Other(e.to_string())))
        .transpose()
}

fn target_from_json(json: Option<&str>) -> Result<Option<CoverageTarget>> {
    json.map(|j| {
        serde_json::from_str(j)
            .map_err(|e| ClovrError::Parse(format!("Invalid stored coverage target: {e}")))
    })
    .transpose()
}
