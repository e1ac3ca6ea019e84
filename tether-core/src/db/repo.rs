//! Database handle and instance queries
//!
//! Event, checkpoint and command-log queries live in sibling modules as
//! further `impl Database` blocks.

use super::{parse_ts, parse_ts_opt, ts};
use crate::error::{Error, Result};
use crate::types::{Instance, InstanceStatus, Role};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(Error::storage("open database"))?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(Error::storage("configure database"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::storage("open database"))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    ///
    /// A panic while the lock was held leaves SQLite consistent, so a
    /// poisoned lock is recovered rather than propagated.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Instance operations
    // ============================================

    /// Insert a freshly registered instance.
    ///
    /// A primary-key collision is reported as [`Error::DuplicateId`].
    pub fn insert_instance(&self, instance: &Instance) -> Result<()> {
        let conn = self.connection();
        let result = conn.execute(
            r#"
            INSERT INTO instances (instance_id, project, role, context_percent, current_task,
                                   host_location, last_heartbeat, created_at, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                instance.instance_id,
                instance.project,
                instance.role.as_str(),
                instance.context_percent,
                instance.current_task,
                instance.host_location,
                ts(instance.last_heartbeat),
                ts(instance.created_at),
                instance.closed_at.map(ts),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(Error::DuplicateId(instance.instance_id.clone()))
            }
            Err(e) => Err(Error::storage("insert instance")(e)),
        }
    }

    /// Whether an instance row exists (closed or not)
    pub fn instance_exists(&self, instance_id: &str) -> Result<bool> {
        let conn = self.connection();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM instances WHERE instance_id = ?",
                [instance_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(Error::storage("check instance"))?;
        Ok(found.is_some())
    }

    /// Get an instance by exact ID, deriving status against `now`
    pub fn get_instance(
        &self,
        instance_id: &str,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Result<Option<Instance>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM instances WHERE instance_id = ?",
            [instance_id],
            |row| Self::row_to_instance(row, now, stale_after_secs),
        )
        .optional()
        .map_err(Error::storage("get instance"))
    }

    /// Instances whose id starts with `prefix`
    pub fn find_instances_by_prefix(
        &self,
        prefix: &str,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Result<Vec<Instance>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM instances
            WHERE substr(instance_id, 1, length(?1)) = ?1
            ORDER BY last_heartbeat DESC, instance_id ASC
            "#,
        )?;

        let instances = stmt
            .query_map([prefix], |row| Self::row_to_instance(row, now, stale_after_secs))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("find instances by prefix"))?;

        Ok(instances)
    }

    /// List instances ordered by project, then most recent heartbeat first
    pub fn list_instances(
        &self,
        project: Option<&str>,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Result<Vec<Instance>> {
        let conn = self.connection();

        let mut sql = String::from("SELECT * FROM instances WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(project) = project {
            sql.push_str(" AND project = ?");
            params.push(Box::new(project.to_string()));
        }

        sql.push_str(" ORDER BY project ASC, last_heartbeat DESC, instance_id ASC");

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let instances = stmt
            .query_map(params_refs.as_slice(), |row| {
                Self::row_to_instance(row, now, stale_after_secs)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("list instances"))?;

        Ok(instances)
    }

    /// Record a heartbeat. `current_task = None` keeps the stored task.
    ///
    /// Returns the number of rows touched; closed instances are never updated.
    pub fn update_heartbeat(
        &self,
        instance_id: &str,
        context_percent: u8,
        current_task: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.connection();
        conn.execute(
            r#"
            UPDATE instances
            SET context_percent = ?1,
                current_task = COALESCE(?2, current_task),
                last_heartbeat = ?3
            WHERE instance_id = ?4 AND closed_at IS NULL
            "#,
            params![context_percent, current_task, ts(at), instance_id],
        )
        .map_err(Error::storage("update heartbeat"))
    }

    /// Close an open instance. Returns rows touched (0 if already closed).
    pub fn close_instance(&self, instance_id: &str, at: DateTime<Utc>) -> Result<usize> {
        let conn = self.connection();
        conn.execute(
            "UPDATE instances SET closed_at = ?1 WHERE instance_id = ?2 AND closed_at IS NULL",
            params![ts(at), instance_id],
        )
        .map_err(Error::storage("close instance"))
    }

    fn row_to_instance(
        row: &Row,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> rusqlite::Result<Instance> {
        let role_str: String = row.get("role")?;
        let last_heartbeat_str: String = row.get("last_heartbeat")?;
        let created_at_str: String = row.get("created_at")?;
        let closed_at_str: Option<String> = row.get("closed_at")?;
        let context_percent: i64 = row.get("context_percent")?;

        let last_heartbeat = parse_ts(&last_heartbeat_str);
        let closed_at = parse_ts_opt(closed_at_str);

        Ok(Instance {
            instance_id: row.get("instance_id")?,
            project: row.get("project")?,
            role: role_str.parse().unwrap_or(Role::ProjectSupervisor),
            status: InstanceStatus::derive(last_heartbeat, closed_at, now, stale_after_secs),
            context_percent: context_percent.clamp(0, 100) as u8,
            current_task: row.get("current_task")?,
            host_location: row.get("host_location")?,
            last_heartbeat,
            created_at: parse_ts(&created_at_str),
            closed_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn create_test_instance(id: &str, project: &str, at: DateTime<Utc>) -> Instance {
        Instance {
            instance_id: id.to_string(),
            project: project.to_string(),
            role: Role::ProjectSupervisor,
            status: InstanceStatus::Active,
            context_percent: 0,
            current_task: None,
            host_location: "localhost".to_string(),
            last_heartbeat: at,
            created_at: at,
            closed_at: None,
        }
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_instance_crud() {
        let db = test_db();
        let now = Utc::now();
        let instance = create_test_instance("demo-PS-abc123", "demo", now);

        db.insert_instance(&instance).unwrap();

        let retrieved = db.get_instance("demo-PS-abc123", now, 120).unwrap().unwrap();
        assert_eq!(retrieved.project, "demo");
        assert_eq!(retrieved.status, InstanceStatus::Active);

        assert!(db.instance_exists("demo-PS-abc123").unwrap());
        assert!(!db.instance_exists("demo-PS-ffffff").unwrap());
    }

    #[test]
    fn test_duplicate_insert_is_distinct_error() {
        let db = test_db();
        let instance = create_test_instance("demo-PS-abc123", "demo", Utc::now());

        db.insert_instance(&instance).unwrap();
        let err = db.insert_instance(&instance).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "demo-PS-abc123"));
    }

    #[test]
    fn test_list_order_project_then_recency() {
        let db = test_db();
        let now = Utc::now();
        db.insert_instance(&create_test_instance("zeta-PS-000001", "zeta", now))
            .unwrap();
        db.insert_instance(&create_test_instance(
            "alpha-PS-000002",
            "alpha",
            now - Duration::minutes(10),
        ))
        .unwrap();
        db.insert_instance(&create_test_instance("alpha-PS-000003", "alpha", now))
            .unwrap();

        let ids: Vec<String> = db
            .list_instances(None, now, 120)
            .unwrap()
            .into_iter()
            .map(|i| i.instance_id)
            .collect();
        assert_eq!(
            ids,
            vec!["alpha-PS-000003", "alpha-PS-000002", "zeta-PS-000001"]
        );

        let alpha = db.list_instances(Some("alpha"), now, 120).unwrap();
        assert_eq!(alpha.len(), 2);
    }

    #[test]
    fn test_heartbeat_keeps_task_when_omitted() {
        let db = test_db();
        let now = Utc::now();
        db.insert_instance(&create_test_instance("demo-PS-abc123", "demo", now))
            .unwrap();

        db.update_heartbeat("demo-PS-abc123", 30, Some("task-7"), now)
            .unwrap();
        db.update_heartbeat("demo-PS-abc123", 40, None, now).unwrap();

        let instance = db.get_instance("demo-PS-abc123", now, 120).unwrap().unwrap();
        assert_eq!(instance.context_percent, 40);
        assert_eq!(instance.current_task.as_deref(), Some("task-7"));
    }

    #[test]
    fn test_close_is_one_way() {
        let db = test_db();
        let now = Utc::now();
        db.insert_instance(&create_test_instance("demo-PS-abc123", "demo", now))
            .unwrap();

        assert_eq!(db.close_instance("demo-PS-abc123", now).unwrap(), 1);
        assert_eq!(db.close_instance("demo-PS-abc123", now).unwrap(), 0);
        assert_eq!(
            db.update_heartbeat("demo-PS-abc123", 10, None, now).unwrap(),
            0
        );

        let instance = db.get_instance("demo-PS-abc123", now, 120).unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Closed);
    }

    #[test]
    fn test_prefix_search() {
        let db = test_db();
        let now = Utc::now();
        db.insert_instance(&create_test_instance("demo-PS-abc123", "demo", now))
            .unwrap();
        db.insert_instance(&create_test_instance("demo-PS-abd999", "demo", now))
            .unwrap();

        assert_eq!(db.find_instances_by_prefix("demo-PS-ab", now, 120).unwrap().len(), 2);
        assert_eq!(db.find_instances_by_prefix("demo-PS-abc", now, 120).unwrap().len(), 1);
        assert!(db.find_instances_by_prefix("nope", now, 120).unwrap().is_empty());
    }
}
