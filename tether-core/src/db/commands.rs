//! Command log queries

use super::{parse_ts, ts, Database};
use crate::error::{Error, Result};
use crate::types::{CommandLogEntry, CommandType, NewCommand};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

impl Database {
    /// Insert an already-sanitized command. Returns the row id.
    pub fn insert_command(&self, command: &NewCommand, at: DateTime<Utc>) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO command_log (instance_id, command_type, action, tool_name, parameters,
                                     result, success, execution_time_ms, tags, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                command.instance_id,
                command.command_type.as_str(),
                command.action,
                command.tool_name,
                command.parameters.to_string(),
                command.result,
                command.success,
                command.execution_time_ms,
                serde_json::to_string(&command.tags)?,
                ts(at),
            ],
        )
        .map_err(Error::storage("insert command"))?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest `limit` entries, newest first
    pub fn recent_commands(&self, instance_id: &str, limit: usize) -> Result<Vec<CommandLogEntry>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM command_log
            WHERE instance_id = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let entries = stmt
            .query_map(params![instance_id, limit as i64], Self::row_to_command)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::storage("load recent commands"))?;
        Ok(entries)
    }

    pub fn count_commands(&self, instance_id: &str) -> Result<i64> {
        let conn = self.connection();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM command_log WHERE instance_id = ?",
                [instance_id],
                |r| r.get(0),
            )
            .map_err(Error::storage("count commands"))?;
        Ok(count)
    }

    /// Delete every command-log entry of an instance. Returns rows deleted.
    pub fn delete_commands(&self, instance_id: &str) -> Result<usize> {
        let conn = self.connection();
        conn.execute("DELETE FROM command_log WHERE instance_id = ?", [instance_id])
            .map_err(Error::storage("delete commands"))
    }

    fn row_to_command(row: &Row) -> rusqlite::Result<CommandLogEntry> {
        let type_str: String = row.get("command_type")?;
        let parameters_str: String = row.get("parameters")?;
        let tags_str: String = row.get("tags")?;
        let timestamp_str: String = row.get("timestamp")?;

        Ok(CommandLogEntry {
            id: row.get("id")?,
            instance_id: row.get("instance_id")?,
            command_type: type_str.parse().unwrap_or(CommandType::Explicit),
            action: row.get("action")?,
            tool_name: row.get("tool_name")?,
            parameters: serde_json::from_str(&parameters_str).unwrap_or(serde_json::json!({})),
            result: row.get("result")?,
            success: row.get("success")?,
            execution_time_ms: row.get("execution_time_ms")?,
            tags: serde_json::from_str(&tags_str).unwrap_or_default(),
            timestamp: parse_ts(&timestamp_str),
        })
    }
}
