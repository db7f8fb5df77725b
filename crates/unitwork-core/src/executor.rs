//! Statement execution.
//!
//! The engine never talks to a database directly. Every statement it
//! produces goes through a [`StatementExecutor`]: a synchronous collaborator
//! that executes parameterized SQL (`$1`, `$2`, ... placeholders) with bind
//! values and demarcates transactions. Drivers implement this trait;
//! [`RecordingExecutor`] is the scripted in-memory implementation used by
//! the engine's own tests.

use crate::error::{Error, Result, StatementError, StatementErrorKind};
use crate::row::Row;
use crate::value::Value;
use std::collections::VecDeque;

/// A synchronous statement executor.
///
/// The unit of work owns its executor exclusively; all calls block until
/// the statement completes. `execute` returns the number of rows affected,
/// which the engine inspects to detect optimistic-lock conflicts.
pub trait StatementExecutor {
    /// Execute a statement (INSERT, UPDATE, DELETE, SELECT ... FOR UPDATE)
    /// and return the number of rows affected.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a keyed read and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Begin a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<()>;
}

/// One statement as the executor received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// The SQL text.
    pub sql: String,
    /// The bind values, in placeholder order.
    pub params: Vec<Value>,
}

/// A scripted failure installed on a [`RecordingExecutor`].
#[derive(Debug, Clone)]
struct ScriptedFailure {
    needle: String,
    kind: StatementErrorKind,
    sqlstate: Option<String>,
}

/// In-memory executor that records statements and plays back scripted
/// responses.
///
/// Defaults: every `execute` succeeds and reports one affected row per
/// statement (or per value tuple for multi-row inserts), every `query`
/// returns the next scripted row set (or no rows). Failures and affected-row
/// overrides are matched by SQL substring, first installed wins.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Vec<RecordedStatement>,
    scripted_rows: VecDeque<Vec<Row>>,
    failures: Vec<ScriptedFailure>,
    affected_overrides: Vec<(String, u64)>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
    fail_commit: bool,
}

impl RecordingExecutor {
    /// Create an empty recording executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a failure for any statement whose SQL contains `needle`.
    pub fn fail_when_contains(
        &mut self,
        needle: impl Into<String>,
        kind: StatementErrorKind,
        sqlstate: Option<&str>,
    ) {
        self.failures.push(ScriptedFailure {
            needle: needle.into(),
            kind,
            sqlstate: sqlstate.map(str::to_string),
        });
    }

    /// Script an affected-row count for any statement whose SQL contains
    /// `needle`.
    pub fn affected_when_contains(&mut self, needle: impl Into<String>, rows: u64) {
        self.affected_overrides.push((needle.into(), rows));
    }

    /// Queue a row set for the next `query` call.
    pub fn push_rows(&mut self, rows: Vec<Row>) {
        self.scripted_rows.push_back(rows);
    }

    /// Make the next `commit` fail.
    pub fn fail_next_commit(&mut self) {
        self.fail_commit = true;
    }

    /// All recorded statements, in execution order.
    #[must_use]
    pub fn statements(&self) -> &[RecordedStatement] {
        &self.statements
    }

    /// The recorded SQL texts, in execution order.
    #[must_use]
    pub fn sql_log(&self) -> Vec<&str> {
        self.statements.iter().map(|s| s.sql.as_str()).collect()
    }

    /// Number of `begin` calls.
    #[must_use]
    pub const fn begins(&self) -> usize {
        self.begins
    }

    /// Number of `commit` calls.
    #[must_use]
    pub const fn commits(&self) -> usize {
        self.commits
    }

    /// Number of `rollback` calls.
    #[must_use]
    pub const fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    fn scripted_error(&self, sql: &str) -> Option<Error> {
        self.failures
            .iter()
            .find(|f| sql.contains(&f.needle))
            .map(|f| {
                let mut err = StatementError::new(f.kind, format!("scripted failure for '{}'", f.needle))
                    .with_sql(sql.to_string());
                if let Some(state) = &f.sqlstate {
                    err = err.with_sqlstate(state.clone());
                }
                Error::Statement(err)
            })
    }

    fn affected_for(&self, sql: &str) -> Option<u64> {
        self.affected_overrides
            .iter()
            .find(|(needle, _)| sql.contains(needle))
            .map(|(_, rows)| *rows)
    }
}

impl StatementExecutor for RecordingExecutor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.statements.push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if let Some(err) = self.scripted_error(sql) {
            return Err(err);
        }
        if let Some(rows) = self.affected_for(sql) {
            return Ok(rows);
        }
        // Multi-row inserts report one affected row per tuple.
        let tuples = sql.matches('(').count().saturating_sub(1);
        if sql.starts_with("INSERT") && tuples > 1 {
            Ok(tuples as u64)
        } else {
            Ok(1)
        }
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.statements.push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if let Some(err) = self.scripted_error(sql) {
            return Err(err);
        }
        Ok(self.scripted_rows.pop_front().unwrap_or_default())
    }

    fn begin(&mut self) -> Result<()> {
        self.begins += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        if self.fail_commit {
            self.fail_commit = false;
            return Err(Error::statement(
                StatementErrorKind::Connection,
                "scripted commit failure",
            ));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_statements_in_order() {
        let mut exec = RecordingExecutor::new();
        exec.execute("INSERT INTO \"a\" (\"x\") VALUES ($1)", &[Value::Int(1)])
            .unwrap();
        exec.execute("DELETE FROM \"a\" WHERE \"x\" = $1", &[Value::Int(1)])
            .unwrap();

        let log = exec.sql_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("INSERT"));
        assert!(log[1].starts_with("DELETE"));
        assert_eq!(exec.statements()[0].params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_scripted_failure_matches_substring() {
        let mut exec = RecordingExecutor::new();
        exec.fail_when_contains(
            "\"users\"",
            StatementErrorKind::ConstraintViolation,
            Some("23505"),
        );

        let err = exec
            .execute("INSERT INTO \"users\" (\"id\") VALUES ($1)", &[Value::Int(1)])
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(err.sqlstate(), Some("23505"));

        // Other tables still succeed.
        assert!(exec
            .execute("INSERT INTO \"teams\" (\"id\") VALUES ($1)", &[Value::Int(1)])
            .is_ok());
    }

    #[test]
    fn test_affected_override() {
        let mut exec = RecordingExecutor::new();
        exec.affected_when_contains("\"orders\"", 0);
        let rows = exec
            .execute(
                "UPDATE \"orders\" SET \"total\" = $1 WHERE \"id\" = $2",
                &[Value::Int(5), Value::Int(1)],
            )
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_scripted_query_rows() {
        let mut exec = RecordingExecutor::new();
        exec.push_rows(vec![Row::new(
            vec!["id".to_string()],
            vec![Value::BigInt(1)],
        )]);

        let rows = exec.query("SELECT \"id\" FROM \"a\" WHERE \"id\" = $1", &[Value::BigInt(1)]).unwrap();
        assert_eq!(rows.len(), 1);

        let rows = exec.query("SELECT \"id\" FROM \"a\" WHERE \"id\" = $1", &[Value::BigInt(2)]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_transaction_counters() {
        let mut exec = RecordingExecutor::new();
        exec.begin().unwrap();
        exec.commit().unwrap();
        exec.begin().unwrap();
        exec.rollback().unwrap();
        assert_eq!(exec.begins(), 2);
        assert_eq!(exec.commits(), 1);
        assert_eq!(exec.rollbacks(), 1);
    }

    #[test]
    fn test_multi_row_insert_affected_count() {
        let mut exec = RecordingExecutor::new();
        let rows = exec
            .execute(
                "INSERT INTO \"a\" (\"x\") VALUES ($1), ($2), ($3)",
                &[Value::Int(1), Value::Int(2), Value::Int(3)],
            )
            .unwrap();
        assert_eq!(rows, 3);
    }
}
