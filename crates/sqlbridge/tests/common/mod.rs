//! In-memory connection used by the integration tests
//!
//! Counts every call, records every statement, serves canned query replies
//! and can be told to fail the Nth execute or to stall on commit.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlbridge::connection::{Connection, PreparedStatement, Transaction};
use sqlbridge::types::{Param, Record, Row, Value};
use sqlbridge::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Call counters shared by a connection and everything it hands out
#[derive(Debug, Default)]
pub struct Calls {
    pub query: AtomicUsize,
    pub execute: AtomicUsize,
    pub prepare: AtomicUsize,
    pub begin: AtomicUsize,
    pub commit: AtomicUsize,
    pub rollback: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        [
            &self.query,
            &self.execute,
            &self.prepare,
            &self.begin,
            &self.commit,
            &self.rollback,
        ]
        .iter()
        .map(|c| Self::get(c))
        .sum()
    }
}

#[derive(Default)]
struct State {
    calls: Calls,
    fail_on_execute: Option<usize>,
    commit_delay: Option<Duration>,
    replies: Mutex<VecDeque<Vec<Row>>>,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
}

impl State {
    fn record(&self, sql: &str, params: &[Value]) {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.calls.query.fetch_add(1, Ordering::SeqCst);
        self.record(sql, params);
        Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let n = self.calls.execute.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(sql, params);
        if self.fail_on_execute == Some(n) {
            return Err(Error::query_with_sql("duplicate key value", sql));
        }
        Ok(1)
    }
}

/// Mock connection; clones share state
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<State>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the Nth execute (1-based), counted across the connection, its
    /// transactions and prepared statements
    pub fn failing_on_execute(n: usize) -> Self {
        Self {
            state: Arc::new(State {
                fail_on_execute: Some(n),
                ..Default::default()
            }),
        }
    }

    /// Transactions take `delay` to commit
    pub fn with_commit_delay(delay: Duration) -> Self {
        Self {
            state: Arc::new(State {
                commit_delay: Some(delay),
                ..Default::default()
            }),
        }
    }

    /// Queue the reply of the next query
    pub fn reply(&self, rows: Vec<Row>) -> &Self {
        self.state.replies.lock().unwrap().push_back(rows);
        self
    }

    pub fn calls(&self) -> &Calls {
        &self.state.calls
    }

    /// Every statement seen so far with its bound values
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state.statements.lock().unwrap().clone()
    }

    pub fn last_sql(&self) -> Option<String> {
        self.statements().last().map(|(sql, _)| sql.clone())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.state.query(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.state.execute(sql, params)
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.state.calls.prepare.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.state.calls.begin.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct MockStatement {
    state: Arc<State>,
    sql: String,
}

#[async_trait]
impl PreparedStatement for MockStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        self.state.execute(&self.sql, params)
    }

    async fn query(&self, params: &[Value]) -> Result<Vec<Row>> {
        self.state.query(&self.sql, params)
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

pub struct MockTransaction {
    state: Arc<State>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.state.query(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.state.execute(sql, params)
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.state.calls.prepare.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
        }))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.state.calls.commit.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.state.commit_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.calls.rollback.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a record from (column, value) pairs
pub fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Param::Value(v.clone())))
        .collect()
}

/// Build a row whose columns carry declared types
pub fn typed_row(cells: &[(&str, &str, Value)]) -> Row {
    Row::with_types(
        cells.iter().map(|(name, _, _)| name.to_string()).collect(),
        cells.iter().map(|(_, _, v)| v.clone()).collect(),
        cells.iter().map(|(_, ty, _)| ty.to_string()).collect(),
    )
}

/// Build an untyped row
pub fn row(cells: &[(&str, Value)]) -> Row {
    Row::new(
        cells.iter().map(|(name, _)| name.to_string()).collect(),
        cells.iter().map(|(_, v)| v.clone()).collect(),
    )
}
