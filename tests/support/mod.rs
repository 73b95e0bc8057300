//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use postgate::auth::{RequestContext, ResolvedAuth};
use postgate::catalog::{
    Column, Constraint, ConstraintKind, ForeignKeyTarget, RelationalSchema, Table, TableKind,
};
use postgate::config::LimitsConfig;
use postgate::db::Executor;
use postgate::error::Result;
use postgate::inflect::Inflector;
use postgate::plan::QueryPlan;
use postgate::schema::{DeriveOptions, SchemaBuilder};
use postgate::watch::{SchemaRegistry, SchemaVersion};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn column(name: &str, sql_type: &str, nullable: bool) -> Column {
    Column {
        name: name.to_string(),
        nullable,
        sql_type: sql_type.to_string(),
        default: None,
        generated: false,
        description: None,
    }
}

pub fn serial(name: &str) -> Column {
    Column {
        default: Some(format!("nextval('{}_seq'::regclass)", name)),
        ..column(name, "integer", false)
    }
}

pub fn pk(table: &str, columns: &[&str]) -> Constraint {
    Constraint {
        name: format!("{}_pkey", table),
        kind: ConstraintKind::PrimaryKey,
        columns: columns.iter().map(|c| c.to_string()).collect(),
        references: None,
    }
}

pub fn fk(name: &str, columns: &[&str], table: &str, target: &[&str]) -> Constraint {
    Constraint {
        name: name.to_string(),
        kind: ConstraintKind::ForeignKey,
        columns: columns.iter().map(|c| c.to_string()).collect(),
        references: Some(ForeignKeyTarget {
            namespace: "public".to_string(),
            table: table.to_string(),
            columns: target.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

pub fn table(name: &str, columns: Vec<Column>, constraints: Vec<Constraint>) -> Table {
    Table {
        namespace: "public".to_string(),
        name: name.to_string(),
        kind: TableKind::Table,
        description: None,
        columns,
        constraints,
    }
}

fn authors() -> Table {
    table(
        "authors",
        vec![serial("id"), column("name", "text", false)],
        vec![pk("authors", &["id"])],
    )
}

fn books() -> Table {
    table(
        "books",
        vec![
            serial("id"),
            column("title", "text", false),
            column("author_id", "integer", false),
        ],
        vec![
            pk("books", &["id"]),
            fk("books_author_id_fkey", &["author_id"], "authors", &["id"]),
        ],
    )
}

/// `authors(id, name)` and `books(id, title, author_id → authors.id)`
pub fn authors_and_books() -> RelationalSchema {
    RelationalSchema::new(vec![authors(), books()]).unwrap()
}

/// Same tables listed in the opposite order
pub fn books_and_authors() -> RelationalSchema {
    RelationalSchema::new(vec![books(), authors()]).unwrap()
}

/// Executor that records every plan and replays canned results
#[derive(Default)]
pub struct RecordingExecutor {
    plans: Mutex<Vec<QueryPlan>>,
    results: Mutex<VecDeque<JsonValue>>,
}

impl RecordingExecutor {
    pub fn new(results: Vec<JsonValue>) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(Vec::new()),
            results: Mutex::new(results.into()),
        })
    }

    pub fn statements(&self) -> usize {
        self.plans.lock().unwrap().len()
    }

    pub fn plans(&self) -> Vec<QueryPlan> {
        self.plans.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, _auth: &ResolvedAuth, plan: &QueryPlan) -> Result<JsonValue> {
        self.plans.lock().unwrap().push(plan.clone());
        Ok(self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JsonValue::Null))
    }
}

pub fn builder(executor: Arc<dyn Executor>) -> SchemaBuilder {
    SchemaBuilder::new(
        Inflector::new(),
        DeriveOptions::default(),
        LimitsConfig::default(),
        executor,
    )
}

/// Registry serving version 1 of `relational`
pub fn registry(builder: &SchemaBuilder, relational: RelationalSchema) -> Arc<SchemaRegistry> {
    let (derived, schema) = builder.build(&relational).unwrap();
    Arc::new(SchemaRegistry::new(SchemaVersion {
        version: 1,
        relational: Arc::new(relational),
        derived,
        schema,
    }))
}

pub fn anonymous(version: Arc<SchemaVersion>) -> RequestContext {
    RequestContext {
        auth: ResolvedAuth::anonymous("anonymous"),
        version,
    }
}
