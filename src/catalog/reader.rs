use crate::catalog::model::{
    Column, Constraint, ConstraintKind, ForeignKeyTarget, RelationalSchema, Table, TableKind,
};
use crate::error::{PostgateError, Result};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::future::Future;

/// Source of relational schema snapshots
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Read a consistent snapshot of the given namespaces
    async fn read(&self, namespaces: &[String]) -> Result<RelationalSchema>;
}

/// Reads schema metadata from the PostgreSQL system catalogs.
#[derive(Debug, Clone)]
pub struct PgCatalogReader {
    pool: PgPool,
}

/// Raw catalog rows, before they are assembled into a [`RelationalSchema`]
#[derive(Debug, Clone, Default)]
pub struct CatalogRows {
    pub tables: Vec<TableRow>,
    pub columns: Vec<ColumnRow>,
    pub constraints: Vec<ConstraintRow>,
}

#[derive(Debug, Clone)]
pub struct TableRow {
    pub namespace: String,
    pub name: String,
    pub relkind: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ColumnRow {
    pub namespace: String,
    pub table: String,
    pub column: Column,
}

#[derive(Debug, Clone)]
pub struct ConstraintRow {
    pub namespace: String,
    pub table: String,
    pub name: String,
    pub contype: String,
    pub columns: Vec<String>,
    pub ref_namespace: Option<String>,
    pub ref_table: Option<String>,
    pub ref_columns: Vec<String>,
}

const TABLES_QUERY: &str = concat!(
    "SELECT ",
    "  ns.nspname::text AS namespace, ",
    "  cls.relname::text AS name, ",
    "  cls.relkind::text AS relkind, ",
    "  pg_catalog.obj_description(cls.oid, 'pg_class') AS description ",
    "FROM pg_catalog.pg_class cls ",
    "JOIN pg_catalog.pg_namespace ns ",
    "  ON ns.oid = cls.relnamespace ",
    "WHERE ns.nspname = ANY($1) ",
    "  AND cls.relkind IN ('r', 'p', 'v', 'm') ",
    "ORDER BY ns.nspname, cls.relname"
);

const COLUMNS_QUERY: &str = concat!(
    "SELECT ",
    "  ns.nspname::text AS namespace, ",
    "  cls.relname::text AS table_name, ",
    "  attr.attname::text AS column_name, ",
    "  pg_catalog.format_type(attr.atttypid, attr.atttypmod) AS sql_type, ",
    "  NOT attr.attnotnull AS is_nullable, ",
    "  pg_catalog.pg_get_expr(def.adbin, def.adrelid) AS default_expr, ",
    "  (attr.attidentity::text = 'a' OR attr.attgenerated::text = 's') AS is_generated, ",
    "  pg_catalog.col_description(cls.oid, attr.attnum) AS description ",
    "FROM pg_catalog.pg_attribute attr ",
    "JOIN pg_catalog.pg_class cls ",
    "  ON cls.oid = attr.attrelid ",
    "JOIN pg_catalog.pg_namespace ns ",
    "  ON ns.oid = cls.relnamespace ",
    "LEFT JOIN pg_catalog.pg_attrdef def ",
    "  ON def.adrelid = cls.oid ",
    " AND def.adnum = attr.attnum ",
    "WHERE ns.nspname = ANY($1) ",
    "  AND cls.relkind IN ('r', 'p', 'v', 'm') ",
    "  AND attr.attnum > 0 ",
    "  AND NOT attr.attisdropped ",
    "ORDER BY ns.nspname, cls.relname, attr.attnum"
);

const CONSTRAINTS_QUERY: &str = concat!(
    "SELECT ",
    "  ns.nspname::text AS namespace, ",
    "  cls.relname::text AS table_name, ",
    "  con.conname::text AS name, ",
    "  con.contype::text AS contype, ",
    "  ARRAY(",
    "    SELECT att.attname::text ",
    "    FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord) ",
    "    JOIN pg_catalog.pg_attribute att ",
    "      ON att.attrelid = con.conrelid AND att.attnum = k.attnum ",
    "    ORDER BY k.ord",
    "  ) AS columns, ",
    "  fns.nspname::text AS ref_namespace, ",
    "  fcls.relname::text AS ref_table, ",
    "  ARRAY(",
    "    SELECT att.attname::text ",
    "    FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord) ",
    "    JOIN pg_catalog.pg_attribute att ",
    "      ON att.attrelid = con.confrelid AND att.attnum = k.attnum ",
    "    ORDER BY k.ord",
    "  ) AS ref_columns ",
    "FROM pg_catalog.pg_constraint con ",
    "JOIN pg_catalog.pg_class cls ",
    "  ON cls.oid = con.conrelid ",
    "JOIN pg_catalog.pg_namespace ns ",
    "  ON ns.oid = cls.relnamespace ",
    "LEFT JOIN pg_catalog.pg_class fcls ",
    "  ON fcls.oid = con.confrelid ",
    "LEFT JOIN pg_catalog.pg_namespace fns ",
    "  ON fns.oid = fcls.relnamespace ",
    "WHERE ns.nspname = ANY($1) ",
    "  AND con.contype IN ('p', 'f', 'u', 'c') ",
    "ORDER BY ns.nspname, cls.relname, con.conname"
);

impl PgCatalogReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch all catalog rows inside one read-only repeatable-read transaction
    pub async fn fetch_rows(&self, namespaces: &[String]) -> Result<CatalogRows> {
        let mut tx = self.pool.begin().await.map_err(catalog_error)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(catalog_error)?;

        let tables = sqlx::query(TABLES_QUERY)
            .bind(namespaces)
            .fetch_all(&mut *tx)
            .await
            .map_err(catalog_error)?
            .iter()
            .map(table_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(catalog_error)?;

        let columns = sqlx::query(COLUMNS_QUERY)
            .bind(namespaces)
            .fetch_all(&mut *tx)
            .await
            .map_err(catalog_error)?
            .iter()
            .map(column_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(catalog_error)?;

        let constraints = sqlx::query(CONSTRAINTS_QUERY)
            .bind(namespaces)
            .fetch_all(&mut *tx)
            .await
            .map_err(catalog_error)?
            .iter()
            .map(constraint_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(catalog_error)?;

        tx.commit().await.map_err(catalog_error)?;

        tracing::debug!(
            tables = tables.len(),
            columns = columns.len(),
            constraints = constraints.len(),
            "Fetched catalog rows"
        );

        Ok(CatalogRows {
            tables,
            columns,
            constraints,
        })
    }
}

#[async_trait]
impl CatalogReader for PgCatalogReader {
    async fn read(&self, namespaces: &[String]) -> Result<RelationalSchema> {
        read_with_retry(|| self.fetch_rows(namespaces), namespaces).await
    }
}

/// Fetch and assemble a snapshot, retrying once when the rows are inconsistent
/// (typically DDL committed between the catalog scans)
pub async fn read_with_retry<F, Fut>(mut fetch: F, namespaces: &[String]) -> Result<RelationalSchema>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CatalogRows>>,
{
    let rows = fetch().await?;
    match assemble(rows, namespaces) {
        Ok(schema) => return Ok(schema),
        Err(reason) => {
            tracing::warn!("Catalog snapshot inconsistent ({}), retrying once", reason);
        }
    }

    let rows = fetch().await?;
    assemble(rows, namespaces).map_err(PostgateError::SchemaInconsistent)
}

/// Assemble raw catalog rows into a consistent [`RelationalSchema`]
pub fn assemble(rows: CatalogRows, namespaces: &[String]) -> std::result::Result<RelationalSchema, String> {
    let mut tables: BTreeMap<(String, String), Table> = BTreeMap::new();

    for row in rows.tables {
        let kind = match row.relkind.as_str() {
            "r" | "p" => TableKind::Table,
            "v" | "m" => TableKind::View,
            other => return Err(format!("unexpected relkind '{}' for '{}'", other, row.name)),
        };
        let key = (row.namespace.clone(), row.name.clone());
        if tables.contains_key(&key) {
            return Err(format!("table '{}.{}' listed twice", row.namespace, row.name));
        }
        tables.insert(
            key,
            Table {
                namespace: row.namespace,
                name: row.name,
                kind,
                description: row.description,
                columns: Vec::new(),
                constraints: Vec::new(),
            },
        );
    }

    for row in rows.columns {
        let table = tables
            .get_mut(&(row.namespace.clone(), row.table.clone()))
            .ok_or_else(|| {
                format!(
                    "column '{}' belongs to unseen table '{}.{}'",
                    row.column.name, row.namespace, row.table
                )
            })?;
        table.columns.push(row.column);
    }

    for row in rows.constraints {
        let kind = match row.contype.as_str() {
            "p" => ConstraintKind::PrimaryKey,
            "f" => ConstraintKind::ForeignKey,
            "u" => ConstraintKind::Unique,
            "c" => ConstraintKind::Check,
            other => return Err(format!("unexpected constraint type '{}'", other)),
        };

        let references = if kind == ConstraintKind::ForeignKey {
            let (Some(ref_namespace), Some(ref_table)) = (row.ref_namespace, row.ref_table) else {
                return Err(format!(
                    "foreign key '{}' references a table that is not visible yet",
                    row.name
                ));
            };
            if !namespaces.contains(&ref_namespace) {
                tracing::debug!(
                    "Skipping foreign key '{}' into unexposed schema '{}'",
                    row.name,
                    ref_namespace
                );
                continue;
            }
            Some(ForeignKeyTarget {
                namespace: ref_namespace,
                table: ref_table,
                columns: row.ref_columns,
            })
        } else {
            None
        };

        let table = tables
            .get_mut(&(row.namespace.clone(), row.table.clone()))
            .ok_or_else(|| {
                format!(
                    "constraint '{}' belongs to unseen table '{}.{}'",
                    row.name, row.namespace, row.table
                )
            })?;

        table.constraints.push(Constraint {
            name: row.name,
            kind,
            columns: row.columns,
            references,
        });
    }

    let schema = RelationalSchema::new(tables.into_values().collect())?;
    schema.check_consistency()?;
    Ok(schema)
}

fn table_row(row: &PgRow) -> std::result::Result<TableRow, sqlx::Error> {
    Ok(TableRow {
        namespace: row.try_get("namespace")?,
        name: row.try_get("name")?,
        relkind: row.try_get("relkind")?,
        description: row.try_get("description")?,
    })
}

fn column_row(row: &PgRow) -> std::result::Result<ColumnRow, sqlx::Error> {
    Ok(ColumnRow {
        namespace: row.try_get("namespace")?,
        table: row.try_get("table_name")?,
        column: Column {
            name: row.try_get("column_name")?,
            nullable: row.try_get("is_nullable")?,
            sql_type: row.try_get("sql_type")?,
            default: row.try_get("default_expr")?,
            generated: row.try_get("is_generated")?,
            description: row.try_get("description")?,
        },
    })
}

fn constraint_row(row: &PgRow) -> std::result::Result<ConstraintRow, sqlx::Error> {
    Ok(ConstraintRow {
        namespace: row.try_get("namespace")?,
        table: row.try_get("table_name")?,
        name: row.try_get("name")?,
        contype: row.try_get("contype")?,
        columns: row.try_get("columns")?,
        ref_namespace: row.try_get("ref_namespace")?,
        ref_table: row.try_get("ref_table")?,
        ref_columns: row.try_get("ref_columns")?,
    })
}

fn catalog_error(err: sqlx::Error) -> PostgateError {
    match err {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => PostgateError::CatalogParse(err.to_string()),
        other => PostgateError::CatalogUnreachable(other.to_string()),
    }
}
