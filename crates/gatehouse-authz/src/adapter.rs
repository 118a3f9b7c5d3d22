//! Postgres-backed casbin policy adapter.
//!
//! # Purpose
//! Binds a store connection to a named rule table and implements the casbin
//! [`Adapter`] persistence contract against it.
//!
//! # Key invariants
//! - The rule table name is validated once, at construction, and never changes.
//! - Rows use the conventional casbin layout: a text `id`, `ptype`, and up to
//!   six `v0..v5` fields. Unused fields are written as empty strings and read
//!   back with NULL treated as empty, so tables written by other casbin
//!   Postgres adapters load unchanged.
//! - `id` is the hex MD5 of `ptype` and the rule values joined with `,`, which
//!   makes inserts idempotent and needs no column default.
//! - Binding provisions the table (`CREATE TABLE IF NOT EXISTS`), so a missing
//!   table only fails when the role lacks DDL permission.
//!
//! # Security notes
//! - The table name is the only dynamic SQL fragment; it is restricted to plain
//!   identifiers by [`RuleTable::new`]. Rule values are always bound parameters.
//!
//! # Concurrency
//! - Clones share the same `PgPool`. Each enforcer receives its own clone so the
//!   engine's `&mut self` adapter calls never contend on a lock.
use crate::connection::{PoolSettings, StoreHandle, StoreSource};
use crate::errors::{ProviderError, ProviderResult};
use async_trait::async_trait;
use casbin::error::AdapterError;
use casbin::{Adapter, Filter, Model};
use sqlx::postgres::PgPool;
use sqlx::{Executor, FromRow, Postgres};
use std::fmt;

pub const DEFAULT_TABLE_NAME: &str = "casbin_rule";

const RULE_FIELDS: usize = 6;
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validated rule table name, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable(String);

impl RuleTable {
    /// Validate a table name. An empty name selects [`DEFAULT_TABLE_NAME`].
    ///
    /// # Errors
    /// - `Configuration` when the name is not a plain `table` or `schema.table`
    ///   identifier.
    pub fn new(name: &str) -> ProviderResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(Self::default());
        }
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() > 2 || !parts.iter().all(|part| is_identifier(part)) {
            return Err(ProviderError::config(format!(
                "invalid rule table name: {name}"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self(DEFAULT_TABLE_NAME.to_string())
    }
}

impl fmt::Display for RuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    part.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
struct CasbinRuleRow {
    ptype: String,
    v0: String,
    v1: String,
    v2: String,
    v3: String,
    v4: String,
    v5: String,
}

impl CasbinRuleRow {
    fn fields(&self) -> [&str; RULE_FIELDS] {
        [
            self.v0.as_str(),
            self.v1.as_str(),
            self.v2.as_str(),
            self.v3.as_str(),
            self.v4.as_str(),
            self.v5.as_str(),
        ]
    }

    /// Rule values with trailing empty fields dropped.
    fn rule(&self) -> Vec<String> {
        let fields = self.fields();
        let len = fields
            .iter()
            .rposition(|field| !field.is_empty())
            .map_or(0, |idx| idx + 1);
        fields[..len].iter().map(|field| field.to_string()).collect()
    }
}

/// Casbin adapter over a Postgres rule table.
#[derive(Clone)]
pub struct PgPolicyAdapter {
    pool: PgPool,
    table: RuleTable,
    is_filtered: bool,
}

impl fmt::Debug for PgPolicyAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgPolicyAdapter")
            .field("table", &self.table)
            .field("is_filtered", &self.is_filtered)
            .finish()
    }
}

impl PgPolicyAdapter {
    /// Bind an already established store connection to the default rule table.
    ///
    /// # Errors
    /// - `Configuration` for an invalid URL source.
    /// - `Adapter` when the store is unreachable or the table cannot be provisioned.
    pub async fn from_source(
        source: impl Into<StoreSource>,
        settings: PoolSettings,
    ) -> ProviderResult<Self> {
        let pool = source.into().into_pool(settings)?;
        let table = RuleTable::default();
        ensure_table(&pool, &table)
            .await
            .map_err(ProviderError::Adapter)?;
        metrics::counter!("gatehouse_adapter_bindings_total", "path" => "source").increment(1);
        Ok(Self::with_pool(pool, table))
    }

    /// Bind a live store handle to `table`.
    ///
    /// The handle is only used to provision the table; the adapter keeps its own
    /// lazily connected pool so the caller may release the handle afterwards.
    ///
    /// # Errors
    /// - `Adapter` when the table cannot be provisioned.
    pub async fn bind(
        handle: &mut StoreHandle,
        table: RuleTable,
        settings: PoolSettings,
    ) -> ProviderResult<Self> {
        ensure_table(handle.connection(), &table)
            .await
            .map_err(ProviderError::Adapter)?;
        let pool = settings.lazy_pool(handle.descriptor().options().clone());
        metrics::counter!("gatehouse_adapter_bindings_total", "path" => "handle").increment(1);
        Ok(Self::with_pool(pool, table))
    }

    /// Wrap a pool without provisioning; the table must already exist.
    pub fn with_pool(pool: PgPool, table: RuleTable) -> Self {
        Self {
            pool,
            table,
            is_filtered: false,
        }
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rules(&self) -> Result<Vec<CasbinRuleRow>, sqlx::Error> {
        sqlx::query_as(&select_sql(&self.table))
            .fetch_all(&self.pool)
            .await
    }

    async fn insert_rules(&self, ptype: &str, rules: Vec<Vec<String>>) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let insert = insert_sql(&self.table);
        for rule in rules {
            let fields = padded(&rule).ok_or_else(|| sqlx::Error::Protocol(too_long(&rule)))?;
            bind_fields(
                sqlx::query(&insert).bind(rule_key(ptype, &fields)).bind(ptype),
                &fields,
            )
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }
}

async fn ensure_table<'c, E>(executor: E, table: &RuleTable) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    // `table` passed RuleTable validation, so interpolation is limited to identifiers.
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id TEXT PRIMARY KEY, \
         ptype TEXT, \
         v0 TEXT, v1 TEXT, v2 TEXT, v3 TEXT, v4 TEXT, v5 TEXT)"
    );
    executor.execute(ddl.as_str()).await.map(|_| ())
}

fn select_sql(table: &RuleTable) -> String {
    format!(
        "SELECT COALESCE(ptype, '') AS ptype, COALESCE(v0, '') AS v0, COALESCE(v1, '') AS v1, \
         COALESCE(v2, '') AS v2, COALESCE(v3, '') AS v3, COALESCE(v4, '') AS v4, \
         COALESCE(v5, '') AS v5 FROM {table}"
    )
}

fn insert_sql(table: &RuleTable) -> String {
    format!(
        "INSERT INTO {table} (id, ptype, v0, v1, v2, v3, v4, v5) \
         VALUES (md5($1), $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO NOTHING"
    )
}

fn delete_exact_sql(table: &RuleTable) -> String {
    format!(
        "DELETE FROM {table} WHERE ptype = $1 AND COALESCE(v0, '') = $2 \
         AND COALESCE(v1, '') = $3 AND COALESCE(v2, '') = $4 AND COALESCE(v3, '') = $5 \
         AND COALESCE(v4, '') = $6 AND COALESCE(v5, '') = $7"
    )
}

/// Input to the row id digest: `ptype` and the values up to the last non-empty one.
fn rule_key(ptype: &str, fields: &[String; RULE_FIELDS]) -> String {
    let len = fields
        .iter()
        .rposition(|field| !field.is_empty())
        .map_or(0, |idx| idx + 1);
    std::iter::once(ptype)
        .chain(fields[..len].iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

fn bind_fields<'q>(
    mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    fields: &'q [String; RULE_FIELDS],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    for field in fields {
        query = query.bind(field.as_str());
    }
    query
}

fn padded(rule: &[String]) -> Option<[String; RULE_FIELDS]> {
    if rule.len() > RULE_FIELDS {
        return None;
    }
    let mut fields: [String; RULE_FIELDS] = Default::default();
    for (slot, value) in fields.iter_mut().zip(rule) {
        slot.clone_from(value);
    }
    Some(fields)
}

fn too_long(rule: &[String]) -> String {
    format!(
        "rule has {} fields, at most {RULE_FIELDS} are supported",
        rule.len()
    )
}

/// Model section (`p` or `g`) a policy type belongs to.
fn section_for(ptype: &str) -> Option<&'static str> {
    match ptype.chars().next() {
        Some('p') => Some("p"),
        Some('g') => Some("g"),
        _ => None,
    }
}

/// Positional filter match; an empty filter value matches any field.
fn row_matches(row: &CasbinRuleRow, filter: &Filter<'_>) -> bool {
    let wanted: &[&str] = match section_for(&row.ptype) {
        Some("p") => &filter.p,
        Some("g") => &filter.g,
        _ => return true,
    };
    let fields = row.fields();
    wanted
        .iter()
        .enumerate()
        .all(|(idx, value)| value.is_empty() || fields.get(idx).is_some_and(|field| field == value))
}

/// `WHERE` clause and bind values for `remove_filtered_policy`.
fn filtered_delete(
    table: &RuleTable,
    field_index: usize,
    field_values: &[String],
) -> Option<(String, Vec<String>)> {
    if field_index + field_values.len() > RULE_FIELDS {
        return None;
    }
    let mut sql = format!("DELETE FROM {table} WHERE ptype = $1");
    let mut binds = Vec::new();
    for (offset, value) in field_values.iter().enumerate() {
        if value.is_empty() {
            continue;
        }
        binds.push(value.clone());
        sql.push_str(&format!(
            " AND COALESCE(v{}, '') = ${}",
            field_index + offset,
            binds.len() + 1
        ));
    }
    Some((sql, binds))
}

fn adapter_error(err: sqlx::Error) -> casbin::Error {
    casbin::Error::from(AdapterError(Box::new(err)))
}

#[async_trait]
impl Adapter for PgPolicyAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let rows = self.fetch_rules().await.map_err(adapter_error)?;
        for row in rows {
            if let Some(sec) = section_for(&row.ptype) {
                m.add_policy(sec, &row.ptype, row.rule());
            }
        }
        self.is_filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: Filter<'a>,
    ) -> casbin::Result<()> {
        let rows = self.fetch_rules().await.map_err(adapter_error)?;
        for row in rows.iter().filter(|row| row_matches(row, &f)) {
            if let Some(sec) = section_for(&row.ptype) {
                m.add_policy(sec, &row.ptype, row.rule());
            }
        }
        self.is_filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let mut rules: Vec<(String, [String; RULE_FIELDS])> = Vec::new();
        for sec in ["p", "g"] {
            let Some(assertions) = m.get_model().get(sec) else {
                continue;
            };
            for (ptype, assertion) in assertions {
                for rule in assertion.get_policy() {
                    let fields = padded(rule)
                        .ok_or_else(|| adapter_error(sqlx::Error::Protocol(too_long(rule))))?;
                    rules.push((ptype.clone(), fields));
                }
            }
        }

        let mut tx = self.pool.begin().await.map_err(adapter_error)?;
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&mut *tx)
            .await
            .map_err(adapter_error)?;
        let insert = insert_sql(&self.table);
        for (ptype, fields) in &rules {
            bind_fields(
                sqlx::query(&insert)
                    .bind(rule_key(ptype, fields))
                    .bind(ptype.as_str()),
                fields,
            )
            .execute(&mut *tx)
            .await
            .map_err(adapter_error)?;
        }
        tx.commit().await.map_err(adapter_error)
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(adapter_error)?;
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.is_filtered
    }

    async fn add_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.insert_rules(ptype, vec![rule])
            .await
            .map_err(adapter_error)?;
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        self.insert_rules(ptype, rules)
            .await
            .map_err(adapter_error)?;
        Ok(true)
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        let Some(fields) = padded(&rule) else {
            return Ok(false);
        };
        let result = bind_fields(
            sqlx::query(&delete_exact_sql(&self.table)).bind(ptype),
            &fields,
        )
        .execute(&self.pool)
        .await
        .map_err(adapter_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let delete = delete_exact_sql(&self.table);
        let mut tx = self.pool.begin().await.map_err(adapter_error)?;
        for rule in &rules {
            let Some(fields) = padded(rule) else {
                tx.rollback().await.map_err(adapter_error)?;
                return Ok(false);
            };
            let result = bind_fields(sqlx::query(&delete).bind(ptype), &fields)
                .execute(&mut *tx)
                .await
                .map_err(adapter_error)?;
            if result.rows_affected() == 0 {
                // All-or-nothing: a missing rule aborts the batch.
                tx.rollback().await.map_err(adapter_error)?;
                return Ok(false);
            }
        }
        tx.commit().await.map_err(adapter_error)?;
        Ok(true)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        let Some((sql, binds)) = filtered_delete(&self.table, field_index, &field_values) else {
            return Ok(false);
        };
        let mut query = sqlx::query(&sql).bind(ptype);
        for value in &binds {
            query = query.bind(value.as_str());
        }
        let result = query.execute(&self.pool).await.map_err(adapter_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn row(ptype: &str, fields: &[&str]) -> CasbinRuleRow {
        let mut values: [String; RULE_FIELDS] = Default::default();
        for (slot, value) in values.iter_mut().zip(fields) {
            *slot = value.to_string();
        }
        let [v0, v1, v2, v3, v4, v5] = values;
        CasbinRuleRow {
            ptype: ptype.to_string(),
            v0,
            v1,
            v2,
            v3,
            v4,
            v5,
        }
    }

    #[test]
    fn empty_table_name_selects_default() {
        assert_eq!(RuleTable::new("").expect("table").as_str(), "casbin_rule");
        assert_eq!(RuleTable::default().as_str(), DEFAULT_TABLE_NAME);
    }

    #[test]
    fn custom_table_names_are_kept() {
        assert_eq!(
            RuleTable::new("custom_rules").expect("table").as_str(),
            "custom_rules"
        );
        assert_eq!(
            RuleTable::new("authz.rules_v2").expect("table").to_string(),
            "authz.rules_v2"
        );
    }

    #[test]
    fn unsafe_table_names_are_rejected() {
        let too_long = "t".repeat(MAX_IDENTIFIER_LEN + 1);
        for name in [
            "rules; DROP TABLE users",
            "1rules",
            "a.b.c",
            "rules-v2",
            "\"quoted\"",
            ".rules",
            too_long.as_str(),
        ] {
            let err = RuleTable::new(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{name}");
        }
    }

    #[test]
    fn row_rule_drops_trailing_empty_fields() {
        assert_eq!(
            row("p", &["alice", "data1", "read"]).rule(),
            vec!["alice", "data1", "read"]
        );
        assert_eq!(
            row("p", &["alice", "", "read"]).rule(),
            vec!["alice", "", "read"]
        );
        assert!(row("p", &[]).rule().is_empty());
    }

    #[test]
    fn sections_follow_ptype_prefix() {
        assert_eq!(section_for("p"), Some("p"));
        assert_eq!(section_for("p2"), Some("p"));
        assert_eq!(section_for("g"), Some("g"));
        assert_eq!(section_for("g2"), Some("g"));
        assert_eq!(section_for("x"), None);
        assert_eq!(section_for(""), None);
    }

    #[test]
    fn filter_matches_positionally_with_wildcards() {
        let policy = row("p", &["alice", "tenant-a", "data1", "read"]);
        let grouping = row("g", &["alice", "admin", "tenant-a"]);

        let by_domain = Filter {
            p: vec!["", "tenant-a"],
            g: vec!["", "", "tenant-a"],
        };
        assert!(row_matches(&policy, &by_domain));
        assert!(row_matches(&grouping, &by_domain));

        let other_domain = Filter {
            p: vec!["", "tenant-b"],
            g: vec!["", "", "tenant-b"],
        };
        assert!(!row_matches(&policy, &other_domain));
        assert!(!row_matches(&grouping, &other_domain));

        let unfiltered = Filter { p: vec![], g: vec![] };
        assert!(row_matches(&policy, &unfiltered));
    }

    #[test]
    fn padded_rejects_oversized_rules() {
        let rule: Vec<String> = (0..7).map(|i| i.to_string()).collect();
        assert!(padded(&rule).is_none());
        let fields = padded(&["a".to_string(), "b".to_string()]).expect("fields");
        assert_eq!(fields[0], "a");
        assert_eq!(fields[1], "b");
        assert!(fields[2..].iter().all(String::is_empty));
    }

    #[test]
    fn filtered_delete_skips_empty_values_and_bounds_index() {
        let table = RuleTable::default();
        let (sql, binds) = filtered_delete(
            &table,
            1,
            &["tenant-a".to_string(), String::new(), "read".to_string()],
        )
        .expect("delete");
        assert_eq!(
            sql,
            "DELETE FROM casbin_rule WHERE ptype = $1 AND COALESCE(v1, '') = $2 \
             AND COALESCE(v3, '') = $3"
        );
        assert_eq!(binds, vec!["tenant-a", "read"]);
        assert!(filtered_delete(&table, 5, &["a".to_string(), "b".to_string()]).is_none());
    }

    #[test]
    fn sql_targets_configured_table() {
        let table = RuleTable::new("custom_rules").expect("table");
        assert!(insert_sql(&table).starts_with("INSERT INTO custom_rules "));
        assert!(delete_exact_sql(&table).starts_with("DELETE FROM custom_rules "));
        assert!(select_sql(&table).ends_with(" FROM custom_rules"));
    }

    #[test]
    fn reads_and_deletes_treat_null_as_empty() {
        let table = RuleTable::default();
        let select = select_sql(&table);
        for column in ["ptype", "v0", "v1", "v2", "v3", "v4", "v5"] {
            assert!(
                select.contains(&format!("COALESCE({column}, '') AS {column}")),
                "{column}"
            );
        }
        assert_eq!(delete_exact_sql(&table).matches("COALESCE(").count(), RULE_FIELDS);
    }

    #[test]
    fn inserts_supply_row_id() {
        let insert = insert_sql(&RuleTable::default());
        assert!(insert.contains("(id, ptype, v0, v1, v2, v3, v4, v5)"));
        assert!(insert.contains("md5($1)"));
    }

    #[test]
    fn rule_key_ignores_trailing_empty_fields() {
        let fields = padded(&[
            "admin".to_string(),
            "tenant-a".to_string(),
            "/data/*".to_string(),
            "read".to_string(),
        ])
        .expect("fields");
        assert_eq!(rule_key("p", &fields), "p,admin,tenant-a,/data/*,read");
        let inner_gap = padded(&["alice".to_string(), String::new(), "x".to_string()])
            .expect("fields");
        assert_eq!(rule_key("g", &inner_gap), "g,alice,,x");
        assert_eq!(rule_key("p", &Default::default()), "p");
    }
}
