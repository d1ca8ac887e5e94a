//! Compiles [`ListQuery`] values into SQL over the records schema.
//!
//! Field resolution precedence, in order:
//!
//! 1. fixed record columns (`uri`, `cid`, `did`, `indexedAt`) read directly;
//! 2. fields configured in [`CollectionIndexes`] join the `record_kv` table
//!    on `(uri, key)` and compare its `value` column as text;
//! 3. anything else is extracted from the raw body with `json_extract`.
//!
//! The precedence matters for both correctness (raw extraction is untyped
//! and can misorder numeric text) and performance (column/index hits versus
//! a scan with JSON extraction), so the three cases are kept as explicit
//! variants rather than string concatenation.

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use weir_core::{
  collection::CollectionIndexes,
  query::{Direction, FacetFilter, Filter, ListQuery, SortKey},
};

use crate::{cursor::Cursor, encode::value_to_text};

pub(crate) const DEFAULT_LIMIT: u32 = 50;

/// A ready-to-execute statement with positional parameters.
pub(crate) struct Plan {
  pub sql:    String,
  pub params: Vec<SqlValue>,
}

/// Compiled list query plus what the executor needs to page results.
pub(crate) struct ListPlan {
  pub plan:       Plan,
  /// Effective ordering (default applied). The SELECT carries one extra
  /// column per key so the executor can build the next cursor.
  pub order:      Vec<SortKey>,
  /// Rows handed back to the caller; the SQL fetches one more to detect
  /// whether another page exists.
  pub page_limit: usize,
}

// ─── Field expressions ───────────────────────────────────────────────────────

fn fixed_column(field: &str) -> Option<&'static str> {
  match field {
    "uri" => Some("uri"),
    "cid" => Some("cid"),
    "did" => Some("did"),
    "indexedAt" => Some("indexed_at"),
    _ => None,
  }
}

/// Where a field reads from, selected by the precedence rule above.
enum FieldExpr<'c> {
  Column(&'static str),
  IndexJoin(&'c str),
  JsonPath(String),
}

impl FieldExpr<'_> {
  fn push_sql(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
    match self {
      FieldExpr::Column(col) => {
        sql.push_str("r.");
        sql.push_str(col);
      }
      FieldExpr::IndexJoin(alias) => {
        sql.push_str(alias);
        sql.push_str(".value");
      }
      FieldExpr::JsonPath(path) => {
        sql.push_str("json_extract(r.json, ?)");
        params.push(SqlValue::Text(path.clone()));
      }
    }
  }

  /// Ordering form of the expression. KV joins and JSON extraction yield
  /// NULL for records missing the field; those coalesce to the empty string
  /// (the same text a cursor encodes for them), so the sort and the keyset
  /// resume predicate stay total. Fixed columns are non-nullable.
  fn push_order_sql(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
    match self {
      FieldExpr::Column(_) => self.push_sql(sql, params),
      FieldExpr::IndexJoin(_) | FieldExpr::JsonPath(_) => {
        sql.push_str("COALESCE(");
        self.push_sql(sql, params);
        sql.push_str(", '')");
      }
    }
  }
}

// ─── Compiler ────────────────────────────────────────────────────────────────

struct Compiler<'a> {
  collection: &'a str,
  indexes:    &'a CollectionIndexes,
  /// field → kv-join alias, for fields served by the secondary index.
  joins:      BTreeMap<String, String>,
}

impl<'a> Compiler<'a> {
  fn new(collection: &'a str, indexes: &'a CollectionIndexes) -> Self {
    Self { collection, indexes, joins: BTreeMap::new() }
  }

  /// Walk the filter tree and ordering keys, assigning a kv-join alias to
  /// every index-served field before any SQL is emitted.
  fn claim_joins(&mut self, filter: Option<&Filter>, order: &[SortKey]) {
    if let Some(f) = filter {
      self.claim_filter(f);
    }
    for key in order {
      self.claim_field(&key.field);
    }
  }

  fn claim_filter(&mut self, filter: &Filter) {
    match filter {
      Filter::Equals { field, .. }
      | Filter::In { field, .. }
      | Filter::Contains { field, .. } => self.claim_field(field),
      Filter::And(fs) | Filter::Or(fs) => {
        fs.iter().for_each(|f| self.claim_filter(f))
      }
      Filter::Not(f) => self.claim_filter(f),
    }
  }

  fn claim_field(&mut self, field: &str) {
    if fixed_column(field).is_some() || self.joins.contains_key(field) {
      return;
    }
    if self.indexes.is_indexed(self.collection, field) {
      let alias = format!("kv{}", self.joins.len());
      self.joins.insert(field.to_string(), alias);
    }
  }

  fn field_expr(&self, field: &str) -> FieldExpr<'_> {
    if let Some(col) = fixed_column(field) {
      return FieldExpr::Column(col);
    }
    if let Some(alias) = self.joins.get(field) {
      return FieldExpr::IndexJoin(alias);
    }
    FieldExpr::JsonPath(format!("$.{field}"))
  }

  fn push_joins(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
    for (field, alias) in &self.joins {
      sql.push_str(&format!(
        " LEFT JOIN record_kv {alias} ON {alias}.uri = r.uri AND {alias}.key = ?"
      ));
      params.push(SqlValue::Text(field.clone()));
    }
  }

  fn push_facet_join(
    &self,
    facet: &FacetFilter,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
  ) {
    sql.push_str(
      " JOIN record_facets fct ON fct.uri = r.uri AND fct.type = ? AND fct.value = ?",
    );
    params.push(SqlValue::Text(facet.kind.as_str().to_string()));
    params.push(SqlValue::Text(facet.value.clone()));
  }

  /// Render one filter node. `None` means the fragment was invalid and has
  /// been skipped with a warning; the query proceeds without it.
  fn render_filter(&self, filter: &Filter) -> Option<(String, Vec<SqlValue>)> {
    match filter {
      Filter::Equals { field, value } => {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.field_expr(field).push_sql(&mut sql, &mut params);
        sql.push_str(" = ?");
        params.push(SqlValue::Text(value_to_text(value)));
        Some((sql, params))
      }
      Filter::In { field, values } => {
        if values.is_empty() {
          tracing::warn!(%field, "skipping IN filter with empty value list");
          return None;
        }
        let mut sql = String::new();
        let mut params = Vec::new();
        self.field_expr(field).push_sql(&mut sql, &mut params);
        sql.push_str(" IN (");
        for (i, v) in values.iter().enumerate() {
          if i > 0 {
            sql.push_str(", ");
          }
          sql.push('?');
          params.push(SqlValue::Text(value_to_text(v)));
        }
        sql.push(')');
        Some((sql, params))
      }
      Filter::Contains { field, value } => {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.field_expr(field).push_sql(&mut sql, &mut params);
        sql.push_str(" LIKE ?");
        params.push(SqlValue::Text(format!("%{value}%")));
        Some((sql, params))
      }
      Filter::And(fs) | Filter::Or(fs) => {
        let connective =
          if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
        if fs.is_empty() {
          tracing::warn!("skipping empty filter group");
          return None;
        }
        let rendered: Vec<(String, Vec<SqlValue>)> =
          fs.iter().filter_map(|f| self.render_filter(f)).collect();
        if rendered.is_empty() {
          return None;
        }
        let mut sql = String::from("(");
        let mut params = Vec::new();
        for (i, (frag, mut ps)) in rendered.into_iter().enumerate() {
          if i > 0 {
            sql.push_str(connective);
          }
          sql.push_str(&frag);
          params.append(&mut ps);
        }
        sql.push(')');
        Some((sql, params))
      }
      Filter::Not(f) => self
        .render_filter(f)
        .map(|(frag, params)| (format!("NOT ({frag})"), params)),
    }
  }

  /// Standard keyset-resume algebra: a disjunction over "prefix equal,
  /// current field strictly beyond" clauses, plus a final all-equal clause
  /// that moves past the cursor's cid (cid always compares ascending).
  /// Ordering expressions coalesce NULL keys to `''`, so a page boundary
  /// inside a block of records missing the sort field resumes by cid
  /// instead of dropping the rest of the block.
  fn render_cursor(
    &self,
    order: &[SortKey],
    cursor: &Cursor,
  ) -> (String, Vec<SqlValue>) {
    let mut sql = String::new();
    let mut params = Vec::new();

    for i in 0..order.len() {
      if i > 0 {
        sql.push_str(" OR ");
      }
      sql.push('(');
      for j in 0..i {
        self
          .field_expr(&order[j].field)
          .push_order_sql(&mut sql, &mut params);
        sql.push_str(" = ? AND ");
        params.push(SqlValue::Text(cursor.values[j].clone()));
      }
      self
        .field_expr(&order[i].field)
        .push_order_sql(&mut sql, &mut params);
      sql.push_str(match order[i].direction {
        Direction::Asc => " > ?",
        Direction::Desc => " < ?",
      });
      params.push(SqlValue::Text(cursor.values[i].clone()));
      sql.push(')');
    }

    sql.push_str(" OR (");
    for (j, key) in order.iter().enumerate() {
      self.field_expr(&key.field).push_order_sql(&mut sql, &mut params);
      sql.push_str(" = ? AND ");
      params.push(SqlValue::Text(cursor.values[j].clone()));
    }
    sql.push_str("r.cid > ?)");
    params.push(SqlValue::Text(cursor.cid.clone()));

    (sql, params)
  }
}

fn effective_order(order: &[SortKey]) -> Vec<SortKey> {
  if order.is_empty() {
    vec![SortKey::asc("indexedAt")]
  } else {
    order.to_vec()
  }
}

// ─── Entry points ────────────────────────────────────────────────────────────

pub(crate) fn compile_list(
  collection: &str,
  indexes: &CollectionIndexes,
  query: &ListQuery,
) -> ListPlan {
  let order = effective_order(&query.order);
  let page_limit = query.limit.unwrap_or(DEFAULT_LIMIT).max(1) as usize;

  let cursor = query.cursor.as_deref().and_then(|raw| {
    let cur = Cursor::decode(raw, order.len());
    if cur.is_none() {
      tracing::warn!("ignoring undecodable pagination cursor");
    }
    cur
  });

  let mut c = Compiler::new(collection, indexes);
  c.claim_joins(query.filter.as_ref(), &order);

  let mut sql = String::from(
    "SELECT r.uri, r.cid, r.did, r.collection, r.json, r.indexed_at",
  );
  let mut params = Vec::new();

  for key in &order {
    sql.push_str(", ");
    c.field_expr(&key.field).push_order_sql(&mut sql, &mut params);
  }
  sql.push_str(" FROM records r");

  c.push_joins(&mut sql, &mut params);
  if let Some(facet) = &query.facet {
    c.push_facet_join(facet, &mut sql, &mut params);
  }

  sql.push_str(" WHERE r.collection = ?");
  params.push(SqlValue::Text(collection.to_string()));

  if let Some(filter) = &query.filter
    && let Some((frag, mut ps)) = c.render_filter(filter)
  {
    sql.push_str(" AND (");
    sql.push_str(&frag);
    sql.push(')');
    params.append(&mut ps);
  }

  if let Some(cur) = &cursor {
    let (frag, mut ps) = c.render_cursor(&order, cur);
    sql.push_str(" AND (");
    sql.push_str(&frag);
    sql.push(')');
    params.append(&mut ps);
  }

  sql.push_str(" ORDER BY ");
  for (i, key) in order.iter().enumerate() {
    if i > 0 {
      sql.push_str(", ");
    }
    c.field_expr(&key.field).push_order_sql(&mut sql, &mut params);
    sql.push_str(match key.direction {
      Direction::Asc => " ASC",
      Direction::Desc => " DESC",
    });
  }
  sql.push_str(", r.cid ASC LIMIT ?");
  params.push(SqlValue::Integer((page_limit + 1) as i64));

  ListPlan { plan: Plan { sql, params }, order, page_limit }
}

/// Identical filter construction to [`compile_list`], minus ordering and
/// pagination, returning a scalar count.
pub(crate) fn compile_count(
  collection: &str,
  indexes: &CollectionIndexes,
  filter: Option<&Filter>,
  facet: Option<&FacetFilter>,
) -> Plan {
  let mut c = Compiler::new(collection, indexes);
  c.claim_joins(filter, &[]);

  let mut sql = String::from("SELECT COUNT(*) FROM records r");
  let mut params = Vec::new();

  c.push_joins(&mut sql, &mut params);
  if let Some(facet) = facet {
    c.push_facet_join(facet, &mut sql, &mut params);
  }

  sql.push_str(" WHERE r.collection = ?");
  params.push(SqlValue::Text(collection.to_string()));

  if let Some(filter) = filter
    && let Some((frag, mut ps)) = c.render_filter(filter)
  {
    sql.push_str(" AND (");
    sql.push_str(&frag);
    sql.push(')');
    params.append(&mut ps);
  }

  Plan { sql, params }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use weir_core::query::Filter;

  use super::*;

  fn indexes() -> CollectionIndexes {
    CollectionIndexes::new().with("app.test.post", ["title", "createdAt"])
  }

  #[test]
  fn fixed_column_beats_index_and_json() {
    let q = ListQuery {
      filter: Some(Filter::equals("indexedAt", "2024")),
      ..Default::default()
    };
    let plan = compile_list("app.test.post", &indexes(), &q);
    assert!(plan.plan.sql.contains("r.indexed_at = ?"));
    assert!(!plan.plan.sql.contains("json_extract"));
  }

  #[test]
  fn configured_field_uses_kv_join() {
    let q = ListQuery {
      filter: Some(Filter::equals("title", "hi")),
      ..Default::default()
    };
    let plan = compile_list("app.test.post", &indexes(), &q);
    assert!(plan.plan.sql.contains("LEFT JOIN record_kv kv0"));
    assert!(plan.plan.sql.contains("kv0.value = ?"));
  }

  #[test]
  fn unconfigured_field_falls_back_to_json_extract() {
    let q = ListQuery {
      filter: Some(Filter::equals("body", "hi")),
      ..Default::default()
    };
    let plan = compile_list("app.test.post", &indexes(), &q);
    assert!(plan.plan.sql.contains("json_extract(r.json, ?)"));
    assert!(!plan.plan.sql.contains("LEFT JOIN"));
  }

  #[test]
  fn same_field_in_filter_and_order_joins_once() {
    let q = ListQuery {
      filter: Some(Filter::equals("title", "hi")),
      order: vec![SortKey::desc("title")],
      ..Default::default()
    };
    let plan = compile_list("app.test.post", &indexes(), &q);
    assert_eq!(plan.plan.sql.matches("LEFT JOIN record_kv").count(), 1);
    assert!(
      plan.plan.sql.contains("COALESCE(kv0.value, '') DESC, r.cid ASC")
    );
  }

  #[test]
  fn empty_in_filter_is_skipped() {
    let q = ListQuery {
      filter: Some(Filter::and([
        Filter::within("title", Vec::<String>::new()),
        Filter::equals("did", "did:plc:a"),
      ])),
      ..Default::default()
    };
    let plan = compile_list("app.test.post", &indexes(), &q);
    assert!(!plan.plan.sql.contains(" IN "));
    assert!(plan.plan.sql.contains("r.did = ?"));
  }

  #[test]
  fn cursor_predicate_has_one_clause_per_field_plus_tiebreak() {
    let order = vec![SortKey::asc("createdAt"), SortKey::desc("title")];
    let raw = crate::cursor::Cursor::encode(
      &["2024-01-01".into(), "hi".into()],
      "bafy1",
    );
    let q = ListQuery { order, cursor: Some(raw), ..Default::default() };
    let plan = compile_list("app.test.post", &indexes(), &q);
    // asc field resumes with >, desc field with <, cid tiebreak with >;
    // nullable keys compare through COALESCE so NULL rows stay reachable.
    assert!(plan.plan.sql.contains("COALESCE(kv0.value, '') > ?"));
    assert!(plan.plan.sql.contains("COALESCE(kv1.value, '') < ?"));
    assert!(plan.plan.sql.contains("r.cid > ?"));
  }

  #[test]
  fn malformed_cursor_is_ignored() {
    let q = ListQuery {
      cursor: Some("definitely-not-base64!!".into()),
      ..Default::default()
    };
    let plan = compile_list("app.test.post", &indexes(), &q);
    assert!(!plan.plan.sql.contains("r.cid > ?"));
  }

  #[test]
  fn count_has_no_ordering_or_limit() {
    let plan = compile_count(
      "app.test.post",
      &indexes(),
      Some(&Filter::equals("title", "hi")),
      None,
    );
    assert!(plan.sql.starts_with("SELECT COUNT(*)"));
    assert!(!plan.sql.contains("ORDER BY"));
    assert!(!plan.sql.contains("LIMIT"));
    assert!(plan.sql.contains("kv0.value = ?"));
  }
}
