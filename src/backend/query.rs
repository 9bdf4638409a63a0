//! Row query builder
//!
//! Filters, ordering and limits over one backend collection. A `Query`
//! renders to PostgREST query-string pairs for the HTTP backend and can be
//! evaluated locally against JSON rows for the in-memory backend.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Case-insensitive LIKE; `%` matches any run, `_` one character
    ILike(String, String),
    In(String, Vec<Value>),
    IsNull(String),
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Neq(column.to_string(), value.into())
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gte(column.to_string(), value.into())
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Lte(column.to_string(), value.into())
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    /// Substring match, ignoring case
    pub fn contains(column: &str, needle: &str) -> Self {
        Filter::ILike(column.to_string(), format!("%{}%", needle))
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn any(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn all(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Top-level query-string pair, e.g. `("user_id", "eq.42")`
    pub fn to_query_pair(&self) -> (String, String) {
        match self {
            Filter::Or(inner) => ("or".to_string(), format!("({})", join_nested(inner))),
            Filter::And(inner) => ("and".to_string(), format!("({})", join_nested(inner))),
            leaf => {
                let (column, operand) = leaf.leaf_parts(false);
                (column, operand)
            }
        }
    }

    /// Filter string accepted by the realtime channel (single column only)
    pub fn to_realtime(&self) -> Option<String> {
        match self {
            Filter::Eq(..)
            | Filter::Neq(..)
            | Filter::Gt(..)
            | Filter::Gte(..)
            | Filter::Lt(..)
            | Filter::Lte(..)
            | Filter::In(..) => {
                let (column, operand) = self.leaf_parts(true);
                Some(format!("{}={}", column, operand))
            }
            _ => None,
        }
    }

    /// Form used inside `or(...)` / `and(...)` groups
    fn to_nested(&self) -> String {
        match self {
            Filter::Or(inner) => format!("or({})", join_nested(inner)),
            Filter::And(inner) => format!("and({})", join_nested(inner)),
            leaf => {
                let (column, operand) = leaf.leaf_parts(true);
                format!("{}.{}", column, operand)
            }
        }
    }

    fn leaf_parts(&self, nested: bool) -> (String, String) {
        let scalar = |v: &Value| {
            if nested {
                quote_reserved(&render_value(v))
            } else {
                render_value(v)
            }
        };
        match self {
            Filter::Eq(c, v) => (c.clone(), format!("eq.{}", scalar(v))),
            Filter::Neq(c, v) => (c.clone(), format!("neq.{}", scalar(v))),
            Filter::Gt(c, v) => (c.clone(), format!("gt.{}", scalar(v))),
            Filter::Gte(c, v) => (c.clone(), format!("gte.{}", scalar(v))),
            Filter::Lt(c, v) => (c.clone(), format!("lt.{}", scalar(v))),
            Filter::Lte(c, v) => (c.clone(), format!("lte.{}", scalar(v))),
            Filter::ILike(c, pattern) => {
                let pattern = pattern.replace('%', "*");
                let pattern = if nested { quote_reserved(&pattern) } else { pattern };
                (c.clone(), format!("ilike.{}", pattern))
            }
            Filter::In(c, values) => {
                let list: Vec<String> = values
                    .iter()
                    .map(|v| quote_reserved(&render_value(v)))
                    .collect();
                (c.clone(), format!("in.({})", list.join(",")))
            }
            Filter::IsNull(c) => (c.clone(), "is.null".to_string()),
            Filter::Or(_) | Filter::And(_) => {
                let (key, value) = self.to_query_pair();
                (key, value)
            }
        }
    }

    /// Evaluate against a JSON object row
    pub fn matches(&self, row: &Value) -> bool {
        let field = |c: &str| row.get(c).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(c, v) => loosely_equal(field(c), v),
            Filter::Neq(c, v) => !field(c).is_null() && !loosely_equal(field(c), v),
            Filter::Gt(c, v) => compare_values(field(c), v) == Some(Ordering::Greater),
            Filter::Gte(c, v) => matches!(
                compare_values(field(c), v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(c, v) => compare_values(field(c), v) == Some(Ordering::Less),
            Filter::Lte(c, v) => matches!(
                compare_values(field(c), v),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::ILike(c, pattern) => field(c)
                .as_str()
                .map(|s| like_match(&s.to_lowercase(), &pattern.to_lowercase()))
                .unwrap_or(false),
            Filter::In(c, values) => values.iter().any(|v| loosely_equal(field(c), v)),
            Filter::IsNull(c) => field(c).is_null(),
            Filter::Or(inner) => inner.iter().any(|f| f.matches(row)),
            Filter::And(inner) => inner.iter().all(|f| f.matches(row)),
        }
    }
}

fn join_nested(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::to_nested)
        .collect::<Vec<_>>()
        .join(",")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// PostgREST requires double quotes around values holding reserved characters
fn quote_reserved(raw: &str) -> String {
    if raw.contains([',', '(', ')', ':', '"', ' ']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw.to_string()
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    compare_values(a, b) == Some(Ordering::Equal)
}

/// Ordering between two JSON scalars. Timestamps compare as instants,
/// numbers numerically; mixed string/number compares numerically when the
/// string parses.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(tx), Ok(ty)) => Some(tx.cmp(&ty)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(s), Value::Number(n)) => s.parse::<f64>().ok()?.partial_cmp(&n.as_f64()?),
        (Value::Number(n), Value::String(s)) => n.as_f64()?.partial_cmp(&s.parse::<f64>().ok()?),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    // dp[j]: pattern[..j] matches text[..i]
    let mut dp = vec![false; p.len() + 1];
    dp[0] = true;
    for j in 1..=p.len() {
        dp[j] = dp[j - 1] && p[j - 1] == '%';
    }
    for &tc in &t {
        let mut prev_diag = dp[0];
        dp[0] = false;
        for j in 1..=p.len() {
            let above = dp[j];
            dp[j] = match p[j - 1] {
                '%' => dp[j - 1] || above,
                '_' => prev_diag,
                pc => prev_diag && pc == tc,
            };
            prev_diag = above;
        }
    }
    dp[p.len()]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Query over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(collection: &str) -> Self {
        Query {
            collection: collection.to_string(),
            columns: None,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = Some(columns.to_string());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::neq(column, value))
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::gte(column, value))
    }

    pub fn contains(self, column: &str, needle: &str) -> Self {
        self.filter(Filter::contains(column, needle))
    }

    pub fn is_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter(Filter::is_in(column, values))
    }

    pub fn any(self, filters: Vec<Filter>) -> Self {
        self.filter(Filter::any(filters))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query-string pairs: select, filters, order, limit
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".to_string()),
        )];
        pairs.extend(self.filter_pairs());
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    /// Filter pairs only, for update and delete requests
    pub fn filter_pairs(&self) -> Vec<(String, String)> {
        self.filters.iter().map(Filter::to_query_pair).collect()
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Filter, sort and truncate rows locally
    pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
        let mut selected: Vec<Value> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .cloned()
            .collect();

        if !self.order.is_empty() {
            // Stable: rows with equal keys keep insertion order
            selected.sort_by(|a, b| {
                for order in &self.order {
                    let ord = order_values(
                        a.get(&order.column).unwrap_or(&Value::Null),
                        b.get(&order.column).unwrap_or(&Value::Null),
                    );
                    let ord = if order.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

/// Nulls sort last ascending, first descending
fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_pairs_for_simple_select() {
        let query = Query::table("messages")
            .eq("conversation_id", "c1")
            .order_by("created_at", false)
            .limit(1);
        let pairs = query.to_query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "*".to_string()),
                ("conversation_id".to_string(), "eq.c1".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_in_and_or_rendering() {
        let pair = Filter::is_in("id", vec!["a", "b,c"]).to_query_pair();
        assert_eq!(pair, ("id".to_string(), "in.(a,\"b,c\")".to_string()));

        let or = Filter::any(vec![
            Filter::contains("full_name", "ada"),
            Filter::all(vec![Filter::eq("requester_id", "u1"), Filter::eq("requestee_id", "u2")]),
        ]);
        assert_eq!(
            or.to_query_pair(),
            (
                "or".to_string(),
                "(full_name.ilike.*ada*,and(requester_id.eq.u1,requestee_id.eq.u2))".to_string()
            )
        );
    }

    #[test]
    fn test_grouped_alternatives_render_under_and() {
        let grouped = Filter::all(vec![
            Filter::any(vec![
                Filter::is_null("expires_at"),
                Filter::gte("expires_at", "2026-01-01T00:00:00Z"),
            ]),
            Filter::any(vec![Filter::contains("title", "keys"), Filter::contains("content", "keys")]),
        ]);
        assert_eq!(
            grouped.to_query_pair(),
            (
                "and".to_string(),
                "(or(expires_at.is.null,expires_at.gte.\"2026-01-01T00:00:00Z\"),or(title.ilike.*keys*,content.ilike.*keys*))"
                    .to_string()
            )
        );
        assert!(grouped.matches(&json!({ "title": "Lost KEYS", "content": "" })));
        assert!(!grouped.matches(&json!({ "title": "Lost keys", "expires_at": "2020-01-01T00:00:00Z" })));
    }

    #[test]
    fn test_realtime_filter() {
        assert_eq!(
            Filter::eq("conversation_id", "c1").to_realtime().as_deref(),
            Some("conversation_id=eq.c1")
        );
        assert!(Filter::contains("name", "x").to_realtime().is_none());
    }

    #[test]
    fn test_matches_scalars() {
        let row = json!({ "name": "Robotics Club", "count": 3, "active": true, "note": null });
        assert!(Filter::eq("count", 3).matches(&row));
        assert!(Filter::eq("active", true).matches(&row));
        assert!(Filter::gte("count", 2).matches(&row));
        assert!(!Filter::gte("count", 4).matches(&row));
        assert!(Filter::contains("name", "ROBOT").matches(&row));
        assert!(Filter::IsNull("note".to_string()).matches(&row));
        assert!(Filter::IsNull("missing".to_string()).matches(&row));
        // neq never matches null
        assert!(!Filter::neq("note", "x").matches(&row));
        assert!(Filter::neq("name", "Chess").matches(&row));
    }

    #[test]
    fn test_timestamps_compare_as_instants() {
        let row = json!({ "start_date": "2030-01-01T10:00:00.5+00:00" });
        assert!(Filter::gte("start_date", "2030-01-01T10:00:00Z").matches(&row));
        assert!(!Filter::gte("start_date", "2030-01-01T11:00:00+00:00").matches(&row));
    }

    #[test]
    fn test_like_wildcards() {
        assert!(like_match("hello", "h%o"));
        assert!(like_match("hello", "h_llo"));
        assert!(like_match("hello", "%"));
        assert!(!like_match("hello", "h_lo"));
        assert!(like_match("", "%"));
        assert!(!like_match("", "_"));
    }

    #[test]
    fn test_apply_sorts_stably_and_limits() {
        let rows = vec![
            json!({ "id": "1", "t": "2025-01-01T00:00:02Z" }),
            json!({ "id": "2", "t": "2025-01-01T00:00:01Z" }),
            json!({ "id": "3", "t": "2025-01-01T00:00:02Z" }),
            json!({ "id": "4", "t": null }),
        ];
        let asc = Query::table("x").order_by("t", true).apply(&rows);
        let ids: Vec<&str> = asc.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["2", "1", "3", "4"]);

        let desc = Query::table("x").order_by("t", false).limit(2).apply(&rows);
        let ids: Vec<&str> = desc.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["4", "1"]);
    }
}
