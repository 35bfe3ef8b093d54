//! SQL text generation for the relational adapter.

use super::engine::{Dialect, SqlValue};
use super::mapper::{self, COLUMNS};
use super::schema::{FTS_TABLE, TABLE};
use crate::models::{DateRange, DevlogFilter, DevlogStatus, PaginationOptions, SortField, SortOrder};
use crate::query::search_tokens;

/// Accumulates parameters and hands out matching placeholders.
pub struct SqlBuilder {
    dialect: Dialect,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    pub fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    pub fn into_params(self) -> Vec<SqlValue> {
        self.params
    }
}

/// How free-text search is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// SQLite FTS5 match against the external-content index.
    Fts,
    /// Substring match (`LIKE` on SQLite, `ILIKE` on PostgreSQL).
    Like,
    /// MySQL FULLTEXT boolean mode.
    FullText,
}

impl SearchMode {
    pub fn for_dialect(dialect: Dialect, fts_available: bool) -> Self {
        match dialect {
            Dialect::Sqlite if fts_available => Self::Fts,
            Dialect::Sqlite | Dialect::Postgres => Self::Like,
            Dialect::Mysql => Self::FullText,
        }
    }
}

/// FTS5 query: every token as a quoted prefix term, implicitly ANDed.
pub fn fts_query(text: &str) -> Option<String> {
    let tokens = search_tokens(text);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{}\"*", t))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn boolean_mode_query(text: &str) -> Option<String> {
    let tokens = search_tokens(text);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("+{}*", t))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn in_list<T>(b: &mut SqlBuilder, column: &str, values: &[T], as_str: impl Fn(&T) -> &'static str) -> String {
    let placeholders: Vec<String> = values
        .iter()
        .map(|v| b.bind(SqlValue::text(as_str(v))))
        .collect();
    format!("{} IN ({})", column, placeholders.join(", "))
}

/// Conditions for `filter`, ANDed. Pagination is ignored.
pub fn conditions(b: &mut SqlBuilder, filter: &DevlogFilter, search: SearchMode) -> Vec<String> {
    let dialect = b.dialect;
    let mut out = Vec::new();

    let archived = filter.archived_only();
    out.push(format!("archived = {}", b.bind(mapper::boolean(dialect, archived))));

    if !filter.status.is_empty() {
        out.push(in_list(b, "status", &filter.status, |s| s.as_str()));
    }
    if !filter.entry_type.is_empty() {
        out.push(in_list(b, "entry_type", &filter.entry_type, |t| t.as_str()));
    }
    if !filter.priority.is_empty() {
        out.push(in_list(b, "priority", &filter.priority, |p| p.as_str()));
    }
    if let Some(assignee) = &filter.assignee {
        out.push(format!("assignee = {}", b.bind(SqlValue::text(assignee))));
    }
    if let Some(from) = filter.from_date {
        out.push(format!("created_at >= {}", b.bind(mapper::timestamp(dialect, from))));
    }
    if let Some(to) = filter.to_date {
        out.push(format!("created_at <= {}", b.bind(mapper::timestamp(dialect, to))));
    }
    if let Some(since) = filter.updated_since {
        out.push(format!("updated_at >= {}", b.bind(mapper::timestamp(dialect, since))));
    }

    if let Some(text) = filter.search_text() {
        match search {
            SearchMode::Fts => {
                if let Some(query) = fts_query(text) {
                    out.push(format!(
                        "id IN (SELECT rowid FROM {FTS_TABLE} WHERE {FTS_TABLE} MATCH {})",
                        b.bind(SqlValue::Text(query))
                    ));
                }
            }
            SearchMode::Like => {
                let (op, escape) = match dialect {
                    Dialect::Postgres => ("ILIKE", ""),
                    _ => ("LIKE", " ESCAPE '\\'"),
                };
                let title = b.bind(SqlValue::Text(like_pattern(text)));
                let description = b.bind(SqlValue::Text(like_pattern(text)));
                out.push(format!(
                    "(title {op} {title}{escape} OR description {op} {description}{escape})"
                ));
            }
            SearchMode::FullText => {
                if let Some(query) = boolean_mode_query(text) {
                    out.push(format!(
                        "MATCH(title, description) AGAINST ({} IN BOOLEAN MODE)",
                        b.bind(SqlValue::Text(query))
                    ));
                }
            }
        }
    }
    out
}

fn where_sql(conds: &[String]) -> String {
    if conds.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conds.join(" AND "))
    }
}

fn order_sql(pagination: &PaginationOptions) -> String {
    let dir = match pagination.sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let column = match pagination.sort_by {
        SortField::UpdatedAt => "updated_at",
        SortField::CreatedAt => "created_at",
        SortField::Id => return format!(" ORDER BY id {dir}"),
        SortField::Title => "title",
        SortField::Status => "status",
        SortField::Priority => {
            "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 WHEN 'critical' THEN 3 ELSE 1 END"
        }
    };
    format!(" ORDER BY {column} {dir}, id {dir}")
}

/// One page of entries.
pub fn select_page(
    dialect: Dialect,
    filter: &DevlogFilter,
    pagination: &PaginationOptions,
    search: SearchMode,
) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let conds = conditions(&mut b, filter, search);
    let limit = b.bind(SqlValue::Int(i64::from(pagination.limit)));
    let offset = b.bind(SqlValue::Int(i64::try_from(pagination.offset()).unwrap_or(i64::MAX)));
    let sql = format!(
        "SELECT {COLUMNS} FROM {TABLE}{}{} LIMIT {limit} OFFSET {offset}",
        where_sql(&conds),
        order_sql(pagination)
    );
    (sql, b.into_params())
}

/// Every matching entry, unpaginated, oldest update first.
pub fn select_all(dialect: Dialect, filter: &DevlogFilter, search: SearchMode) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let conds = conditions(&mut b, filter, search);
    let sql = format!(
        "SELECT {COLUMNS} FROM {TABLE}{} ORDER BY updated_at ASC, id ASC",
        where_sql(&conds)
    );
    (sql, b.into_params())
}

pub fn select_by_id(dialect: Dialect, id: i64) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let p = b.bind(SqlValue::Int(id));
    (format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = {p}"), b.into_params())
}

pub fn count(dialect: Dialect, filter: &DevlogFilter, search: SearchMode) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let conds = conditions(&mut b, filter, search);
    let sql = format!("SELECT COUNT(*) AS total FROM {TABLE}{}", where_sql(&conds));
    (sql, b.into_params())
}

/// `bucket, n` rows grouped by `column`.
pub fn group_counts(
    dialect: Dialect,
    filter: &DevlogFilter,
    search: SearchMode,
    column: &str,
) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let conds = conditions(&mut b, filter, search);
    let sql = format!(
        "SELECT {column} AS bucket, COUNT(*) AS n FROM {TABLE}{} GROUP BY {column}",
        where_sql(&conds)
    );
    (sql, b.into_params())
}

pub fn average_completion(dialect: Dialect, filter: &DevlogFilter, search: SearchMode) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let mut conds = conditions(&mut b, filter, search);
    conds.push("status = 'done'".to_string());
    conds.push("closed_at IS NOT NULL".to_string());
    let expr = match dialect {
        Dialect::Sqlite => "AVG((julianday(closed_at) - julianday(created_at)) * 24.0)",
        Dialect::Postgres => "CAST(AVG(EXTRACT(EPOCH FROM (closed_at - created_at)) / 3600.0) AS DOUBLE PRECISION)",
        Dialect::Mysql => "CAST(AVG(TIMESTAMPDIFF(MICROSECOND, created_at, closed_at)) / 3600000000.0 AS DOUBLE)",
    };
    let sql = format!("SELECT {expr} AS avg_hours FROM {TABLE}{}", where_sql(&conds));
    (sql, b.into_params())
}

pub fn next_id() -> String {
    format!("SELECT COALESCE(MAX(id), 0) + 1 AS next_id FROM {TABLE}")
}

pub fn snapshot(dialect: Dialect) -> String {
    format!(
        "SELECT id, updated_at FROM {TABLE} WHERE archived = {}",
        dialect.bool_literal(false)
    )
}

pub fn exists(dialect: Dialect, id: i64) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let p = b.bind(SqlValue::Int(id));
    (format!("SELECT id, updated_at FROM {TABLE} WHERE id = {p}"), b.into_params())
}

/// INSERT of `values`, optionally with an explicit id.
pub fn insert(dialect: Dialect, id: Option<i64>, values: Vec<(&'static str, SqlValue)>) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let mut columns = Vec::with_capacity(values.len() + 1);
    let mut placeholders = Vec::with_capacity(values.len() + 1);
    if let Some(id) = id {
        columns.push("id");
        placeholders.push(b.bind(SqlValue::Int(id)));
    }
    for (column, value) in values {
        columns.push(column);
        placeholders.push(b.bind(value));
    }
    let returning = if dialect == Dialect::Postgres { " RETURNING id" } else { "" };
    let sql = format!(
        "INSERT INTO {TABLE} ({}) VALUES ({}){returning}",
        columns.join(", "),
        placeholders.join(", ")
    );
    (sql, b.into_params())
}

pub fn update(dialect: Dialect, id: i64, values: Vec<(&'static str, SqlValue)>) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let sets: Vec<String> = values
        .into_iter()
        .map(|(column, value)| format!("{} = {}", column, b.bind(value)))
        .collect();
    let p = b.bind(SqlValue::Int(id));
    let sql = format!("UPDATE {TABLE} SET {} WHERE id = {p}", sets.join(", "));
    (sql, b.into_params())
}

/// Soft delete: archive and bump `updated_at`.
pub fn archive(dialect: Dialect, id: i64, now: chrono::DateTime<chrono::Utc>) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let archived = b.bind(mapper::boolean(dialect, true));
    let updated = b.bind(mapper::timestamp(dialect, now));
    let p = b.bind(SqlValue::Int(id));
    let sql = format!("UPDATE {TABLE} SET archived = {archived}, updated_at = {updated} WHERE id = {p}");
    (sql, b.into_params())
}

/// Re-aligns the PostgreSQL id sequence after an explicit-id insert.
pub fn sync_sequence() -> String {
    format!(
        "SELECT setval(pg_get_serial_sequence('{TABLE}', 'id'), (SELECT COALESCE(MAX(id), 1) FROM {TABLE})) AS id"
    )
}

/// Daily series computed in the database.
///
/// A day table (recursive CTE or `generate_series`) is left-joined to every
/// non-archived entry created on or before the day; each metric is a
/// conditional count over that join. Mirrors `query::compute_time_series`.
pub fn time_series(dialect: Dialect, range: DateRange) -> (String, Vec<SqlValue>) {
    let mut b = SqlBuilder::new(dialect);
    let from = b.bind(SqlValue::Text(range.from.to_string()));
    let to = b.bind(SqlValue::Text(range.to.to_string()));

    let (days_cte, day_text) = match dialect {
        Dialect::Sqlite => (
            format!(
                "WITH RECURSIVE days(day) AS (SELECT date({from}) UNION ALL \
                 SELECT date(day, '+1 day') FROM days WHERE day < date({to}))"
            ),
            "d.day".to_string(),
        ),
        Dialect::Postgres => (
            format!(
                "WITH days AS (SELECT generate_series({from}::date, {to}::date, interval '1 day')::date AS day)"
            ),
            "to_char(d.day, 'YYYY-MM-DD')".to_string(),
        ),
        Dialect::Mysql => (
            format!(
                "WITH RECURSIVE days(day) AS (SELECT CAST({from} AS DATE) UNION ALL \
                 SELECT DATE_ADD(day, INTERVAL 1 DAY) FROM days WHERE day < CAST({to} AS DATE))"
            ),
            "DATE_FORMAT(d.day, '%Y-%m-%d')".to_string(),
        ),
    };

    let created_day = dialect.day_of("e.created_at");
    let closed_day = dialect.day_of("COALESCE(e.closed_at, e.updated_at)");
    let closed_by_day = format!("{closed_day} <= d.day");
    let count_when = |cond: &str| format!("COUNT(CASE WHEN {cond} THEN 1 END)");

    let mut metrics = vec![
        "COUNT(e.id) AS total_created".to_string(),
        format!("{} AS total_completed", count_when(&format!("e.status = 'done' AND {closed_by_day}"))),
        format!(
            "{} AS total_closed",
            count_when(&format!("e.status IN ('done', 'cancelled') AND {closed_by_day}"))
        ),
        format!("{} AS daily_created", count_when(&format!("{created_day} = d.day"))),
        format!(
            "{} AS daily_completed",
            count_when(&format!("e.status = 'done' AND {closed_day} = d.day"))
        ),
    ];
    for status in DevlogStatus::ALL {
        let cond = if status.is_closed() {
            format!("e.status = '{}' AND {closed_by_day}", status.as_str())
        } else {
            format!("e.status = '{}'", status.as_str())
        };
        metrics.push(format!("{} AS {}", count_when(&cond), status_column(status)));
    }

    let sql = format!(
        "{days_cte} SELECT {day_text} AS bucket_date, {} FROM days d \
         LEFT JOIN {TABLE} e ON e.archived = {} AND {created_day} <= d.day \
         GROUP BY d.day ORDER BY d.day",
        metrics.join(", "),
        dialect.bool_literal(false)
    );
    (sql, b.into_params())
}

pub fn status_column(status: DevlogStatus) -> &'static str {
    match status {
        DevlogStatus::New => "status_new",
        DevlogStatus::InProgress => "status_in_progress",
        DevlogStatus::Blocked => "status_blocked",
        DevlogStatus::InReview => "status_in_review",
        DevlogStatus::Testing => "status_testing",
        DevlogStatus::Done => "status_done",
        DevlogStatus::Cancelled => "status_cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DevlogType;

    #[test]
    fn postgres_placeholders_are_numbered_in_bind_order() {
        let filter = DevlogFilter::default()
            .with_status(DevlogStatus::New)
            .with_status(DevlogStatus::Blocked)
            .with_type(DevlogType::Bugfix);
        let (sql, params) = select_page(
            Dialect::Postgres,
            &filter,
            &PaginationOptions::default(),
            SearchMode::Like,
        );
        assert!(sql.contains("archived = $1"));
        assert!(sql.contains("status IN ($2, $3)"));
        assert!(sql.contains("entry_type IN ($4)"));
        assert!(sql.ends_with("LIMIT $5 OFFSET $6"));
        assert_eq!(params.len(), 6);
        assert_eq!(params[4], SqlValue::Int(100));
        assert_eq!(params[5], SqlValue::Int(0));
    }

    #[test]
    fn default_order_is_updated_desc_with_id_tiebreak() {
        let (sql, _) = select_page(
            Dialect::Sqlite,
            &DevlogFilter::default(),
            &PaginationOptions::default(),
            SearchMode::Like,
        );
        assert!(sql.contains("ORDER BY updated_at DESC, id DESC"));
    }

    #[test]
    fn search_modes() {
        let filter = DevlogFilter::default().with_search("login bug");
        let (sql, params) = count(Dialect::Sqlite, &filter, SearchMode::Fts);
        assert!(sql.contains("devlog_entries_fts MATCH ?"));
        assert_eq!(params[1], SqlValue::Text("\"login\"* \"bug\"*".into()));

        let (sql, params) = count(Dialect::Postgres, &filter, SearchMode::Like);
        assert!(sql.contains("title ILIKE $2"));
        assert_eq!(params[1], SqlValue::Text("%login bug%".into()));

        let (sql, params) = count(Dialect::Mysql, &filter, SearchMode::FullText);
        assert!(sql.contains("AGAINST (? IN BOOLEAN MODE)"));
        assert_eq!(params[1], SqlValue::Text("+login* +bug*".into()));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }

    #[test]
    fn fts_query_drops_punctuation() {
        assert_eq!(fts_query("\"quoted\" AND-or"), Some("\"quoted\"* \"andor\"*".into()));
        assert_eq!(fts_query("!!!"), None);
    }

    #[test]
    fn insert_returning_only_on_postgres() {
        let values = vec![("title", SqlValue::text("x"))];
        let (pg, _) = insert(Dialect::Postgres, None, values.clone());
        assert!(pg.ends_with("RETURNING id"));
        let (my, params) = insert(Dialect::Mysql, Some(5), values);
        assert!(my.starts_with("INSERT INTO devlog_entries (id, title) VALUES (?, ?)"));
        assert_eq!(params[0], SqlValue::Int(5));
    }

    #[test]
    fn time_series_binds_range_once() {
        let range = DateRange {
            from: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            to: chrono::NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        };
        for dialect in [Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql] {
            let (sql, params) = time_series(dialect, range);
            assert_eq!(params.len(), 2);
            assert!(sql.contains("status_cancelled"));
            assert!(sql.contains("LEFT JOIN devlog_entries e"));
        }
    }
}
