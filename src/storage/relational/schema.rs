//! DDL per dialect. Every statement is idempotent so `initialize()` can run
//! on every start.

use super::engine::Dialect;

pub const TABLE: &str = "devlog_entries";
pub const FTS_TABLE: &str = "devlog_entries_fts";

pub fn statements(dialect: Dialect) -> Vec<String> {
    match dialect {
        Dialect::Sqlite => sqlite(),
        Dialect::Postgres => postgres(),
        Dialect::Mysql => mysql(),
    }
}

fn indexes() -> Vec<String> {
    [
        ("status", "status"),
        ("type", "entry_type"),
        ("priority", "priority"),
        ("updated_at", "updated_at"),
        ("archived", "archived"),
    ]
    .iter()
    .map(|(name, column)| {
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{name} ON {table}({column})",
            table = TABLE,
            name = name,
            column = column
        )
    })
    .collect()
}

fn sqlite() -> Vec<String> {
    let mut stmts = vec![format!(
        "CREATE TABLE IF NOT EXISTS {TABLE} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_key TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            entry_type TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'new',
            priority TEXT NOT NULL DEFAULT 'medium',
            assignee TEXT,
            archived INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            closed_at TEXT,
            files TEXT NOT NULL DEFAULT '[]',
            related_devlogs TEXT NOT NULL DEFAULT '[]',
            context TEXT NOT NULL DEFAULT '{{}}',
            ai_context TEXT NOT NULL DEFAULT '{{}}',
            notes TEXT NOT NULL DEFAULT '[]',
            external_references TEXT NOT NULL DEFAULT '[]'
        )"
    )];
    stmts.extend(indexes());
    stmts
}

/// SQLite FTS5 external-content index plus the triggers keeping it in step.
/// Applied best-effort; search falls back to LIKE without it.
pub fn sqlite_fts() -> Vec<String> {
    vec![
        format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {FTS_TABLE} USING fts5(
                title, description, content='{TABLE}', content_rowid='id'
            )"
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {TABLE}_fts_insert AFTER INSERT ON {TABLE} BEGIN
                INSERT INTO {FTS_TABLE}(rowid, title, description)
                VALUES (new.id, new.title, new.description);
            END"
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {TABLE}_fts_delete AFTER DELETE ON {TABLE} BEGIN
                INSERT INTO {FTS_TABLE}({FTS_TABLE}, rowid, title, description)
                VALUES ('delete', old.id, old.title, old.description);
            END"
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {TABLE}_fts_update AFTER UPDATE ON {TABLE} BEGIN
                INSERT INTO {FTS_TABLE}({FTS_TABLE}, rowid, title, description)
                VALUES ('delete', old.id, old.title, old.description);
                INSERT INTO {FTS_TABLE}(rowid, title, description)
                VALUES (new.id, new.title, new.description);
            END"
        ),
    ]
}

pub fn sqlite_fts_rebuild() -> String {
    format!("INSERT INTO {FTS_TABLE}({FTS_TABLE}) VALUES ('rebuild')")
}

fn postgres() -> Vec<String> {
    let mut stmts = vec![format!(
        "CREATE TABLE IF NOT EXISTS {TABLE} (
            id BIGSERIAL PRIMARY KEY,
            entry_key VARCHAR(255) NOT NULL UNIQUE,
            title TEXT NOT NULL,
            entry_type VARCHAR(32) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status VARCHAR(32) NOT NULL DEFAULT 'new',
            priority VARCHAR(32) NOT NULL DEFAULT 'medium',
            assignee TEXT,
            archived BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            closed_at TIMESTAMPTZ,
            files JSONB NOT NULL DEFAULT '[]'::jsonb,
            related_devlogs JSONB NOT NULL DEFAULT '[]'::jsonb,
            context JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            ai_context JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            notes JSONB NOT NULL DEFAULT '[]'::jsonb,
            external_references JSONB NOT NULL DEFAULT '[]'::jsonb
        )"
    )];
    stmts.extend(indexes());
    stmts
}

// MySQL has no CREATE INDEX IF NOT EXISTS, so indexes live in the table
// definition.
fn mysql() -> Vec<String> {
    vec![format!(
        "CREATE TABLE IF NOT EXISTS {TABLE} (
            id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
            entry_key VARCHAR(255) NOT NULL,
            title VARCHAR(500) NOT NULL,
            entry_type VARCHAR(32) NOT NULL,
            description TEXT NOT NULL,
            status VARCHAR(32) NOT NULL DEFAULT 'new',
            priority VARCHAR(32) NOT NULL DEFAULT 'medium',
            assignee VARCHAR(255) NULL,
            archived BOOLEAN NOT NULL DEFAULT FALSE,
            created_at DATETIME(3) NOT NULL,
            updated_at DATETIME(3) NOT NULL,
            closed_at DATETIME(3) NULL,
            files JSON NOT NULL,
            related_devlogs JSON NOT NULL,
            context JSON NOT NULL,
            ai_context JSON NOT NULL,
            notes JSON NOT NULL,
            external_references JSON NOT NULL,
            UNIQUE KEY uq_{TABLE}_key (entry_key),
            KEY idx_{TABLE}_status (status),
            KEY idx_{TABLE}_type (entry_type),
            KEY idx_{TABLE}_priority (priority),
            KEY idx_{TABLE}_updated_at (updated_at),
            FULLTEXT KEY ft_{TABLE}_text (title, description)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_statement_is_idempotent() {
        for dialect in [Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql] {
            for stmt in statements(dialect) {
                assert!(stmt.contains("IF NOT EXISTS"), "{:?}: {}", dialect, stmt);
            }
        }
        for stmt in sqlite_fts() {
            assert!(stmt.contains("IF NOT EXISTS"));
        }
    }

    #[test]
    fn json_columns_use_native_types_off_sqlite() {
        let pg = statements(Dialect::Postgres).join("\n");
        assert!(pg.contains("notes JSONB"));
        let my = statements(Dialect::Mysql).join("\n");
        assert!(my.contains("notes JSON NOT NULL"));
        let lite = statements(Dialect::Sqlite).join("\n");
        assert!(lite.contains("notes TEXT"));
        assert!(lite.contains("DEFAULT '{}'"));
    }
}
