//! The `Dialect` capability: everything component code needs to know about
//! a backend's SQL surface without ever spelling out a literal placeholder
//! or type name itself.

/// Column types a dialect must be able to render. `Vector(dims)` is only
/// meaningful for a dialect that reports [`Dialect::supports_native_vector`].
#[derive(Debug, Clone, Copy)]
pub enum ColumnType {
    Text,
    Blob,
    Integer,
    Timestamp,
    Vector(usize),
}

pub trait Dialect: Send + Sync {
    /// Renders the `n`th (1-indexed) bind placeholder.
    fn placeholder(&self, n: usize) -> String;

    /// Renders all placeholders for a statement with `count` parameters,
    /// comma-joined.
    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn autoincrement_primary_key(&self) -> &'static str;

    fn column_type(&self, ty: ColumnType) -> String;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn supports_native_vector(&self) -> bool;

    /// `INSERT ... ON CONFLICT (conflict_columns) DO UPDATE SET
    /// update_columns = excluded.update_columns`, rendered in the
    /// dialect's own upsert syntax.
    fn upsert_template(
        &self,
        table: &str,
        columns: &[&str],
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String;
}

pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn autoincrement_primary_key(&self) -> &'static str {
        "INTEGER PRIMARY KEY"
    }

    fn column_type(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::Text => "TEXT".into(),
            ColumnType::Blob => "BLOB".into(),
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::Timestamp => "INTEGER".into(),
            // No native vector type: embeddings are stored as a JSON-encoded
            // float array and scored by the exact scanner.
            ColumnType::Vector(_) => "TEXT".into(),
        }
    }

    fn supports_native_vector(&self) -> bool {
        false
    }

    fn upsert_template(
        &self,
        table: &str,
        columns: &[&str],
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String {
        let cols = columns.join(", ");
        let placeholders = self.placeholders(columns.len());
        let conflict = conflict_columns.join(", ");
        let updates = update_columns
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        if update_columns.is_empty() {
            format!("INSERT OR IGNORE INTO {table} ({cols}) VALUES ({placeholders})")
        } else {
            format!(
                "INSERT INTO {table} ({cols}) VALUES ({placeholders}) \
                 ON CONFLICT ({conflict}) DO UPDATE SET {updates}"
            )
        }
    }
}

pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn autoincrement_primary_key(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }

    fn column_type(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::Text => "TEXT".into(),
            ColumnType::Blob => "BYTEA".into(),
            ColumnType::Integer => "BIGINT".into(),
            ColumnType::Timestamp => "TIMESTAMPTZ".into(),
            ColumnType::Vector(dims) => format!("vector({dims})"),
        }
    }

    fn supports_native_vector(&self) -> bool {
        true
    }

    fn upsert_template(
        &self,
        table: &str,
        columns: &[&str],
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String {
        let cols = columns.join(", ");
        let placeholders = self.placeholders(columns.len());
        let conflict = conflict_columns.join(", ");
        if update_columns.is_empty() {
            format!(
                "INSERT INTO {table} ({cols}) VALUES ({placeholders}) \
                 ON CONFLICT ({conflict}) DO NOTHING"
            )
        } else {
            let updates = update_columns
                .iter()
                .map(|c| format!("{c} = excluded.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO {table} ({cols}) VALUES ({placeholders}) \
                 ON CONFLICT ({conflict}) DO UPDATE SET {updates}"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_placeholders_are_bare_question_marks() {
        let d = SqliteDialect;
        assert_eq!(d.placeholders(3), "?, ?, ?");
    }

    #[test]
    fn postgres_placeholders_are_positional() {
        let d = PostgresDialect;
        assert_eq!(d.placeholders(3), "$1, $2, $3");
    }

    #[test]
    fn only_postgres_supports_native_vector() {
        assert!(!SqliteDialect.supports_native_vector());
        assert!(PostgresDialect.supports_native_vector());
    }

    #[test]
    fn upsert_template_differs_by_dialect() {
        let sqlite_sql = SqliteDialect.upsert_template("embeddings", &["hash", "vec"], &["hash"], &["vec"]);
        assert!(sqlite_sql.contains("ON CONFLICT (hash) DO UPDATE SET vec = excluded.vec"));
        let pg_sql = PostgresDialect.upsert_template("embeddings", &["hash", "vec"], &["hash"], &["vec"]);
        assert!(pg_sql.contains("$1, $2"));
    }
}
