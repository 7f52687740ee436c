//! PostgreSQL DDL for a registry.
//!
//! The migration never creates tables on its own; operators render this DDL
//! with `supportdesk-migrate schema`, review it and apply it before the first
//! run.

use super::{find, ColumnKind, ColumnSpec, EntityTypeSpec};

/// Quotes an identifier for PostgreSQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL type used for a column kind.
pub fn sql_type(kind: &ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text | ColumnKind::Enum { .. } => "TEXT",
        ColumnKind::Integer => "BIGINT",
        ColumnKind::Float => "DOUBLE PRECISION",
        ColumnKind::Boolean => "SMALLINT",
        ColumnKind::Timestamp => "TIMESTAMP",
        // Kept as text so malformed payloads stay visible to verification.
        ColumnKind::Json => "TEXT",
    }
}

fn column_definition(spec: &EntityTypeSpec, column: &ColumnSpec, specs: &[EntityTypeSpec]) -> String {
    let mut def = format!(
        "    {} {}",
        quote_ident(column.column_name()),
        sql_type(&column.kind)
    );

    if column.column_name() == spec.primary_key {
        def.push_str(" PRIMARY KEY");
    }

    if let Some(reference) = &column.references {
        let table = find(specs, &reference.entity)
            .map(|s| s.target_table.as_str())
            .unwrap_or(reference.entity.as_str());
        def.push_str(&format!(
            " REFERENCES {}({})",
            quote_ident(table),
            quote_ident(&reference.column)
        ));
    }

    def
}

/// `CREATE TABLE` statement for one entity type.
pub fn create_table(spec: &EntityTypeSpec, specs: &[EntityTypeSpec]) -> String {
    let columns: Vec<String> = spec
        .columns
        .iter()
        .map(|c| column_definition(spec, c, specs))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        quote_ident(&spec.target_table),
        columns.join(",\n")
    )
}

/// DDL for every spec, in the order given (pass a dependency order so
/// referenced tables are created first).
pub fn schema_script(ordered: &[EntityTypeSpec]) -> String {
    ordered
        .iter()
        .map(|spec| create_table(spec, ordered))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::helpdesk;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("accountId"), "\"accountId\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_create_table_tickets() {
        let specs = helpdesk();
        let tickets = find(&specs, "tickets").unwrap();
        let sql = create_table(tickets, &specs);

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tickets\""));
        assert!(sql.contains("\"id\" TEXT PRIMARY KEY"));
        assert!(sql.contains("\"accountId\" TEXT REFERENCES \"accounts\"(\"id\")"));
        assert!(sql.contains("\"isEscalated\" SMALLINT"));
        assert!(sql.contains("\"createdAt\" TIMESTAMP"));
    }

    #[test]
    fn test_reference_uses_target_table_name() {
        let specs = helpdesk();
        let feedback = find(&specs, "feedbackEntries").unwrap();
        let sql = create_table(feedback, &specs);
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"feedback_entries\""));
        assert!(sql.contains("REFERENCES \"tickets\"(\"id\")"));
    }
}
