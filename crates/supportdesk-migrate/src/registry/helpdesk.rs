//! Built-in helpdesk registry.

use super::{ColumnKind, ColumnSpec, EntityTypeSpec};

fn entity(
    name: &str,
    collection: &str,
    table: &str,
    dependencies: &[&str],
    columns: Vec<ColumnSpec>,
) -> EntityTypeSpec {
    EntityTypeSpec {
        name: name.to_string(),
        source_collection: collection.to_string(),
        target_table: table.to_string(),
        primary_key: "id".to_string(),
        order_by: "createdAt".to_string(),
        dependencies: dependencies.iter().map(|d| (*d).to_string()).collect(),
        columns,
    }
}

fn id() -> ColumnSpec {
    ColumnSpec::new("_id", ColumnKind::Text).named("id").required()
}

fn text(source: &str) -> ColumnSpec {
    ColumnSpec::new(source, ColumnKind::Text)
}

fn timestamp(source: &str) -> ColumnSpec {
    ColumnSpec::new(source, ColumnKind::Timestamp)
}

fn json(source: &str) -> ColumnSpec {
    ColumnSpec::new(source, ColumnKind::Json)
}

fn flag(source: &str) -> ColumnSpec {
    ColumnSpec::new(source, ColumnKind::Boolean)
}

fn account_ref(source: &str) -> ColumnSpec {
    text(source).references("accounts", "id")
}

fn ticket_ref(source: &str) -> ColumnSpec {
    text(source).references("tickets", "id")
}

/// The helpdesk schema, declared parents first.
pub fn helpdesk() -> Vec<EntityTypeSpec> {
    vec![
        entity(
            "accounts",
            "users",
            "accounts",
            &[],
            vec![
                id(),
                text("email").required(),
                text("displayName"),
                ColumnSpec::new(
                    "role",
                    ColumnKind::enumeration(&["admin", "agent", "customer"], "customer"),
                ),
                flag("isActive"),
                json("profile"),
                timestamp("lastLoginAt"),
                timestamp("createdAt").required(),
                timestamp("updatedAt"),
            ],
        ),
        entity(
            "tickets",
            "tickets",
            "tickets",
            &["accounts"],
            vec![
                id(),
                account_ref("accountId").required(),
                account_ref("assigneeId"),
                text("subject").required(),
                text("description"),
                ColumnSpec::new(
                    "status",
                    ColumnKind::enumeration(&["open", "in_progress", "resolved", "closed"], "open"),
                ),
                ColumnSpec::new(
                    "priority",
                    ColumnKind::enumeration(&["low", "medium", "high", "urgent"], "medium"),
                ),
                json("tags"),
                flag("isEscalated"),
                timestamp("createdAt").required(),
                timestamp("updatedAt"),
                timestamp("resolvedAt"),
            ],
        ),
        entity(
            "comments",
            "comments",
            "comments",
            &["tickets", "accounts"],
            vec![
                id(),
                ticket_ref("ticketId").required(),
                account_ref("authorId").required(),
                text("body").required(),
                flag("isInternal"),
                json("attachments"),
                timestamp("createdAt").required(),
            ],
        ),
        entity(
            "auditEntries",
            "auditLogs",
            "audit_entries",
            &["accounts", "tickets"],
            vec![
                id(),
                account_ref("actorId"),
                ticket_ref("ticketId"),
                text("action").required(),
                json("changes"),
                json("metadata"),
                timestamp("createdAt").required(),
            ],
        ),
        entity(
            "feedbackEntries",
            "feedback",
            "feedback_entries",
            &["tickets", "accounts"],
            vec![
                id(),
                ticket_ref("ticketId"),
                account_ref("accountId").required(),
                ColumnSpec::new("rating", ColumnKind::Integer),
                ColumnSpec::new(
                    "sentiment",
                    ColumnKind::enumeration(&["positive", "neutral", "negative"], "neutral"),
                ),
                text("comment"),
                timestamp("createdAt").required(),
            ],
        ),
        entity(
            "roleAssignments",
            "roleAssignments",
            "role_assignments",
            &["accounts"],
            vec![
                id(),
                account_ref("accountId").required(),
                ColumnSpec::new(
                    "role",
                    ColumnKind::enumeration(&["admin", "supervisor", "agent", "viewer"], "viewer"),
                )
                .required(),
                json("permissions"),
                account_ref("grantedBy"),
                timestamp("grantedAt"),
                timestamp("createdAt").required(),
            ],
        ),
    ]
}
