// Read-only database access with automatic tenant scoping.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use super::traits::{Tool, ToolContext};
use crate::storage::SqlExecutor;
use crate::types::ToolResult;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "merge", "exec", "call",
];

pub struct DatabaseQueryTool {
    executor: Arc<dyn SqlExecutor>,
}

impl DatabaseQueryTool {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }

    /// Permit single read-only statements only.
    fn validate_read_only(sql: &str) -> Result<(), String> {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        if trimmed.is_empty() {
            return Err("sql must not be empty".to_string());
        }
        if trimmed.contains(';') {
            return Err("only a single statement is allowed".to_string());
        }
        let lowered = trimmed.to_lowercase();
        if !(lowered.starts_with("select") || lowered.starts_with("with")) {
            return Err("only SELECT statements are allowed".to_string());
        }
        for keyword in FORBIDDEN_KEYWORDS {
            // Word-boundary check keeps column names like `created_at` legal.
            if lowered
                .split(|c: char| !c.is_alphanumeric() && c != '_')
                .any(|token| token == *keyword)
            {
                return Err(format!("forbidden keyword in statement: {keyword}"));
            }
        }
        Ok(())
    }

    /// Wrap the statement so every row is tenant-scoped regardless of what
    /// the model wrote.
    fn scope_to_tenant(sql: &str, tenant_id: u64) -> String {
        let trimmed = sql.trim().trim_end_matches(';');
        format!("SELECT * FROM ({trimmed}) AS tenant_scoped WHERE tenant_id = {tenant_id}")
    }
}

#[async_trait]
impl Tool for DatabaseQueryTool {
    fn name(&self) -> String {
        "database_query".to_string()
    }

    fn description(&self) -> String {
        "Run a read-only SQL query against the application database. Only \
         single SELECT statements are accepted; results are automatically \
         restricted to the current tenant's rows."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A single SELECT statement. The projected rows must include a tenant_id column."
                }
            },
            "required": ["sql"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let Some(sql) = args["sql"].as_str() else {
            return ToolResult::err("sql is required");
        };

        if let Err(reason) = Self::validate_read_only(sql) {
            warn!(target: "tools", tool = "database_query", reason = %reason, "Rejected statement");
            return ToolResult::err(format!("statement rejected: {reason}"));
        }
        if ctx.tenant_id == 0 {
            return ToolResult::err("missing tenant context");
        }

        let scoped = Self::scope_to_tenant(sql, ctx.tenant_id);
        match self.executor.query(&scoped).await {
            Ok(rows) => {
                let count = rows.as_array().map(|a| a.len()).unwrap_or(0);
                ToolResult::ok(format!(
                    "Query returned {count} row(s):\n{}",
                    serde_json::to_string_pretty(&rows).unwrap_or_default()
                ))
                .with_data(json!({
                    "rows": rows,
                    "count": count,
                    "display_type": "database_query",
                }))
            }
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}
