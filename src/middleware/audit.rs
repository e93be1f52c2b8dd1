use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::db::change_history::NewChange;
use crate::middleware::request_meta::RequestMeta;
use crate::models::ChangeType;

/// A single history entry before it is bound to a project and author.
#[derive(Debug, Clone)]
pub struct Change {
    pub change_type: ChangeType,
    pub field: Option<String>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub description: Option<String>,
}

impl Change {
    pub fn new(change_type: ChangeType) -> Self {
        Self {
            change_type,
            field: None,
            old_value: None,
            new_value: None,
            description: None,
        }
    }

    pub fn field(
        change_type: ChangeType,
        field: impl Into<String>,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) -> Self {
        Self {
            change_type,
            field: Some(field.into()),
            old_value: Some(old_value),
            new_value: Some(new_value),
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Append history entries for a project. Called explicitly in handlers after mutations.
///
/// Failures are logged and never surface to the caller.
pub async fn record(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
    meta: &RequestMeta,
    changes: Vec<Change>,
) {
    for change in changes {
        let entry = NewChange {
            project_id,
            user_id,
            change_type: change.change_type,
            field: change.field.as_deref(),
            old_value: change.old_value,
            new_value: change.new_value,
            description: change.description,
            ip_address: meta.ip_address.as_deref(),
            user_agent: meta.user_agent.as_deref(),
        };

        if let Err(e) = db::change_history::insert(pool, &entry).await {
            tracing::error!(
                project_id = %project_id,
                change_type = ?entry.change_type,
                "Failed to record change history: {e}"
            );
        }
    }
}

pub async fn record_one(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
    meta: &RequestMeta,
    change: Change,
) {
    record(pool, project_id, user_id, meta, vec![change]).await;
}
