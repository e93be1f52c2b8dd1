use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// One append-only audit record for a project mutation.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ChangeHistory {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub change_type: ChangeType,
    pub field: Option<String>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub description: Option<String>,
    #[serde(serialize_with = "serialize_masked_ip")]
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Publish,
    StatusChange,
    ModuleToggle,
    TeamAdd,
    TeamUpdate,
    TeamRemove,
    DocumentUpload,
    DocumentUpdate,
    DocumentDelete,
}

/// Per-type aggregate over a project's history.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct HistoryStat {
    pub change_type: ChangeType,
    pub count: i64,
    pub last_change_at: DateTime<Utc>,
}

/// Keep only the last octet (IPv4) or group (IPv6).
pub fn mask_ip(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => format!("***.***.***.{}", v4.octets()[3]),
        Ok(IpAddr::V6(v6)) => {
            let last = v6.segments()[7];
            format!("****:****:****:****:****:****:****:{last:x}")
        }
        Err(_) => "***".to_string(),
    }
}

fn serialize_masked_ip<S: Serializer>(ip: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match ip {
        Some(ip) => s.serialize_str(&mask_ip(ip)),
        None => s.serialize_none(),
    }
}
