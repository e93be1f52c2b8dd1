pub mod change_history;
pub mod documents;
pub mod password_reset_tokens;
pub mod projects;
pub mod refresh_tokens;
pub mod users;

/// `page` is 1-based; `per_page` is clamped to 1..=100.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: i64,
    pub per_page: i64,
}

impl Page {
    pub const DEFAULT_PER_PAGE: i64 = 20;
    pub const MAX_PER_PAGE: i64 = 100;

    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(Self::DEFAULT_PER_PAGE)
                .clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        (total + self.per_page - 1) / self.per_page
    }
}

/// JSON containment pattern matching a team entry for `user_id`.
pub(crate) fn team_member_pattern(user_id: uuid::Uuid) -> serde_json::Value {
    serde_json::json!([{ "user_id": user_id }])
}
