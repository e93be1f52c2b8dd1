use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub logo_url: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub links: Json<ProjectLinks>,
    pub blockchain: Json<ChainInfo>,
    pub enabled_modules: Json<EnabledModules>,
    pub team: Json<Vec<TeamMember>>,
    pub roadmap: Json<Vec<RoadmapItem>>,
    pub status: ProjectStatus,
    pub is_public: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Published,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Published => "published",
            ProjectStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectLinks {
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
    pub discord: Option<String>,
    pub github: Option<String>,
    pub medium: Option<String>,
}

impl ProjectLinks {
    pub fn entries(&self) -> [(&'static str, Option<&str>); 6] {
        [
            ("website", self.website.as_deref()),
            ("twitter", self.twitter.as_deref()),
            ("telegram", self.telegram.as_deref()),
            ("discord", self.discord.as_deref()),
            ("github", self.github.as_deref()),
            ("medium", self.medium.as_deref()),
        ]
    }
}

/// On-chain identity of the project's token, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainInfo {
    pub network: Option<String>,
    pub contract_address: Option<String>,
    pub token_symbol: Option<String>,
    pub token_name: Option<String>,
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnabledModules {
    pub documents: bool,
    pub roadmap: bool,
    pub team: bool,
    pub tokenomics: bool,
    pub voting: bool,
    pub chat: bool,
}

impl Default for EnabledModules {
    fn default() -> Self {
        Self {
            documents: true,
            roadmap: true,
            team: true,
            tokenomics: false,
            voting: false,
            chat: false,
        }
    }
}

impl EnabledModules {
    pub fn flags(&self) -> [(&'static str, bool); 6] {
        [
            ("documents", self.documents),
            ("roadmap", self.roadmap),
            ("team", self.team),
            ("tokenomics", self.tokenomics),
            ("voting", self.voting),
            ("chat", self.chat),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Admin,
    Editor,
    Viewer,
}

impl TeamRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TeamRole::Admin => "admin",
            TeamRole::Editor => "editor",
            TeamRole::Viewer => "viewer",
        }
    }

    pub fn can_edit(self) -> bool {
        matches!(self, TeamRole::Admin | TeamRole::Editor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: Uuid,
    pub role: TeamRole,
    #[serde(default)]
    pub title: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadmapItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    #[serde(default = "RoadmapStatus::default_planned")]
    pub status: RoadmapStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadmapStatus {
    Planned,
    InProgress,
    Completed,
}

impl RoadmapStatus {
    fn default_planned() -> Self {
        RoadmapStatus::Planned
    }
}

impl Project {
    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn member(&self, user_id: Uuid) -> Option<&TeamMember> {
        self.team.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.is_owner(user_id) || self.member(user_id).is_some()
    }

    /// Owner, or a team admin/editor.
    pub fn can_edit(&self, user_id: Uuid) -> bool {
        self.is_owner(user_id) || self.member(user_id).is_some_and(|m| m.role.can_edit())
    }

    /// Owner, or a team admin. Gates publishing, modules and team changes.
    pub fn can_manage(&self, user_id: Uuid) -> bool {
        self.is_owner(user_id) || self.member(user_id).is_some_and(|m| m.role == TeamRole::Admin)
    }

    pub fn can_view(&self, viewer: Option<Uuid>) -> bool {
        if self.is_public {
            return true;
        }
        viewer.is_some_and(|id| self.is_member(id))
    }

    /// Strip sections whose module is disabled, unless the viewer belongs to the project.
    pub fn redacted_for(mut self, viewer: Option<Uuid>) -> Self {
        if viewer.is_some_and(|id| self.is_member(id)) {
            return self;
        }
        if !self.enabled_modules.team {
            self.team = Json(Vec::new());
        }
        if !self.enabled_modules.roadmap {
            self.roadmap = Json(Vec::new());
        }
        self
    }
}
