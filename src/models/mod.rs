pub mod change_history;
pub mod document;
pub mod password_reset_token;
pub mod project;
pub mod refresh_token;
pub mod user;

pub use change_history::{ChangeHistory, ChangeType, HistoryStat};
pub use document::{Document, DocumentType, is_allowed_mime};
pub use password_reset_token::PasswordResetToken;
pub use project::{
    ChainInfo, EnabledModules, Project, ProjectLinks, ProjectStatus, RoadmapItem, RoadmapStatus,
    TeamMember, TeamRole,
};
pub use refresh_token::RefreshToken;
pub use user::{User, UserSummary};
