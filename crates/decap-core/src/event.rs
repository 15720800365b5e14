//! Build events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BuildId;

/// A request to build one ref of one project.
///
/// Created per trigger. The orchestrator assigns `id` at launch time and the
/// deferral queue stamps `deferred_at` when the event loses the lock race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    /// GitHub account owner or Bitbucket project key.
    pub team: String,
    /// Repository basename.
    pub project: String,
    /// Branch or tag to build.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Build ID, unset until the event is launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<BuildId>,
    /// When the event was put on the deferral queue, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred_at: Option<DateTime<Utc>>,
}

impl BuildEvent {
    pub fn new(
        team: impl Into<String>,
        project: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            team: team.into(),
            project: project.into(),
            git_ref: git_ref.into(),
            id: None,
            deferred_at: None,
        }
    }

    /// `team/project`, the key the project catalog is addressed by.
    pub fn project_key(&self) -> String {
        format!("{}/{}", self.team, self.project)
    }

    /// `team/project/ref`, the identity used for locking and deferral dedup.
    pub fn lock_name(&self) -> String {
        format!("{}/{}/{}", self.team, self.project, self.git_ref)
    }
}
