use serde::{Deserialize, Serialize};

/// User object which gets returned by `login()`, `signup()` and `me()`.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    /// When the account was created, as sent by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Subscription tier of a user's plan.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    ProTrial,
    Pro,
    Business,
    /// A tier this client doesn't know about yet.
    #[serde(other)]
    Unknown,
}

impl PlanTier {
    pub fn is_trial(self) -> bool {
        matches!(self, PlanTier::ProTrial)
    }

    pub fn is_paid(self) -> bool {
        matches!(self, PlanTier::Pro | PlanTier::Business)
    }
}

/// Plan object which gets returned by `plan()`.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlan {
    pub tier: PlanTier,
    /// Feature keys the plan unlocks.
    #[serde(default)]
    pub features: Vec<String>,
    /// How many codes the user may keep.
    pub max_codes: u32,
    /// Only set while on a trial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_days_remaining: Option<u32>,
}

impl UserPlan {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Everything the rest of the application sees of the session.
///
/// `token` alone decides whether a session is active; `user` and `plan` can be
/// missing for a moment while they load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub token: Option<String>,
    pub user: Option<AuthUser>,
    pub plan: Option<UserPlan>,
    /// True until the stored session has been restored (or found missing).
    pub is_loading: bool,
    /// True while a `login()` or `signup()` call is in flight.
    pub is_authenticating: bool,
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Drops token, user and plan, keeping the busy flags.
    pub(crate) fn clear_session(&mut self) {
        self.token = None;
        self.user = None;
        self.plan = None;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            token: None,
            user: None,
            plan: None,
            is_loading: true,
            is_authenticating: false,
        }
    }
}
