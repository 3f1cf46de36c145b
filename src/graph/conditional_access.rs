//! Conditional Access policy retrieval via Microsoft Graph API
//!
//! Only the user-scope part of each policy is modelled; the other conditions
//! are not needed to decide who a policy targets.

use crate::error::Result;
use crate::graph::GraphClient;
use serde::{Deserialize, Serialize};

pub const POLICIES_ENDPOINT: &str = "identity/conditionalAccess/policies";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyState {
    Enabled,
    Disabled,
    EnabledForReportingButNotEnforced,
    #[serde(other)]
    Unknown,
}

impl PolicyState {
    pub fn label(&self) -> &'static str {
        match self {
            PolicyState::Enabled => "enabled",
            PolicyState::Disabled => "disabled",
            PolicyState::EnabledForReportingButNotEnforced => "report-only",
            PolicyState::Unknown => "unknown",
        }
    }
}

/// Conditional Access Policy structure for typed responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalAccessPolicy {
    pub id: String,
    pub display_name: String,
    pub state: PolicyState,
    #[serde(default)]
    pub conditions: Option<PolicyConditions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConditions {
    #[serde(default)]
    pub users: Option<UserCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCondition {
    #[serde(default)]
    pub include_users: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_users: Option<Vec<String>>,
    #[serde(default)]
    pub include_groups: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_groups: Option<Vec<String>>,
    #[serde(default)]
    pub include_roles: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_roles: Option<Vec<String>>,
}

impl ConditionalAccessPolicy {
    pub fn user_condition(&self) -> Option<&UserCondition> {
        self.conditions.as_ref().and_then(|c| c.users.as_ref())
    }

    /// Whether the policy takes part in the matrix for the given mode
    pub fn is_evaluated(&self, include_report_only: bool) -> bool {
        match self.state {
            PolicyState::Enabled => true,
            PolicyState::EnabledForReportingButNotEnforced => include_report_only,
            PolicyState::Disabled | PolicyState::Unknown => false,
        }
    }
}

/// List all CA policies as typed structs
pub async fn list_all_policies(client: &GraphClient) -> Result<Vec<ConditionalAccessPolicy>> {
    client.get_all_pages(POLICIES_ENDPOINT).await
}

/// List the policies to evaluate: enabled ones, plus report-only when asked
pub async fn list_policies(
    client: &GraphClient,
    include_report_only: bool,
) -> Result<Vec<ConditionalAccessPolicy>> {
    let all = list_all_policies(client).await?;
    let total = all.len();

    let selected: Vec<_> = all
        .into_iter()
        .filter(|p| p.is_evaluated(include_report_only))
        .collect();

    tracing::debug!(
        "{} of {} policies selected (include_report_only={})",
        selected.len(),
        total,
        include_report_only
    );

    Ok(selected)
}
