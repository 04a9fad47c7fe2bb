//! Provisioning states and outcomes

use atrium_core::{OrgId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// States of the account provisioning machine
///
/// ```text
/// NewAccount → {InvitedProvisioning, SelfProvisioning} → Provisioned
///                                     SelfProvisioning → Failed
/// ```
///
/// `Failed` is terminal and reachable only from the self-signup branch;
/// a failed invited branch falls back to self-provisioning instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    NewAccount,
    InvitedProvisioning,
    SelfProvisioning,
    Provisioned,
    Failed,
}

/// Which path established the account's context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Attached to the organization that invited the account
    Invited,
    /// A personal organization was created
    SelfSignup,
    /// A retried trigger found the account already provisioned
    AlreadyProvisioned,
}

/// Organizational context established for a new account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedContext {
    /// Organization the account landed in
    pub org_id: OrgId,

    /// The account's first workspace
    pub workspace_id: WorkspaceId,

    /// Which path produced this context
    pub outcome: ProvisionOutcome,
}
