use crate::Id;

/// OrganizationType mirrors the billing tier of an organization.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationType {
    Individual,
    Team,
    Enterprise,
}

/// Role of a member within an organization, or of a user within the account.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// One organization membership entry, stored on the organization record.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Member {
    pub user_id: Id,
    pub role: Role,
}

/// The kind of credential a caller presented. Session JWTs act wherever
/// membership allows; an org-scoped token is pinned to its organization;
/// an account-level token cannot act on org-scoped endpoints at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    Session,
    AccountToken,
    OrgToken(Id),
}

/// Principal is the authenticated caller resolved by the auth layer: a
/// user, their account role, and the credential they presented. API
/// handlers never see raw credentials.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Id,
    pub user_name: String,
    pub account_role: Role,
    pub credential: Credential,
}
