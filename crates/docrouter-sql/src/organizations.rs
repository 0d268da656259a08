use chrono::{DateTime, Utc};
use models::{Id, Member, Role};
use sqlx::types::Json;

/// A row of `organizations`. Membership is a JSON array of
/// `{user_id, role}` entries; the invariant that at least one member is an
/// admin is maintained by the (out-of-scope) account service.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Row {
    pub id: Id,
    pub name: String,
    #[sqlx(rename = "type")]
    pub type_: String,
    pub members: Json<Vec<Member>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Row {
    /// The caller's role within this organization, or None for non-members.
    pub fn member_role(&self, user_id: Id) -> Option<Role> {
        self.members
            .iter()
            .find(|m| m.user_id == user_id)
            .map(|m| m.role)
    }
}

pub async fn fetch(pool: &sqlx::PgPool, organization_id: Id) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        r#"
        select id, name, type, members, created_at, updated_at
        from organizations
        where id = $1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(pool)
    .await
}

/// A row of `users`, as consumed by the auth layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Id,
    pub email: String,
    pub name: String,
    pub role: String,
    pub email_verified: bool,
}

impl UserRow {
    pub fn account_role(&self) -> Role {
        if self.role == "admin" {
            Role::Admin
        } else {
            Role::User
        }
    }
}

pub async fn fetch_user(pool: &sqlx::PgPool, user_id: Id) -> sqlx::Result<Option<UserRow>> {
    sqlx::query_as("select id, email, name, role, email_verified from users where id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}
