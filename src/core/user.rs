//! User business logic - maps the identity provider's opaque id to a local user row.
//!
//! Every owner-scoped operation starts by resolving the current user here; an absent id
//! is an authorization failure and is never retried.

use crate::{
    entities::{User, user},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};

/// Registers a user the first time the identity provider presents them.
pub async fn create_user(
    db: &DatabaseConnection,
    external_id: String,
    email: String,
    name: String,
) -> Result<user::Model> {
    if external_id.trim().is_empty() {
        return Err(Error::Validation {
            message: "External user id cannot be empty".to_string(),
        });
    }

    if !email.contains('@') {
        return Err(Error::Validation {
            message: format!("Invalid email address: {email}"),
        });
    }

    let user = user::ActiveModel {
        external_id: Set(external_id),
        email: Set(email),
        name: Set(name),
        last_monthly_alert_sent: Set(None),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };

    Ok(user.insert(db).await?)
}

/// Resolves the "current user" supplied by the identity provider.
///
/// `None` means the caller is not authenticated.
pub async fn resolve_user(
    db: &DatabaseConnection,
    external_id: Option<&str>,
) -> Result<user::Model> {
    let external_id = external_id.ok_or(Error::Unauthorized)?;

    User::find()
        .filter(user::Column::ExternalId.eq(external_id))
        .one(db)
        .await?
        .ok_or_else(|| Error::UserNotFound {
            id: external_id.to_string(),
        })
}

/// Looks up a user by primary key.
pub async fn get_user_by_id<C>(db: &C, user_id: i64) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id).one(db).await.map_err(Into::into)
}

/// All users, oldest first. Used by the monthly report job.
pub async fn get_all_users(db: &DatabaseConnection) -> Result<Vec<user::Model>> {
    User::find()
        .order_by_asc(user::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
