//! User entity - the partially-owned identity record.
//!
//! Identity itself lives with an external provider; this table maps the provider's
//! opaque id to a local row and carries the monthly report gate.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Opaque id issued by the identity provider
    #[sea_orm(unique)]
    pub external_id: String,
    /// Address that receives alerts and reports
    pub email: String,
    /// Display name used in notifications
    pub name: String,
    /// When the last monthly report was sent, `None` until the first one
    pub last_monthly_alert_sent: Option<DateTimeUtc>,
    /// When the user row was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One user owns many accounts
    #[sea_orm(has_many = "super::account::Entity")]
    Accounts,
    /// One user owns many transactions
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
    /// One user has at most one budget
    #[sea_orm(has_one = "super::budget::Entity")]
    Budget,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::budget::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Budget.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
