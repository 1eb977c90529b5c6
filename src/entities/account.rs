//! Account entity - a bank or cash account owned by a single user.
//!
//! The balance is stored in minor currency units and is only ever changed by
//! adding signed deltas (see `core::account::apply_balance_delta`).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of account
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum AccountType {
    /// Everyday checking account
    #[sea_orm(string_value = "CURRENT")]
    Current,
    /// Savings account
    #[sea_orm(string_value = "SAVINGS")]
    Savings,
}

/// Account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Unique identifier for the account
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Human-readable account name
    pub name: String,
    /// `CURRENT` or `SAVINGS`
    pub account_type: AccountType,
    /// Current balance in minor units (cents)
    pub balance: i64,
    /// Whether this is the user's default account; exactly one per user
    pub is_default: bool,
    /// When the account was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each account belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    /// One account has many transactions
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
