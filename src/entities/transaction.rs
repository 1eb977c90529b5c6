//! Transaction entity - income and expense records, including recurring templates.
//!
//! `amount` is always a positive magnitude in minor units; the sign comes from
//! `transaction_type`. A recurring transaction carries its interval and the
//! bookkeeping the recurrence engine needs (`next_recurring_date`, `last_processed`).
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a transaction
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TransactionType {
    /// Money in
    #[sea_orm(string_value = "INCOME")]
    Income,
    /// Money out
    #[sea_orm(string_value = "EXPENSE")]
    Expense,
}

/// Settlement status; only `Completed` transactions recur
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TransactionStatus {
    /// Not yet settled
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Settled
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Rejected or reversed
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

/// Repeat cadence of a recurring transaction
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum RecurringInterval {
    /// Every day
    #[sea_orm(string_value = "DAILY")]
    Daily,
    /// Every seven days
    #[sea_orm(string_value = "WEEKLY")]
    Weekly,
    /// Same day every calendar month
    #[sea_orm(string_value = "MONTHLY")]
    Monthly,
    /// Same date every calendar year
    #[sea_orm(string_value = "YEARLY")]
    Yearly,
}

/// Transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Account whose balance this transaction affects
    pub account_id: i64,
    /// `INCOME` or `EXPENSE`
    pub transaction_type: TransactionType,
    /// Positive magnitude in minor units (cents)
    pub amount: i64,
    /// When the transaction occurred
    pub date: DateTimeUtc,
    /// Free-text description
    pub description: String,
    /// Key into the category table (e.g. `"groceries"`)
    pub category: String,
    /// Settlement status
    pub status: TransactionStatus,
    /// Whether this row is a recurring template
    pub is_recurring: bool,
    /// Cadence; `Some` exactly when `is_recurring`
    pub recurring_interval: Option<RecurringInterval>,
    /// Next occurrence; `None` when not recurring
    pub next_recurring_date: Option<DateTimeUtc>,
    /// When the last occurrence was materialized
    pub last_processed: Option<DateTimeUtc>,
    /// When the row was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
    /// Each transaction belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
