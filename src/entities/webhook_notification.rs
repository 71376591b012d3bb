use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every signature-verified gateway notification, kept for audit and replay
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Gateway-side notification id, when the payload carries one
    #[sea_orm(nullable)]
    pub notification_id: Option<String>,
    pub topic: String,
    pub gateway_payment_id: String,
    #[sea_orm(nullable)]
    pub request_id: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub payload: Json,
    pub processed: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
