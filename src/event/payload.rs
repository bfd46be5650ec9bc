//! Tagged-variant payload model.
//!
//! `eventType` is the discriminant and each family owns its data schema. A
//! payload is validated when it is enqueued, again before it is published and
//! once more when a consumer decodes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Payload validation error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("unknown event type {0:?}")]
    UnknownEventType(String),

    #[error("payload does not match schema of {event_type}: {reason}")]
    Schema { event_type: String, reason: String },

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Business family an event type belongs to; decides topic and aggregate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Order,
    Campaign,
    Inventory,
    PurchaseOrder,
}

impl EventFamily {
    pub fn aggregate_type(self) -> &'static str {
        match self {
            EventFamily::Order => "order",
            EventFamily::Campaign => "campaign",
            EventFamily::Inventory => "inventory",
            EventFamily::PurchaseOrder => "purchase_order",
        }
    }

    /// Bus topic carrying every event type of the family.
    pub fn topic(self) -> &'static str {
        match self {
            EventFamily::Order => "orders",
            EventFamily::Campaign => "campaigns",
            EventFamily::Inventory => "inventory",
            EventFamily::PurchaseOrder => "purchase-orders",
        }
    }

    /// Family of a raw event type string, by its prefix.
    pub fn of(event_type: &str) -> Option<Self> {
        let (prefix, _) = event_type.split_once('.')?;
        match prefix {
            "order" => Some(EventFamily::Order),
            "campaign" => Some(EventFamily::Campaign),
            "inventory" => Some(EventFamily::Inventory),
            "purchase_order" => Some(EventFamily::PurchaseOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderData {
    pub order_id: String,
    pub customer_id: String,
    pub shop_id: String,
    pub status: String,
    pub total_amount: f64,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Sms,
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CampaignData {
    pub campaign_id: String,
    pub shop_id: String,
    pub channel: Channel,
    pub target_count: u32,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InventoryData {
    pub product_id: String,
    pub shop_id: String,
    pub current_stock: i64,
    pub reorder_point: i64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PurchaseOrderData {
    pub purchase_order_id: String,
    pub vendor_id: String,
    pub shop_id: String,
    pub status: String,
    pub total_amount: f64,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

macro_rules! event_payloads {
    ($( $variant:ident($data:ty) => $tag:literal, )+) => {
        /// Every notification the relay knows how to carry.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "eventType", content = "data")]
        pub enum EventPayload {
            $(
                #[serde(rename = $tag)]
                $variant($data),
            )+
        }

        impl EventPayload {
            /// All registered event type tags.
            pub const EVENT_TYPES: &'static [&'static str] = &[$($tag),+];

            pub fn event_type(&self) -> &'static str {
                match self {
                    $( EventPayload::$variant(_) => $tag, )+
                }
            }
        }
    };
}

event_payloads! {
    OrderCreated(OrderData) => "order.created",
    OrderUpdated(OrderData) => "order.updated",
    OrderCancelled(OrderData) => "order.cancelled",
    OrderCompleted(OrderData) => "order.completed",
    CampaignCreated(CampaignData) => "campaign.created",
    CampaignLaunched(CampaignData) => "campaign.launched",
    CampaignCompleted(CampaignData) => "campaign.completed",
    CampaignFailed(CampaignData) => "campaign.failed",
    InventoryUpdated(InventoryData) => "inventory.updated",
    InventoryLowStock(InventoryData) => "inventory.low_stock",
    InventoryOutOfStock(InventoryData) => "inventory.out_of_stock",
    PurchaseOrderCreated(PurchaseOrderData) => "purchase_order.created",
    PurchaseOrderUpdated(PurchaseOrderData) => "purchase_order.updated",
    PurchaseOrderStatusUpdated(PurchaseOrderData) => "purchase_order.status_updated",
}

impl EventPayload {
    /// Validate untyped data against the schema owned by `event_type`.
    pub fn from_parts(event_type: &str, data: Value) -> Result<Self, PayloadError> {
        if !Self::EVENT_TYPES.contains(&event_type) {
            return Err(PayloadError::UnknownEventType(event_type.to_string()));
        }
        let tagged = serde_json::json!({ "eventType": event_type, "data": data });
        serde_json::from_value(tagged).map_err(|e| PayloadError::Schema {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })
    }

    /// Parse the stored JSON text of an outbox row.
    pub fn from_stored(event_type: &str, stored: &str) -> Result<Self, PayloadError> {
        let data: Value = serde_json::from_str(stored).map_err(|e| PayloadError::Schema {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_parts(event_type, data)
    }

    pub fn family(&self) -> EventFamily {
        match self {
            EventPayload::OrderCreated(_)
            | EventPayload::OrderUpdated(_)
            | EventPayload::OrderCancelled(_)
            | EventPayload::OrderCompleted(_) => EventFamily::Order,
            EventPayload::CampaignCreated(_)
            | EventPayload::CampaignLaunched(_)
            | EventPayload::CampaignCompleted(_)
            | EventPayload::CampaignFailed(_) => EventFamily::Campaign,
            EventPayload::InventoryUpdated(_)
            | EventPayload::InventoryLowStock(_)
            | EventPayload::InventoryOutOfStock(_) => EventFamily::Inventory,
            EventPayload::PurchaseOrderCreated(_)
            | EventPayload::PurchaseOrderUpdated(_)
            | EventPayload::PurchaseOrderStatusUpdated(_) => EventFamily::PurchaseOrder,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.family().topic()
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.family().aggregate_type()
    }

    /// The untagged `data` object.
    pub fn data(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}
