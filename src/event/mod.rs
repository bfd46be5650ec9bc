//! Event payloads and the bus envelope.

mod envelope;
mod payload;

pub use envelope::{
    Envelope, ENVELOPE_VERSION, HEADER_EVENT_SOURCE, HEADER_EVENT_TYPE, HEADER_EVENT_VERSION,
};
pub use payload::{
    CampaignData, Channel, EventFamily, EventPayload, InventoryData, LineItem, OrderData,
    PayloadError, PurchaseOrderData,
};
