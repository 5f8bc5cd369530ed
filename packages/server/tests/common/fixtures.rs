//! Payloads and records shared by integration tests.

use chrono::Utc;
use orderdesk_core::domains::orders::{Customer, Order, OrderLine};
use serde_json::json;

pub const APP_SECRET: &str = "test-app-secret";
pub const VERIFY_TOKEN: &str = "test-verify-token";
pub const CUSTOMER_PHONE: &str = "5215550001";

/// A WhatsApp delivery carrying one text message.
pub fn text_delivery(message_id: &str, body: &str) -> String {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "waba-1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "contacts": [{ "wa_id": CUSTOMER_PHONE, "profile": { "name": "Ana" } }],
                    "messages": [{
                        "id": message_id,
                        "from": CUSTOMER_PHONE,
                        "timestamp": "1767225600",
                        "type": "text",
                        "text": { "body": body }
                    }]
                }
            }]
        }]
    })
    .to_string()
}

/// A delivery with only a status update (no messages).
pub fn status_delivery() -> String {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "changes": [{
                "field": "messages",
                "value": { "statuses": [{ "id": "wamid.out", "status": "delivered" }] }
            }]
        }]
    })
    .to_string()
}

pub fn order_with_customer(order_id: i64) -> (Order, Customer) {
    let order = Order {
        id: order_id,
        folio: format!("A-{:04}", order_id),
        customer_id: 7,
        notes: Some("Sin cebolla".into()),
        total: 150.0,
        created_at: Utc::now(),
        lines: vec![OrderLine {
            quantity: 2,
            description: "Tacos al pastor".into(),
            unit_price: 75.0,
        }],
    };
    let customer = Customer {
        id: 7,
        name: "Ana".into(),
        phone: CUSTOMER_PHONE.into(),
        address: Some("Calle 5 #12".into()),
    };
    (order, customer)
}
