use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Quick-reply button shown under an interactive message (max 3 per message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

/// Row of an interactive list message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

pub(crate) fn text_body(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

pub(crate) fn buttons_body(
    to: &str,
    body: &str,
    buttons: &[ReplyButton],
    header: Option<&str>,
    footer: Option<&str>,
) -> Value {
    let buttons: Vec<Value> = buttons
        .iter()
        .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
        .collect();

    let mut interactive = json!({
        "type": "button",
        "body": { "text": body },
        "action": { "buttons": buttons },
    });
    decorate(&mut interactive, header, footer);

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "interactive",
        "interactive": interactive,
    })
}

pub(crate) fn list_body(
    to: &str,
    body: &str,
    button_label: &str,
    rows: &[ListRow],
    header: Option<&str>,
    footer: Option<&str>,
) -> Value {
    let mut interactive = json!({
        "type": "list",
        "body": { "text": body },
        "action": {
            "button": button_label,
            "sections": [{ "title": button_label, "rows": rows }],
        },
    });
    decorate(&mut interactive, header, footer);

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "interactive",
        "interactive": interactive,
    })
}

pub(crate) fn read_receipt_body(message_id: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id,
    })
}

fn decorate(interactive: &mut Value, header: Option<&str>, footer: Option<&str>) {
    if let Some(header) = header {
        interactive["header"] = json!({ "type": "text", "text": header });
    }
    if let Some(footer) = footer {
        interactive["footer"] = json!({ "text": footer });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buttons_body_includes_optional_header_and_footer() {
        let buttons = vec![ReplyButton {
            id: "confirm".into(),
            title: "Confirmar".into(),
        }];
        let body = buttons_body("5215550001", "Pedido listo?", &buttons, Some("Hola"), None);

        assert_eq!(body["interactive"]["header"]["text"], "Hola");
        assert!(body["interactive"].get("footer").is_none());
        assert_eq!(
            body["interactive"]["action"]["buttons"][0]["reply"]["id"],
            "confirm"
        );
    }

    #[test]
    fn list_rows_skip_missing_descriptions() {
        let rows = vec![ListRow {
            id: "tacos".into(),
            title: "Tacos".into(),
            description: None,
        }];
        let body = list_body("5215550001", "Menu", "Ver menu", &rows, None, Some("Gracias"));
        let row = &body["interactive"]["action"]["sections"][0]["rows"][0];

        assert_eq!(row["title"], "Tacos");
        assert!(row.get("description").is_none());
        assert_eq!(body["interactive"]["footer"]["text"], "Gracias");
    }
}
