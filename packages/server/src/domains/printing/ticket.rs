//! Kitchen/counter ticket layout.

use serde::{Deserialize, Serialize};

use crate::domains::orders::models::{Customer, Order};

/// Characters per line on the 80mm printers at the default font.
pub const TICKET_WIDTH: usize = 42;

/// A rendered ticket, ready for the printer transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub folio: String,
    pub is_duplicate: bool,
    pub lines: Vec<String>,
}

impl Ticket {
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Builds ticket text from an order and its customer.
pub struct TicketContent<'a> {
    order: &'a Order,
    customer: &'a Customer,
}

impl<'a> TicketContent<'a> {
    pub fn new(order: &'a Order, customer: &'a Customer) -> Self {
        Self { order, customer }
    }

    pub fn build(&self, is_duplicate: bool) -> Ticket {
        let rule = "-".repeat(TICKET_WIDTH);
        let mut lines = Vec::with_capacity(self.order.lines.len() + 12);

        if is_duplicate {
            lines.push(center("*** COPIA ***"));
        }
        lines.push(center(&format!("PEDIDO {}", self.order.folio)));
        lines.push(self.order.created_at.format("%Y-%m-%d %H:%M").to_string());
        lines.push(rule.clone());
        lines.push(format!("Cliente: {}", self.customer.name));
        lines.push(format!("Tel: {}", self.customer.phone));
        if let Some(address) = self.customer.address.as_deref().filter(|a| !a.is_empty()) {
            lines.push(format!("Dir: {}", address));
        }
        lines.push(rule.clone());

        for line in &self.order.lines {
            let left = format!("{} x {}", line.quantity, line.description);
            lines.push(two_columns(&left, &format!("{:.2}", line.subtotal())));
        }

        lines.push(rule);
        lines.push(two_columns("TOTAL", &format!("{:.2}", self.order.total)));

        if let Some(notes) = self.order.notes.as_deref().filter(|n| !n.is_empty()) {
            lines.push(String::new());
            lines.push(format!("Notas: {}", notes));
        }

        Ticket {
            folio: self.order.folio.clone(),
            is_duplicate,
            lines,
        }
    }
}

fn center(text: &str) -> String {
    let len = text.chars().count();
    if len >= TICKET_WIDTH {
        return text.to_string();
    }
    format!("{}{}", " ".repeat((TICKET_WIDTH - len) / 2), text)
}

fn two_columns(left: &str, right: &str) -> String {
    let right_len = right.chars().count();
    let max_left = TICKET_WIDTH.saturating_sub(right_len + 1);
    let left: String = left.chars().take(max_left).collect();
    let pad = TICKET_WIDTH.saturating_sub(left.chars().count() + right_len);
    format!("{}{}{}", left, " ".repeat(pad.max(1)), right)
}
