//! Operator alerts for failed prints.

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::domains::messaging::jobs::SendMessageJob;
use crate::domains::messaging::models::OutboundMessage;
use crate::domains::orders::models::StaffRole;
use crate::kernel::jobs::{JobQueue, JobQueueExt};
use crate::kernel::BaseStaffDirectory;

/// Roles that get paged about printer trouble.
pub const ALERT_ROLES: [StaffRole; 2] = [StaffRole::Admin, StaffRole::Supervisor];

/// Everything an operator needs to act, taken from data already loaded by
/// the print handler.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintFailureNotice {
    pub order_id: i64,
    pub folio: String,
    pub customer_name: String,
    pub printer_name: String,
    /// 1-based attempt that just failed.
    pub attempt: u32,
    pub error: String,
    /// Set when another attempt is scheduled.
    pub retry_in: Option<Duration>,
}

impl PrintFailureNotice {
    pub fn is_final(&self) -> bool {
        self.retry_in.is_none()
    }

    pub fn message_text(&self) -> String {
        let header = format!(
            "⚠️ No se pudo imprimir el pedido {} ({}) en la impresora \"{}\".\nIntento {}: {}",
            self.folio, self.customer_name, self.printer_name, self.attempt, self.error
        );
        match self.retry_in {
            Some(delay) => format!(
                "{}\nSe reintentará en {} segundos.",
                header,
                delay.as_secs()
            ),
            None => format!(
                "{}\nSe agotaron los reintentos. Se requiere intervención manual.",
                header
            ),
        }
    }
}

/// Fan out a notice to every active admin and supervisor with a phone.
///
/// Each recipient gets its own `SendMessage` job, retried by the framework
/// up to `max_retries` times. A recipient whose job cannot be queued is
/// logged and skipped. Returns how many jobs were queued.
pub async fn notify_print_failure(
    staff: &dyn BaseStaffDirectory,
    jobs: &dyn JobQueue,
    notice: &PrintFailureNotice,
    max_retries: u32,
) -> Result<usize> {
    let recipients = staff.active_with_roles(&ALERT_ROLES).await?;
    let text = notice.message_text();
    let mut queued = 0;

    for member in &recipients {
        let Some(phone) = member.contact_phone() else {
            warn!(staff = %member.name, "staff member has no phone for print alerts");
            continue;
        };

        let job = SendMessageJob::new(
            alert_key(notice, phone),
            phone,
            OutboundMessage::text(text.clone()),
        )
        .with_max_retries(max_retries);

        match jobs.enqueue_job(&job).await {
            Ok(_) => queued += 1,
            Err(e) => error!(
                order_id = notice.order_id,
                printer = %notice.printer_name,
                staff = %member.name,
                error = %e,
                "failed to queue print alert"
            ),
        }
    }

    info!(
        order_id = notice.order_id,
        printer = %notice.printer_name,
        attempt = notice.attempt,
        is_final = notice.is_final(),
        recipients = queued,
        "print failure alert queued"
    );
    Ok(queued)
}

fn alert_key(notice: &PrintFailureNotice, phone: &str) -> String {
    format!(
        "print-alert:{}:{}:{}:{}",
        notice.order_id, notice.printer_name, notice.attempt, phone
    )
}
