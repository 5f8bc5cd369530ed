//! Print ticket handler with handler-managed retry and operator escalation.
//!
//! ```text
//! PrintTicketJob(retry_count = n)
//!     │
//!     ├─ order/customer missing ──▶ log, stop
//!     │
//!     ├─ print ok ──▶ print duplicate (if asked, failures only logged)
//!     │
//!     └─ print failed
//!          ├─ n < max ──▶ alert "will retry" + schedule copy (n + 1) after interval
//!          └─ n = max ──▶ alert "retries exhausted", stop
//! ```
//!
//! The handler never returns an error for printer or lookup failures, so
//! the framework does not retry on top of the chain above.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::jobs::PrintTicketJob;
use super::notifications::{notify_print_failure, PrintFailureNotice};
use super::retry::{decide_next_action, NextAction};
use super::ticket::TicketContent;
use crate::domains::orders::models::{Customer, Order};
use crate::kernel::jobs::{JobHandler, JobQueueExt, JobRegistry, RegistryError};
use crate::kernel::printer::PrintError;
use crate::kernel::ServerDeps;

/// Register the print job handler.
pub fn register_printing_jobs(
    registry: &mut JobRegistry,
    deps: Arc<ServerDeps>,
) -> Result<(), RegistryError> {
    registry.register::<PrintTicketJob, _>(PrintTicketHandler::new(deps))
}

pub struct PrintTicketHandler {
    deps: Arc<ServerDeps>,
}

impl PrintTicketHandler {
    pub fn new(deps: Arc<ServerDeps>) -> Self {
        Self { deps }
    }

    async fn load(&self, job: &PrintTicketJob) -> Option<(Order, Customer)> {
        let order = match self.deps.orders.find_order(job.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_id = job.order_id, "order not found, ticket not printed");
                return None;
            }
            Err(e) => {
                error!(order_id = job.order_id, error = %e, "failed to load order for printing");
                return None;
            }
        };

        match self.deps.orders.find_customer(order.customer_id).await {
            Ok(Some(customer)) => Some((order, customer)),
            Ok(None) => {
                warn!(
                    order_id = job.order_id,
                    customer_id = order.customer_id,
                    "customer not found, ticket not printed"
                );
                None
            }
            Err(e) => {
                error!(order_id = job.order_id, error = %e, "failed to load customer for printing");
                None
            }
        }
    }

    async fn handle_failure(
        &self,
        job: &PrintTicketJob,
        order: &Order,
        customer: &Customer,
        print_error: &PrintError,
    ) {
        let settings = &self.deps.settings;
        let max_retries = settings.print_retry_count().await;
        let interval = settings.print_retry_interval().await;
        let action = decide_next_action(job.retry_count, max_retries, interval);

        let notice = PrintFailureNotice {
            order_id: order.id,
            folio: order.folio.clone(),
            customer_name: customer.name.clone(),
            printer_name: job.printer_name.clone(),
            attempt: job.retry_count + 1,
            error: print_error.to_string(),
            retry_in: match action {
                NextAction::Retry { delay, .. } => Some(delay),
                NextAction::GiveUp => None,
            },
        };

        let alert_retries = settings.message_retry_count().await;
        if let Err(e) = notify_print_failure(
            self.deps.staff.as_ref(),
            self.deps.jobs.as_ref(),
            &notice,
            alert_retries,
        )
        .await
        {
            error!(order_id = order.id, error = %e, "failed to queue print failure alert");
        }

        match action {
            NextAction::Retry { retry_count, delay } => {
                let next = job.next_attempt(retry_count);
                match self.deps.jobs.schedule_job(&next, delay).await {
                    Ok(result) => info!(
                        order_id = order.id,
                        printer = %job.printer_name,
                        retry_count,
                        delay_secs = delay.as_secs(),
                        handle = %result.handle(),
                        "print retry scheduled"
                    ),
                    Err(e) => error!(order_id = order.id, error = %e, "failed to schedule print retry"),
                }
            }
            NextAction::GiveUp => {
                error!(
                    order_id = order.id,
                    printer = %job.printer_name,
                    attempts = job.retry_count + 1,
                    "print retries exhausted"
                );
            }
        }
    }
}

#[async_trait]
impl JobHandler<PrintTicketJob> for PrintTicketHandler {
    async fn execute(&self, job: PrintTicketJob, _cancel: CancellationToken) -> Result<()> {
        let Some((order, customer)) = self.load(&job).await else {
            return Ok(());
        };

        let content = TicketContent::new(&order, &customer);
        let printer = &self.deps.printer;

        if let Err(e) = printer.print_ticket(&job.printer_name, &content.build(false)).await {
            warn!(
                order_id = order.id,
                printer = %job.printer_name,
                retry_count = job.retry_count,
                error = %e,
                "print failed"
            );
            self.handle_failure(&job, &order, &customer, &e).await;
            return Ok(());
        }

        info!(order_id = order.id, folio = %order.folio, printer = %job.printer_name, "ticket printed");

        if job.print_duplicate {
            if let Err(e) = printer.print_ticket(&job.printer_name, &content.build(true)).await {
                warn!(order_id = order.id, printer = %job.printer_name, error = %e, "duplicate ticket not printed");
            }
        }

        Ok(())
    }
}
