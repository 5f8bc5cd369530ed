//! Network receipt printer transport.
//!
//! One short-lived TCP connection per ticket (raw port 9100). Connect and
//! write each run under an explicit timeout so a powered-off printer cannot
//! stall a worker.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::traits::BasePrinter;
use crate::domains::printing::ticket::Ticket;

pub const DEFAULT_PRINTER_TIMEOUT: Duration = Duration::from_secs(5);

const ESC_INIT: &[u8] = &[0x1b, 0x40];
const FEED_AND_CUT: &[u8] = &[0x1b, 0x64, 0x04, 0x1d, 0x56, 0x42, 0x00];

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("unknown printer: {0}")]
    UnknownPrinter(String),

    #[error("timed out connecting to printer {printer}")]
    ConnectTimeout { printer: String },

    #[error("could not connect to printer {printer}: {source}")]
    Connect {
        printer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out writing to printer {printer}")]
    WriteTimeout { printer: String },

    #[error("write to printer {printer} failed: {source}")]
    Write {
        printer: String,
        #[source]
        source: std::io::Error,
    },
}

/// Prints tickets over raw TCP to printers addressed by name.
pub struct TcpTicketPrinter {
    printers: HashMap<String, String>,
    timeout: Duration,
}

impl TcpTicketPrinter {
    /// `printers` maps a printer name to a `host:port` address.
    pub fn new(printers: HashMap<String, String>, timeout: Duration) -> Self {
        Self { printers, timeout }
    }

    pub fn printer_names(&self) -> impl Iterator<Item = &str> {
        self.printers.keys().map(String::as_str)
    }
}

/// ESC/POS framing around the ticket text. Non-ASCII characters are
/// replaced since the printers run code page 437.
pub fn encode_ticket(ticket: &Ticket) -> Vec<u8> {
    let text = ticket.render();
    let mut bytes = Vec::with_capacity(text.len() + ESC_INIT.len() + FEED_AND_CUT.len());
    bytes.extend_from_slice(ESC_INIT);
    bytes.extend(text.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }));
    bytes.extend_from_slice(FEED_AND_CUT);
    bytes
}

#[async_trait]
impl BasePrinter for TcpTicketPrinter {
    async fn print_ticket(&self, printer_name: &str, ticket: &Ticket) -> Result<(), PrintError> {
        let address = self
            .printers
            .get(printer_name)
            .ok_or_else(|| PrintError::UnknownPrinter(printer_name.to_string()))?;

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(address.as_str()))
            .await
            .map_err(|_| PrintError::ConnectTimeout {
                printer: printer_name.to_string(),
            })?
            .map_err(|source| PrintError::Connect {
                printer: printer_name.to_string(),
                source,
            })?;

        let payload = encode_ticket(ticket);
        let write = async {
            stream.write_all(&payload).await?;
            stream.flush().await?;
            stream.shutdown().await
        };

        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| PrintError::WriteTimeout {
                printer: printer_name.to_string(),
            })?
            .map_err(|source| PrintError::Write {
                printer: printer_name.to_string(),
                source,
            })?;

        debug!(
            printer = printer_name,
            folio = %ticket.folio,
            bytes = payload.len(),
            "ticket sent to printer"
        );
        Ok(())
    }
}
