//! Status snapshot reporting

use std::io::Write;

use mk_core::TunnelStatus;

/// Receives a snapshot after every reconciliation tick
pub trait Reporter: Send {
    fn report(&mut self, status: &TunnelStatus);
}

/// Writes each distinct snapshot to `W`, skipping consecutive repeats
pub struct WriterReporter<W> {
    writer: W,
    last: Option<TunnelStatus>,
}

impl<W: Write + Send> WriterReporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, last: None }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Reporter for WriterReporter<W> {
    fn report(&mut self, status: &TunnelStatus) {
        if self.last.as_ref() == Some(status) {
            return;
        }

        if let Err(e) = write!(self.writer, "{}", status).and_then(|_| self.writer.flush()) {
            tracing::warn!("Failed to write tunnel status: {}", e);
        }
        self.last = Some(status.clone());
    }
}
