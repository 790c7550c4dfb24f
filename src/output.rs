use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DeleteSummary, HomeView, ProgressEvent, ProgressSink};
use crate::consolidate::ReportSummary;
use crate::master::MasterUpdate;
use crate::reconcile::{InputSession, SubmitReceipt};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_home(view: &HomeView) -> io::Result<()> {
        Self::print_json(view)
    }

    pub fn print_session(session: &InputSession) -> io::Result<()> {
        Self::print_json(session)
    }

    pub fn print_receipt(receipt: &SubmitReceipt) -> io::Result<()> {
        Self::print_json(receipt)
    }

    pub fn print_master_update(update: &MasterUpdate) -> io::Result<()> {
        Self::print_json(update)
    }

    pub fn print_delete(summary: &DeleteSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_report(summary: &ReportSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Quiet sink for callers that only want the final JSON.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards admin-command progress to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}
