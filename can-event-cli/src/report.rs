//! Report generation
//!
//! Summarizes a run as plain text or JSON: one section with the statistics of every
//! dispatcher and its ports, one with the reception statistics of every message.

use crate::simulation::RunResult;
use crate::state::MessageStats;
use anyhow::Result;
use can_event_dispatcher::DispatcherStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub duration_ms: u64,
    pub dispatchers: Vec<DispatcherReport>,
    pub messages: Vec<MessageStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherReport {
    pub idx: usize,
    pub name: String,
    pub tick_ms: u32,
    pub stats: DispatcherStats,
    /// Timers still existing at the end of the run
    pub timers: usize,
    pub event_sources: usize,
    /// Highest fill level of each port
    pub max_queue_usage: Vec<usize>,
    pub max_queue_usage_bytes: Vec<usize>,
    /// Events rejected by each port
    pub lost_events: Vec<u64>,
}

impl Report {
    pub fn from_run(result: &RunResult, realtime: bool) -> Self {
        let dispatchers = result
            .dispatchers
            .iter()
            .map(|d| DispatcherReport {
                idx: d.idx(),
                name: d.name(),
                tick_ms: d.config().tick_ms,
                stats: d.stats(),
                timers: d.no_timers(),
                event_sources: d.no_event_sources(),
                max_queue_usage: d.ports().iter().map(|p| p.max_usage()).collect(),
                max_queue_usage_bytes: d.ports().iter().map(|p| p.max_usage_bytes()).collect(),
                lost_events: d.ports().iter().map(|p| p.lost_events()).collect(),
            })
            .collect();

        let messages = result.state.lock().messages.values().cloned().collect();

        Self {
            generated_at: Utc::now(),
            mode: if realtime { "realtime" } else { "simulated" }.to_string(),
            duration_ms: result.elapsed_ms,
            dispatchers,
            messages,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_txt(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(78);

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "  CAN Event Dispatcher - Run Report");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "Mode:      {}", self.mode);
        let _ = writeln!(out, "Duration:  {} ms", self.duration_ms);

        let _ = writeln!(out, "\nDISPATCHERS");
        let _ = writeln!(
            out,
            "{:<4} {:<12} {:>6} {:>8} {:>10} {:>8} {:>8} {:>7} {:>10} {:>6}",
            "Idx",
            "Name",
            "Tick",
            "Ticks",
            "Events",
            "Inits",
            "Timers",
            "Unknown",
            "Max queue",
            "Lost"
        );
        for d in &self.dispatchers {
            let _ = writeln!(
                out,
                "{:<4} {:<12} {:>4}ms {:>8} {:>10} {:>8} {:>8} {:>7} {:>10} {:>6}",
                d.idx,
                d.name,
                d.tick_ms,
                d.stats.ticks,
                d.stats.events_dispatched,
                d.stats.sources_initialized,
                d.stats.timers_fired,
                d.stats.unknown_source_events + d.stats.misrouted_events,
                join(&d.max_queue_usage),
                join(&d.lost_events),
            );
        }

        let _ = writeln!(out, "\nMESSAGES");
        let _ = writeln!(
            out,
            "{:<16} {:>10} {:>4} {:>8} {:>8} {:>8} {:>8} {:>10} {:<8}",
            "Name",
            "CAN ID",
            "Disp",
            "Sent",
            "Lost",
            "Received",
            "Timeouts",
            "Recoveries",
            "State"
        );
        for m in &self.messages {
            let _ = writeln!(
                out,
                "{:<16} {:>10} {:>4} {:>8} {:>8} {:>8} {:>8} {:>10} {:<8}",
                m.name,
                format!("0x{:X}", m.can_id),
                m.dispatcher,
                m.sent,
                m.lost,
                m.received,
                m.timeouts,
                m.recoveries,
                if m.in_timeout { "TIMEOUT" } else { "ok" },
            );
        }

        let in_timeout = self.messages.iter().filter(|m| m.in_timeout).count();
        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(
            out,
            "{} message(s), {} in timeout at the end of the run",
            self.messages.len(),
            in_timeout
        );
        out
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}
