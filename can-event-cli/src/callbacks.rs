//! Dispatcher callbacks of the simulated integration
//!
//! Every CAN message is an external event source supervised by a single-shot timeout
//! timer, which is retriggered on each reception. Every dispatcher has an internal
//! "diagnostics" event source, which is notified about timeouts and recoveries through
//! internal events and optionally reports the status periodically.

use crate::config::MessageConfig;
use crate::state::SharedState;
use anyhow::Result;
use can_event_dispatcher::{
    user_data, CallbackContext, CanFrame, DispatcherSystem, EventKind, EventSenderPort,
    TimerHandle,
};
use std::sync::Arc;

/// Internal event: a message went into timeout, payload is the CAN ID
pub const EV_MESSAGE_TIMEOUT: u32 = 1;
/// Internal event: a message is received again after a timeout, payload is the CAN ID
pub const EV_MESSAGE_RECOVERED: u32 = 2;

/// Where a message source sends its diagnostic notifications
#[derive(Debug, Clone)]
pub struct DiagnosticsLink {
    pub port: EventSenderPort,
    pub idx_source: usize,
}

impl DiagnosticsLink {
    fn notify(&self, kind: u32, can_id: u32) {
        if let Err(e) = self.port.post_internal(self.idx_source, kind, &can_id.to_le_bytes()) {
            log::warn!("Diagnostic notification for 0x{:X} lost: {}", can_id, e);
        }
    }
}

/// Source data of a supervised message
struct Supervision {
    can_id: u32,
    timeout_ms: u32,
    timer: TimerHandle,
}

/// Register the diagnostics source of a dispatcher
pub fn register_diagnostics(
    system: &mut DispatcherSystem,
    idx_dispatcher: usize,
    status_period_ms: Option<u32>,
    state: SharedState,
) -> Result<usize> {
    let idx = system.register_internal_event_source(
        idx_dispatcher,
        move |ctx| match ctx.kind() {
            EventKind::IntSourceInit => {
                if let Some(period) = status_period_ms {
                    let state = Arc::clone(&state);
                    ctx.create_periodic_timer(period, move |ctx| report_status(ctx, &state), None);
                }
            }
            EventKind::Custom(kind) => {
                let can_id = match <[u8; 4]>::try_from(ctx.event_data()) {
                    Ok(bytes) => u32::from_le_bytes(bytes),
                    Err(_) => {
                        log::warn!("Malformed diagnostic notification of kind {}", kind);
                        return;
                    }
                };
                match kind {
                    EV_MESSAGE_TIMEOUT => {
                        *state
                            .lock()
                            .timeout_notifications
                            .entry(ctx.idx_dispatcher())
                            .or_default() += 1;
                        log::warn!(
                            "[{:>6} ms] dispatcher {}: message 0x{:X} timed out",
                            ctx.now_ms(),
                            ctx.idx_dispatcher(),
                            can_id
                        );
                    }
                    EV_MESSAGE_RECOVERED => log::info!(
                        "[{:>6} ms] dispatcher {}: message 0x{:X} received again",
                        ctx.now_ms(),
                        ctx.idx_dispatcher(),
                        can_id
                    ),
                    _ => log::debug!("Unexpected diagnostic notification {}", kind),
                }
            }
            _ => {}
        },
        None,
    )?;
    Ok(idx)
}

fn report_status(ctx: &mut CallbackContext<'_>, state: &SharedState) {
    let state = state.lock();
    let own: Vec<_> = state
        .messages
        .values()
        .filter(|m| m.dispatcher == ctx.idx_dispatcher())
        .collect();
    let received: u64 = own.iter().map(|m| m.received).sum();
    let in_timeout = own.iter().filter(|m| m.in_timeout).count();
    log::info!(
        "[{:>6} ms] dispatcher {}: {} message(s), {} frames received, {} in timeout",
        ctx.now_ms(),
        ctx.idx_dispatcher(),
        own.len(),
        received,
        in_timeout
    );
}

/// Register a CAN message as external event source, using its CAN ID as sender handle
pub fn register_message(
    system: &mut DispatcherSystem,
    msg: &MessageConfig,
    state: SharedState,
    diagnostics: Option<DiagnosticsLink>,
) -> Result<usize> {
    let supervision = Supervision {
        can_id: msg.can_id,
        timeout_ms: msg.timeout_ms(),
        timer: TimerHandle::INVALID,
    };

    let idx = system.register_external_event_source(
        msg.dispatcher,
        msg.can_id,
        move |ctx| match ctx.kind() {
            EventKind::ExtSourceInit => start_supervision(ctx, &state, &diagnostics),
            EventKind::Custom(_) => on_frame(ctx, &state, diagnostics.as_ref()),
            _ => {}
        },
        user_data(supervision),
    )?;
    log::debug!("Message {} (0x{:X}) is external event source {}", msg.name, msg.can_id, idx);
    Ok(idx)
}

fn start_supervision(
    ctx: &mut CallbackContext<'_>,
    state: &SharedState,
    diagnostics: &Option<DiagnosticsLink>,
) {
    let Some(timeout_ms) = ctx.event_source_data::<Supervision>().map(|s| s.timeout_ms) else {
        return;
    };

    let state = Arc::clone(state);
    let diagnostics = diagnostics.clone();
    let timer = ctx.create_single_shot_timer(
        timeout_ms,
        move |ctx| on_timeout(ctx, &state, diagnostics.as_ref()),
        None,
        false,
    );
    if let Some(supervision) = ctx.event_source_data::<Supervision>() {
        supervision.timer = timer;
    }
}

fn on_timeout(
    ctx: &mut CallbackContext<'_>,
    state: &SharedState,
    diagnostics: Option<&DiagnosticsLink>,
) {
    let Some(can_id) = ctx.event_source_data::<Supervision>().map(|s| s.can_id) else {
        return;
    };

    if let Some(stats) = state.lock().message_mut(can_id) {
        stats.timeouts += 1;
        stats.in_timeout = true;
    }
    if let Some(link) = diagnostics {
        link.notify(EV_MESSAGE_TIMEOUT, can_id);
    }
}

fn on_frame(
    ctx: &mut CallbackContext<'_>,
    state: &SharedState,
    diagnostics: Option<&DiagnosticsLink>,
) {
    let frame = match CanFrame::decode(ctx.event_data()) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Dispatcher {}: {}", ctx.idx_dispatcher(), e);
            return;
        }
    };
    let Some((timer, timeout_ms)) = ctx
        .event_source_data::<Supervision>()
        .map(|s| (s.timer, s.timeout_ms))
    else {
        return;
    };

    let recovered = match state.lock().message_mut(frame.can_id) {
        Some(stats) => {
            stats.received += 1;
            stats.last_data = frame.data;
            let recovered = stats.in_timeout;
            if recovered {
                stats.recoveries += 1;
                stats.in_timeout = false;
            }
            recovered
        }
        None => false,
    };
    if recovered {
        if let Some(link) = diagnostics {
            link.notify(EV_MESSAGE_RECOVERED, frame.can_id);
        }
    }

    if let Err(e) = ctx.retrigger_single_shot_timer(timer, timeout_ms) {
        log::error!("Timeout supervision of 0x{:X} broken: {}", frame.can_id, e);
    }
}
