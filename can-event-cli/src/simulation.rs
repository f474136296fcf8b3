//! Simulated CAN integration
//!
//! Builds a dispatcher system from a scenario and feeds it with the frames of the
//! configured messages. Two modes exist: the simulated mode steps all dispatchers in one
//! thread on a virtual millisecond clock, so that its results are reproducible; the
//! realtime mode runs every dispatcher in a thread of its own, paced by the wall clock.

use crate::callbacks::{self, DiagnosticsLink};
use crate::config::{MessageConfig, ScenarioConfig};
use crate::state::{shared_state, MessageStats, SharedState};
use anyhow::{Context, Result};
use can_event_dispatcher::frame::MAX_DATA_LEN;
use can_event_dispatcher::{event_port, CanFrame, Dispatcher, DispatcherSystem, EventSenderPort};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DIAGNOSTICS_PORT_CAPACITY: usize = 16;
const MAX_FRAME_PAYLOAD: usize = 6 + MAX_DATA_LEN;

pub struct Simulation {
    config: ScenarioConfig,
    system: DispatcherSystem,
    can_ports: Vec<EventSenderPort>,
    state: SharedState,
}

/// What is left after a run: the dispatchers with their statistics and the reception
/// state of all messages
pub struct RunResult {
    pub dispatchers: Vec<Dispatcher>,
    pub state: SharedState,
    pub elapsed_ms: u64,
}

impl Simulation {
    /// Create the dispatcher system and register all event sources
    pub fn build(config: &ScenarioConfig) -> Result<Self> {
        let state = shared_state();
        {
            let mut state = state.lock();
            for msg in &config.messages {
                state.messages.insert(
                    msg.can_id,
                    MessageStats {
                        name: msg.name.clone(),
                        can_id: msg.can_id,
                        dispatcher: msg.dispatcher,
                        ..Default::default()
                    },
                );
            }
        }

        let mut system = DispatcherSystem::new(config.system.clone())
            .context("Failed to create the dispatcher system")?;

        let mut can_ports = Vec::new();
        let mut diagnostics = Vec::new();
        for (idx, entry) in config.dispatchers.iter().enumerate() {
            let (can_tx, can_rx) = event_port(entry.port_capacity, MAX_FRAME_PAYLOAD);
            let (diag_tx, diag_rx) = event_port(DIAGNOSTICS_PORT_CAPACITY, 4);
            system
                .create_dispatcher(idx, entry.dispatcher.clone(), vec![can_rx, diag_rx])
                .with_context(|| format!("Failed to create dispatcher {}", idx))?;

            let idx_source = callbacks::register_diagnostics(
                &mut system,
                idx,
                entry.status_period_ms,
                Arc::clone(&state),
            )
            .with_context(|| format!("Failed to register diagnostics of dispatcher {}", idx))?;

            can_ports.push(can_tx);
            diagnostics.push(DiagnosticsLink {
                port: diag_tx,
                idx_source,
            });
        }

        for msg in &config.messages {
            callbacks::register_message(
                &mut system,
                msg,
                Arc::clone(&state),
                Some(diagnostics[msg.dispatcher].clone()),
            )
            .with_context(|| format!("Failed to register message {}", msg.name))?;
        }

        let (no_ext, no_int) = system.no_event_sources();
        log::info!(
            "Dispatcher system ready: {} dispatcher(s), {} external and {} internal event sources",
            system.no_dispatchers(),
            no_ext,
            no_int
        );

        Ok(Self {
            config: config.clone(),
            system,
            can_ports,
            state,
        })
    }

    /// Run in the mode selected by the scenario
    pub fn run(self) -> Result<RunResult> {
        let result = if self.config.run.realtime {
            self.run_realtime()?
        } else {
            self.run_simulated()?
        };
        log::info!(
            "Run finished after {} ms, {} message(s) in timeout",
            result.elapsed_ms,
            result.state.lock().no_messages_in_timeout()
        );
        Ok(result)
    }

    /// Step all dispatchers on a virtual clock in a single thread
    pub fn run_simulated(mut self) -> Result<RunResult> {
        let duration = self.config.run.duration_ms;
        log::info!("Simulating {} ms", duration);

        for t_ms in 0..=duration {
            self.transmit(t_ms);
            for (idx, entry) in self.config.dispatchers.iter().enumerate() {
                let tick = u64::from(entry.dispatcher.tick_ms);
                if t_ms > 0 && t_ms % tick == 0 {
                    self.system.dispatcher_main(idx)?;
                }
            }
        }

        Ok(RunResult {
            dispatchers: self.system.take_all_dispatchers(),
            state: self.state,
            elapsed_ms: duration,
        })
    }

    /// Run every dispatcher in a thread of its own for the configured wall clock time
    pub fn run_realtime(mut self) -> Result<RunResult> {
        let duration = self.config.run.duration_ms;
        log::info!("Running {} ms in real time", duration);

        let stop = Arc::new(AtomicBool::new(false));
        let workers: Vec<_> = self
            .system
            .take_all_dispatchers()
            .into_iter()
            .map(|dispatcher| {
                let stop = Arc::clone(&stop);
                thread::spawn(move || run_dispatcher_thread(dispatcher, &stop))
            })
            .collect();

        let start = Instant::now();
        let mut t_ms = 0;
        while t_ms <= duration {
            self.transmit(t_ms);
            t_ms += 1;
            let next = start + Duration::from_millis(t_ms);
            if let Some(wait) = next.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
        stop.store(true, Ordering::Relaxed);

        let mut dispatchers = Vec::new();
        for worker in workers {
            let dispatcher = worker
                .join()
                .map_err(|_| anyhow::anyhow!("A dispatcher thread panicked"))?;
            dispatchers.push(dispatcher);
        }

        Ok(RunResult {
            dispatchers,
            state: self.state,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Post the frames of all messages, which are due at the given time
    fn transmit(&self, t_ms: u64) {
        for msg in &self.config.messages {
            if !msg.is_sent_at(t_ms) {
                continue;
            }

            let mut state = self.state.lock();
            let Some(stats) = state.message_mut(msg.can_id) else {
                continue;
            };
            stats.sent += 1;

            let port = &self.can_ports[msg.dispatcher];
            let result = build_frame(msg, stats.sent)
                .encode()
                .and_then(|payload| port.post_external(msg.can_id, 0, &payload));
            if let Err(e) = result {
                stats.lost += 1;
                log::debug!("[{:>6} ms] frame of {} lost: {}", t_ms, msg.name, e);
            }
        }
    }
}

/// The frame content is the little endian sequence counter, cut to the DLC
fn build_frame(msg: &MessageConfig, counter: u64) -> CanFrame {
    let data: Vec<u8> = counter
        .to_le_bytes()
        .iter()
        .copied()
        .chain(std::iter::repeat(0))
        .take(msg.dlc)
        .collect();
    CanFrame::new(msg.can_id, data)
}

fn run_dispatcher_thread(mut dispatcher: Dispatcher, stop: &AtomicBool) -> Dispatcher {
    let tick = Duration::from_millis(u64::from(dispatcher.config().tick_ms));
    let start = Instant::now();
    let mut next = start;
    log::debug!("Dispatcher {} thread started", dispatcher.name());

    while !stop.load(Ordering::Relaxed) {
        next += tick;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
        dispatcher.dispatcher_main();
    }

    log::debug!(
        "Dispatcher {} thread stopped after {} ticks",
        dispatcher.name(),
        dispatcher.tick()
    );
    dispatcher
}
