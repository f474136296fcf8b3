//! Two dispatchers in two threads
//!
//! A "CAN ISR" thread posts frames of two messages. Dispatcher 0 (10 ms tick) handles
//! the fast message, dispatcher 1 (50 ms tick) the slow one and a status timer. Each
//! dispatcher runs in a thread of its own.
//!
//! Usage:
//!   RUST_LOG=debug cargo run --example two_dispatchers

use can_event_dispatcher::{
    event_port, user_data, CanFrame, DispatcherConfig, DispatcherSystem, EventKind, SystemConfig,
};
use std::thread;
use std::time::Duration;

const FAST_MSG: u32 = 0x101;
const SLOW_MSG: u32 = 0x3F0;

fn main() {
    env_logger::init();

    let (tx_fast, rx_fast) = event_port(16, 16);
    let (tx_slow, rx_slow) = event_port(16, 16);

    let mut system = DispatcherSystem::new(SystemConfig::new().with_dispatchers(2)).unwrap();
    system
        .create_dispatcher(
            0,
            DispatcherConfig::new().with_tick_ms(10).with_name("fast"),
            vec![rx_fast],
        )
        .unwrap();
    system
        .create_dispatcher(
            1,
            DispatcherConfig::new().with_tick_ms(50).with_name("slow"),
            vec![rx_slow],
        )
        .unwrap();

    system
        .register_external_event_source(
            0,
            FAST_MSG,
            |ctx| {
                if ctx.kind().is_custom() {
                    *ctx.event_source_data::<u32>().unwrap() += 1;
                }
            },
            user_data(0u32),
        )
        .unwrap();

    system
        .register_external_event_source(
            1,
            SLOW_MSG,
            |ctx| match ctx.kind() {
                EventKind::ExtSourceInit => {
                    ctx.create_periodic_timer(
                        500,
                        |ctx| {
                            let received = *ctx.event_source_data::<u32>().unwrap();
                            println!(
                                "[{:>5} ms] slow message received {} times",
                                ctx.now_ms(),
                                received
                            );
                        },
                        None,
                    );
                }
                EventKind::Custom(_) => {
                    let frame = CanFrame::decode(ctx.event_data()).unwrap();
                    *ctx.event_source_data::<u32>().unwrap() += 1;
                    println!(
                        "[{:>5} ms] 0x{:X}: {:02X?}",
                        ctx.now_ms(),
                        frame.can_id,
                        frame.data
                    );
                }
                _ => {}
            },
            user_data(0u32),
        )
        .unwrap();

    let mut workers = Vec::new();
    for (mut dispatcher, ticks) in system.take_all_dispatchers().into_iter().zip([200u64, 40]) {
        workers.push(thread::spawn(move || {
            let tick = Duration::from_millis(u64::from(dispatcher.config().tick_ms));
            for _ in 0..ticks {
                dispatcher.dispatcher_main();
                thread::sleep(tick);
            }
            dispatcher
        }));
    }

    for counter in 0..100u8 {
        let fast = CanFrame::new(FAST_MSG, vec![counter; 8]).encode().unwrap();
        if let Err(e) = tx_fast.post_external(FAST_MSG, 0, &fast) {
            eprintln!("Frame lost: {}", e);
        }
        if counter % 10 == 0 {
            let slow = CanFrame::new(SLOW_MSG, vec![counter]).encode().unwrap();
            if let Err(e) = tx_slow.post_external(SLOW_MSG, 0, &slow) {
                eprintln!("Frame lost: {}", e);
            }
        }
        thread::sleep(Duration::from_millis(20));
    }

    println!("\n=== DISPATCHER SUMMARY ===");
    for worker in workers {
        let dispatcher = worker.join().unwrap();
        let stats = dispatcher.stats();
        println!(
            "Dispatcher {}: {} ticks, {} events, {} timer callbacks, max queue usage {}",
            dispatcher.name(),
            stats.ticks,
            stats.events_dispatched,
            stats.timers_fired,
            dispatcher.ports()[0].max_usage()
        );
    }
}
