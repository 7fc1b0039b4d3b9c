//! Blinks a pretend LED with a periodic alarm and prints a message with a
//! one-shot alarm.
//!
//! ```text
//! RUST_LOG=info cargo run -p hwalarm_port_std --example blink
//! ```
use hwalarm_kernel::{Alarm, AlarmDuration};
use std::{
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    thread::sleep,
    time::Duration,
};

hwalarm_port_std::use_port!(unsafe struct SystemTraits; fn main => app);

static BLINK: Alarm<SystemTraits> = Alarm::new(250_000, true);
static LED: AtomicBool = AtomicBool::new(false);

fn toggle_led(_: usize) {
    let on = !LED.fetch_xor(true, Ordering::Relaxed);
    log::info!("LED {}", if on { "on" } else { "off" });
}

fn announce(param: usize) {
    log::info!("one-shot alarm fired (param = {param})");
}

fn app() {
    if let Err(e) = Pin::static_ref(&BLINK).activate(Some(toggle_led), 0) {
        log::error!("failed to start blinking: {e}");
        return;
    }

    match Alarm::<SystemTraits>::from_duration(AlarmDuration::Secs(0.6), false) {
        Ok(alarm) => {
            let alarm = std::pin::pin!(alarm);
            if let Err(e) = alarm.as_ref().activate(Some(announce), 42) {
                log::error!("failed to activate the one-shot alarm: {e}");
            }
            sleep(Duration::from_secs(2));
        }
        Err(e) => log::error!("bad duration: {e}"),
    }

    let _ = Pin::static_ref(&BLINK).cancel();
}
