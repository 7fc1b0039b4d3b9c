//! Runs alarms on the simulated hardware in real time.
//!
//! Each test instantiates its own port in a separate module, so tests can run
//! in parallel. Timing assertions have generous margins because the host
//! scheduler adds latency.
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    thread::sleep,
    time::{Duration, Instant},
};

use hwalarm_kernel::{pending_count, ActivateAlarmError, Alarm, AlarmDuration, ALARM_CAPACITY};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

mod one_shot {
    use super::*;

    hwalarm_port_std::use_port!(unsafe struct SystemTraits);

    static ALARM: Alarm<SystemTraits> = Alarm::new(30_000, false);
    static COUNT: AtomicUsize = AtomicUsize::new(0);
    static FIRED_AT: Mutex<Option<Instant>> = Mutex::new(None);

    fn handler(param: usize) {
        assert_eq!(param, 42);
        COUNT.fetch_add(1, Ordering::SeqCst);
        *FIRED_AT.lock().unwrap() = Some(Instant::now());
    }

    #[test]
    fn run() {
        init_logger();
        hwalarm_port_std::boot::<SystemTraits>();

        let start = Instant::now();
        Pin::static_ref(&ALARM).activate(Some(handler), 42).unwrap();
        assert_eq!(ALARM.is_active(), Ok(true));

        sleep(Duration::from_millis(200));

        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
        assert_eq!(ALARM.is_active(), Ok(false));
        let fired_at = FIRED_AT.lock().unwrap().unwrap();
        // Allow for truncation to whole microseconds
        assert!(fired_at - start >= Duration::from_micros(29_990));

        hwalarm_port_std::shutdown::<SystemTraits>();
    }
}

mod periodic {
    use super::*;

    hwalarm_port_std::use_port!(unsafe struct SystemTraits);

    static COUNT: AtomicUsize = AtomicUsize::new(0);

    fn handler(_: usize) {
        COUNT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn run() {
        init_logger();
        hwalarm_port_std::boot::<SystemTraits>();

        let alarm =
            Alarm::<SystemTraits>::from_duration(AlarmDuration::Millis(20), true).unwrap();
        let alarm = std::pin::pin!(alarm);
        alarm.as_ref().activate(Some(handler), 0).unwrap();

        sleep(Duration::from_millis(210));
        alarm.cancel().unwrap();
        let count = COUNT.load(Ordering::SeqCst);

        // Ideally 10. Latency accumulates over periods, so it can only be
        // fewer.
        assert!((3..=10).contains(&count), "{count}");

        // No more firings after cancellation. One firing might have been
        // handed over to the dispatch thread already.
        sleep(Duration::from_millis(60));
        hwalarm_port_std::shutdown::<SystemTraits>();
        assert!(COUNT.load(Ordering::SeqCst) <= count + 1);
    }
}

mod ordering {
    use super::*;

    hwalarm_port_std::use_port!(unsafe struct SystemTraits);

    static ALARMS: [Alarm<SystemTraits>; 3] = [
        Alarm::new(90_000, false),
        Alarm::new(30_000, false),
        Alarm::new(60_000, false),
    ];
    static FIRED: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    fn handler(i: usize) {
        FIRED.lock().unwrap().push(i);
    }

    #[test]
    fn run() {
        init_logger();
        hwalarm_port_std::boot::<SystemTraits>();

        for (i, alarm) in ALARMS.iter().enumerate() {
            Pin::static_ref(alarm).activate(Some(handler), i).unwrap();
        }
        assert_eq!(pending_count::<SystemTraits>(), Ok(3));

        sleep(Duration::from_millis(300));
        hwalarm_port_std::shutdown::<SystemTraits>();

        assert_eq!(*FIRED.lock().unwrap(), [1, 2, 0]);
        assert_eq!(pending_count::<SystemTraits>(), Ok(0));
    }
}

mod cancel_before_fire {
    use super::*;

    hwalarm_port_std::use_port!(unsafe struct SystemTraits);

    static COUNT: AtomicUsize = AtomicUsize::new(0);

    fn handler(_: usize) {
        COUNT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn run() {
        init_logger();
        hwalarm_port_std::boot::<SystemTraits>();

        let a = Box::pin(Alarm::<SystemTraits>::new(50_000, false));
        let b = Box::pin(Alarm::<SystemTraits>::new(100_000, false));
        a.as_ref().activate(Some(handler), 0).unwrap();
        b.as_ref().activate(Some(handler), 1).unwrap();

        a.cancel().unwrap();
        // Dropping cancels too
        drop(b);
        assert_eq!(pending_count::<SystemTraits>(), Ok(0));

        sleep(Duration::from_millis(200));
        hwalarm_port_std::shutdown::<SystemTraits>();
        assert_eq!(COUNT.load(Ordering::SeqCst), 0);
    }
}

mod capacity {
    use super::*;

    hwalarm_port_std::use_port!(unsafe struct SystemTraits);

    fn handler(_: usize) {
        unreachable!();
    }

    #[test]
    fn run() {
        init_logger();
        hwalarm_port_std::boot::<SystemTraits>();

        let alarms: Vec<_> = (0..=ALARM_CAPACITY)
            .map(|_| Box::pin(Alarm::<SystemTraits>::new(60_000_000, false)))
            .collect();

        for alarm in &alarms[..ALARM_CAPACITY] {
            alarm.as_ref().activate(Some(handler), 0).unwrap();
        }
        assert_eq!(
            alarms[ALARM_CAPACITY].as_ref().activate(Some(handler), 0),
            Err(ActivateAlarmError::CapacityExceeded)
        );
        assert_eq!(pending_count::<SystemTraits>(), Ok(ALARM_CAPACITY));

        drop(alarms);
        assert_eq!(pending_count::<SystemTraits>(), Ok(0));

        hwalarm_port_std::shutdown::<SystemTraits>();
    }
}

mod handler_reactivates {
    use super::*;

    hwalarm_port_std::use_port!(unsafe struct SystemTraits);

    static ALARM: Alarm<SystemTraits> = Alarm::new(10_000, false);
    static COUNT: AtomicUsize = AtomicUsize::new(0);

    /// Reactivates its own one-shot alarm until it has fired five times.
    fn handler(_: usize) {
        if COUNT.fetch_add(1, Ordering::SeqCst) + 1 < 5 {
            Pin::static_ref(&ALARM).activate(Some(handler), 0).unwrap();
        }
    }

    #[test]
    fn run() {
        init_logger();
        hwalarm_port_std::boot::<SystemTraits>();

        Pin::static_ref(&ALARM).activate(Some(handler), 0).unwrap();

        sleep(Duration::from_millis(300));
        hwalarm_port_std::shutdown::<SystemTraits>();

        assert_eq!(COUNT.load(Ordering::SeqCst), 5);
        assert_eq!(ALARM.is_active(), Ok(false));
    }
}

mod activate_before_boot {
    use super::*;

    hwalarm_port_std::use_port!(unsafe struct SystemTraits);

    static ALARM: Alarm<SystemTraits> = Alarm::new(20_000, false);
    static COUNT: AtomicUsize = AtomicUsize::new(0);

    fn handler(_: usize) {
        COUNT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn run() {
        init_logger();

        // The comparator is armed on boot
        Pin::static_ref(&ALARM).activate(Some(handler), 0).unwrap();
        hwalarm_port_std::boot::<SystemTraits>();

        sleep(Duration::from_millis(200));
        hwalarm_port_std::shutdown::<SystemTraits>();

        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
    }
}
