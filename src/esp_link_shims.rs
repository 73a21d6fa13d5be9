//! ESP-IDF runtime symbol providers for third-party crates.
//!
//! - `critical-section` 1.x: the link channel uses `CriticalSectionRawMutex`,
//!   which resolves the acquire/release symbols at link time. They are
//!   backed by one process-wide mutex with a per-thread nesting depth.
//! - `embassy-time-driver`: the dispatcher's idle timer is an
//!   `async_io_mini::Timer`, which reads the time and schedules wake-ups
//!   through the embassy time driver. The driver below counts
//!   `esp_timer_get_time()` microseconds and fires due wakers from one
//!   `ota-timer` thread.
//!
//! Host builds get `critical-section/std` and embassy-time's `std` driver.

#[cfg(target_os = "espidf")]
use core::cell::{Cell, RefCell};
#[cfg(target_os = "espidf")]
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(target_os = "espidf")]
static SECTION_LOCK: Mutex<()> = Mutex::new(());

#[cfg(target_os = "espidf")]
thread_local! {
    static NESTING: Cell<u8> = const { Cell::new(0) };
    static HELD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
    NESTING.with(|nesting| {
        let depth = nesting.get();
        if depth == 0 {
            // A panic inside a section cannot leave the () payload torn.
            let guard = SECTION_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            HELD.with(|held| *held.borrow_mut() = Some(guard));
        }
        nesting.set(depth.saturating_add(1));
        depth
    })
}

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_release(_restore: u8) {
    NESTING.with(|nesting| {
        let depth = nesting.get();
        if depth == 0 {
            return;
        }
        nesting.set(depth - 1);
        if depth == 1 {
            HELD.with(|held| *held.borrow_mut() = None);
        }
    });
}

#[cfg(target_os = "espidf")]
mod time_driver {
    use core::task::Waker;
    use std::sync::{Condvar, Mutex, MutexGuard, Once, PoisonError};
    use std::time::Duration;

    use embassy_time_driver::{Driver, TICK_HZ};
    use log::error;

    const TIMER_STACK: usize = 4096;

    /// Pending wake-ups, one per distinct waker.
    struct EspTimeDriver {
        alarms: Mutex<Vec<(u64, Waker)>>,
        changed: Condvar,
        worker: Once,
    }

    embassy_time_driver::time_driver_impl!(static DRIVER: EspTimeDriver = EspTimeDriver {
        alarms: Mutex::new(Vec::new()),
        changed: Condvar::new(),
        worker: Once::new(),
    });

    impl EspTimeDriver {
        fn alarms(&self) -> MutexGuard<'_, Vec<(u64, Waker)>> {
            self.alarms.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn start_worker(&'static self) {
            self.worker.call_once(|| {
                let spawned = std::thread::Builder::new()
                    .name("ota-timer".into())
                    .stack_size(TIMER_STACK)
                    .spawn(move || self.fire_due());
                if let Err(e) = spawned {
                    error!("time driver: failed to spawn timer thread: {}", e);
                }
            });
        }

        fn fire_due(&self) {
            let mut alarms = self.alarms();
            loop {
                let now = self.now();
                alarms.retain(|(at, waker)| {
                    let due = *at <= now;
                    if due {
                        waker.wake_by_ref();
                    }
                    !due
                });
                alarms = match alarms.iter().map(|(at, _)| *at).min() {
                    Some(next) => {
                        let wait = ticks_to_duration(next - now);
                        self.changed
                            .wait_timeout(alarms, wait)
                            .map_or_else(|e| e.into_inner().0, |(guard, _)| guard)
                    }
                    None => self
                        .changed
                        .wait(alarms)
                        .unwrap_or_else(PoisonError::into_inner),
                };
            }
        }
    }

    impl Driver for EspTimeDriver {
        fn now(&self) -> u64 {
            // SAFETY: reads the monotonic high-resolution timer.
            let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() } as u64;
            (u128::from(us) * u128::from(TICK_HZ) / 1_000_000) as u64
        }

        fn schedule_wake(&self, at: u64, waker: &Waker) {
            DRIVER.start_worker();
            let mut alarms = self.alarms();
            match alarms.iter_mut().find(|(_, w)| w.will_wake(waker)) {
                Some(alarm) => alarm.0 = alarm.0.min(at),
                None => alarms.push((at, waker.clone())),
            }
            self.changed.notify_one();
        }
    }

    fn ticks_to_duration(ticks: u64) -> Duration {
        Duration::from_micros(ticks.saturating_mul(1_000_000) / TICK_HZ)
    }
}
