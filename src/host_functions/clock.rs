//! Clocks and the `clock_res_get` patch.
//!
//! The runner installs its [`Clocks`] in the WASI context and keeps a
//! handle to them, so `clock_time_get` and `clock_res_get` agree on the
//! same clocks.
//!
//! The adapter writes results through its cached memory view, which goes
//! stale once the module grows its memory. This `clock_res_get` refreshes
//! the view from the caller's `memory` export before writing, so a call
//! made after growth lands in the new pages.

use super::refresh_memory_view;
use crate::context::RunnerState;
use crate::error::errno;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;
use wasmtime::{Caller, Func, Store};
use wasmtime_wasi::{HostMonotonicClock, HostWallClock};

/// Wall clock
pub const CLOCK_REALTIME: i32 = 0;

/// Monotonic clock
pub const CLOCK_MONOTONIC: i32 = 1;

/// Process CPU time clock
pub const CLOCK_PROCESS_CPUTIME: i32 = 2;

/// Thread CPU time clock
pub const CLOCK_THREAD_CPUTIME: i32 = 3;

/// Wall clock of the host system, nanosecond resolution
pub struct SystemWallClock;

impl HostWallClock for SystemWallClock {
    fn resolution(&self) -> Duration {
        Duration::from_nanos(1)
    }

    fn now(&self) -> Duration {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }
}

/// Monotonic clock counting nanoseconds since its creation
pub struct SystemMonotonicClock {
    start: Instant,
}

impl Default for SystemMonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl HostMonotonicClock for SystemMonotonicClock {
    fn resolution(&self) -> u64 {
        1
    }

    fn now(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// The wall and monotonic clocks of one runner
#[derive(Clone)]
pub struct Clocks {
    wall: Arc<dyn HostWallClock + Sync>,
    monotonic: Arc<dyn HostMonotonicClock + Sync>,
}

impl Default for Clocks {
    fn default() -> Self {
        Self {
            wall: Arc::new(SystemWallClock),
            monotonic: Arc::new(SystemMonotonicClock::default()),
        }
    }
}

impl Clocks {
    /// System clocks
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the wall clock
    pub fn with_wall_clock(mut self, clock: impl HostWallClock + Sync + 'static) -> Self {
        self.wall = Arc::new(clock);
        self
    }

    /// Replace the monotonic clock
    pub fn with_monotonic_clock(mut self, clock: impl HostMonotonicClock + Sync + 'static) -> Self {
        self.monotonic = Arc::new(clock);
        self
    }

    /// Resolution in nanoseconds of `clock_id`. CPU time clocks are not
    /// provided.
    pub fn resolution(&self, clock_id: i32) -> Option<u64> {
        match clock_id {
            CLOCK_REALTIME => Some(u64::try_from(self.wall.resolution().as_nanos()).unwrap_or(u64::MAX)),
            CLOCK_MONOTONIC => Some(self.monotonic.resolution()),
            _ => None,
        }
    }

    /// Wall clock handle for the WASI context
    pub(crate) fn wall(&self) -> SharedWallClock {
        SharedWallClock(Arc::clone(&self.wall))
    }

    /// Monotonic clock handle for the WASI context
    pub(crate) fn monotonic(&self) -> SharedMonotonicClock {
        SharedMonotonicClock(Arc::clone(&self.monotonic))
    }
}

impl std::fmt::Debug for Clocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clocks")
            .field("wall_resolution", &self.wall.resolution())
            .field("monotonic_resolution", &self.monotonic.resolution())
            .finish()
    }
}

pub(crate) struct SharedWallClock(Arc<dyn HostWallClock + Sync>);

impl HostWallClock for SharedWallClock {
    fn resolution(&self) -> Duration {
        self.0.resolution()
    }

    fn now(&self) -> Duration {
        self.0.now()
    }
}

pub(crate) struct SharedMonotonicClock(Arc<dyn HostMonotonicClock + Sync>);

impl HostMonotonicClock for SharedMonotonicClock {
    fn resolution(&self) -> u64 {
        self.0.resolution()
    }

    fn now(&self) -> u64 {
        self.0.now()
    }
}

/// The patched `clock_res_get`
pub(crate) fn clock_res_get(store: &mut Store<RunnerState>) -> Func {
    Func::wrap(
        store,
        |mut caller: Caller<'_, RunnerState>, clock_id: i32, result: i32| -> i32 {
            let Some(view) = refresh_memory_view(&mut caller) else {
                return errno::FAULT;
            };
            let Some(nanos) = caller.data().clocks.resolution(clock_id) else {
                return errno::INVAL;
            };

            match view.write(&mut caller, result as u32 as usize, &nanos.to_le_bytes()) {
                Ok(()) => errno::SUCCESS,
                Err(fault) => {
                    debug!(error = %fault, "clock_res_get result out of bounds");
                    errno::FAULT
                }
            }
        },
    )
}
