//! Dual-core driver loop.
//!
//! The keyboard controller runs on one core as a tight loop of fixed cycle
//! batches ([`EmulationCore::iterate`]). The other core ([`IoCore`]) runs a
//! slower periodic tick for HID work, feeds the receive ring from the UART
//! interrupt, and watches the emulation core's heartbeat.
//!
//! The only cross-core channels are the receive ring, the input latch,
//! relaxed counters, and three flags:
//!
//! - pause: [`PauseHandle::with_paused`] asks the emulation core to stop
//!   stepping while flash storage is written, and falls back to disabling
//!   interrupts if it does not acknowledge in time
//! - reset: [`ResetHandle::request`] is polled at the start of each iteration
//! - heartbeat: bumped once per batch, checked by [`IoCore::tick`]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::{ring_buffer, RingProducer, SerialBridge, UartTx};
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::peripherals::{InputLatch, MouseQuadrature};
use crate::Ikbd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PauseState {
    Running = 0,
    PauseRequested = 1,
    Paused = 2,
}

/// Three-state pause flag. The I/O core requests and releases; only the
/// emulation core moves a request to `Paused`.
#[derive(Debug)]
pub struct PauseFlag(AtomicU8);

impl PauseFlag {
    fn new() -> Self {
        PauseFlag(AtomicU8::new(PauseState::Running as u8))
    }

    pub fn load(&self) -> PauseState {
        match self.0.load(Ordering::Acquire) {
            1 => PauseState::PauseRequested,
            2 => PauseState::Paused,
            _ => PauseState::Running,
        }
    }

    fn request(&self) {
        self.0.store(PauseState::PauseRequested as u8, Ordering::Release);
    }

    /// Fails if the request was withdrawn in the meantime.
    fn acknowledge(&self) -> bool {
        self.0
            .compare_exchange(
                PauseState::PauseRequested as u8,
                PauseState::Paused as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn release(&self) {
        self.0.store(PauseState::Running as u8, Ordering::Release);
    }
}

/// State visible to both cores.
#[derive(Debug)]
pub struct Shared {
    pub pause: PauseFlag,
    reset_requested: AtomicBool,
    heartbeat: AtomicU64,
    pub diagnostics: Diagnostics,
}

impl Shared {
    fn new() -> Self {
        Shared {
            pause: PauseFlag::new(),
            reset_requested: AtomicBool::new(false),
            heartbeat: AtomicU64::new(0),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn heartbeat(&self) -> u64 {
        self.heartbeat.load(Ordering::Relaxed)
    }
}

/// Outcome of one [`EmulationCore::iterate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// A batch ran for this many cycles
    Ran(u64),
    /// Pause acknowledged or held; nothing was stepped
    Paused,
    /// A requested reset was applied
    Reset,
    /// Strict mode halted the engine at this PC
    Crashed(u16),
}

/// Everything produced by [`cores`].
pub struct Cores {
    pub emulation: EmulationCore,
    pub io: IoCore,
    /// Feed for the UART receive interrupt
    pub rx: RingProducer,
}

/// Split an engine into its two loop halves and the receive ring producer.
pub fn cores(mut ikbd: Ikbd, config: &Config) -> Result<Cores> {
    config.validate()?;
    ikbd.trace = config.trace;
    let (rx, consumer) = ring_buffer(config.ring_capacity)?;
    let bridge = SerialBridge::new(consumer, config.overflow_capacity)?;
    let shared = Arc::new(Shared::new());
    let input = ikbd.input();
    tracing::info!(
        mode = ?config.mode,
        batch_cycles = config.batch_cycles,
        ring = config.ring_capacity,
        overflow = config.overflow_capacity,
        "driver configured"
    );
    Ok(Cores {
        emulation: EmulationCore {
            ikbd,
            bridge,
            shared: Arc::clone(&shared),
            batch_cycles: config.batch_cycles,
            pause_spin: config.pause_spin,
        },
        io: IoCore {
            shared,
            input,
            mouse: MouseQuadrature::new(),
            last_heartbeat: 0,
            idle_ticks: 0,
            stall_ticks: config.stall_ticks,
            stalled: false,
        },
        rx,
    })
}

pub struct EmulationCore {
    ikbd: Ikbd,
    bridge: SerialBridge,
    shared: Arc<Shared>,
    batch_cycles: u32,
    pause_spin: u32,
}

impl EmulationCore {
    pub fn ikbd(&self) -> &Ikbd {
        &self.ikbd
    }

    pub fn ikbd_mut(&mut self) -> &mut Ikbd {
        &mut self.ikbd
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// One pass of the emulation loop. Never blocks.
    pub fn iterate<U: UartTx + ?Sized>(&mut self, uart: &mut U) -> Iteration {
        if self.shared.reset_requested.swap(false, Ordering::AcqRel) {
            self.ikbd.reset();
            self.bridge.reset();
            self.shared.heartbeat.fetch_add(1, Ordering::Relaxed);
            tracing::info!("controller reset");
            return Iteration::Reset;
        }

        match self.shared.pause.load() {
            PauseState::Running => {}
            PauseState::PauseRequested if !self.shared.pause.acknowledge() => {}
            _ => {
                for _ in 0..self.pause_spin {
                    std::hint::spin_loop();
                }
                return Iteration::Paused;
            }
        }

        let cycles = self.ikbd.run_cycles(self.batch_cycles);
        self.bridge.service_rx(&mut self.ikbd.sci);
        self.bridge.service_tx(&mut self.ikbd.sci, uart);
        self.shared.heartbeat.fetch_add(1, Ordering::Relaxed);
        self.publish();

        match self.ikbd.crashed() {
            Some(pc) => Iteration::Crashed(pc),
            None => Iteration::Ran(cycles),
        }
    }

    fn publish(&self) {
        let d = &self.shared.diagnostics;
        let ring = self.bridge.ring();
        let overflow = self.bridge.overflow();
        Diagnostics::store(&d.cycles, self.ikbd.cycles());
        Diagnostics::store(&d.interrupts, self.ikbd.interrupts_serviced);
        Diagnostics::store(&d.sci_overruns, self.ikbd.sci.dbg_overruns);
        Diagnostics::store(&d.ring_drops, ring.dropped());
        Diagnostics::store(&d.overflow_drops, overflow.dropped());
        Diagnostics::store(&d.ring_high_water, ring.high_water() as u64);
        Diagnostics::store(&d.overflow_high_water, overflow.high_water() as u64);
    }
}

/// Periodic half of the driver: watchdog and mouse line generation.
pub struct IoCore {
    shared: Arc<Shared>,
    input: Arc<InputLatch>,
    mouse: MouseQuadrature,
    last_heartbeat: u64,
    idle_ticks: u32,
    stall_ticks: u32,
    stalled: bool,
}

impl IoCore {
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn input(&self) -> &Arc<InputLatch> {
        &self.input
    }

    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle { shared: Arc::clone(&self.shared) }
    }

    pub fn reset_handle(&self) -> ResetHandle {
        ResetHandle { shared: Arc::clone(&self.shared) }
    }

    /// Queue relative mouse motion for the quadrature generator.
    pub fn mouse_move(&mut self, dx: i32, dy: i32) {
        self.mouse.accumulate(dx, dy);
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Run one I/O tick.
    pub fn tick(&mut self) {
        self.check_heartbeat();
        if self.input.mouse_mode() {
            let lines = self.mouse.step();
            self.input.set_mouse_lines(lines);
        }
    }

    fn check_heartbeat(&mut self) {
        let beat = self.shared.heartbeat();
        if self.shared.pause.load() != PauseState::Running {
            self.last_heartbeat = beat;
            self.idle_ticks = 0;
            return;
        }
        if beat != self.last_heartbeat {
            if self.stalled {
                tracing::info!(heartbeat = beat, "emulation core resumed");
            }
            self.last_heartbeat = beat;
            self.idle_ticks = 0;
            self.stalled = false;
            return;
        }
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.idle_ticks >= self.stall_ticks && !self.stalled {
            self.stalled = true;
            let stalls = Diagnostics::bump(&self.shared.diagnostics.stalls);
            tracing::warn!(ticks = self.idle_ticks, stalls, "emulation core heartbeat stalled");
        }
    }
}

/// Process-wide interrupt disable used when the pause handshake times out.
pub trait InterruptGate {
    fn without_interrupts<R, F: FnOnce() -> R>(&self, f: F) -> R;
}

/// Requests that the emulation core stop stepping around a critical section.
#[derive(Clone)]
pub struct PauseHandle {
    shared: Arc<Shared>,
}

impl PauseHandle {
    /// Run `f` while the emulation core is paused.
    ///
    /// Waits up to `timeout` for the acknowledgement. On timeout the
    /// pause is counted and `f` runs inside `gate` instead. The pause is
    /// released afterwards either way.
    pub fn with_paused<G, F, R>(&self, timeout: Duration, gate: &G, f: F) -> R
    where
        G: InterruptGate + ?Sized,
        F: FnOnce() -> R,
    {
        let pause = &self.shared.pause;
        pause.request();
        let start = Instant::now();
        let acknowledged = loop {
            if pause.load() == PauseState::Paused {
                break true;
            }
            if start.elapsed() >= timeout {
                break false;
            }
            std::thread::yield_now();
        };

        let result = if acknowledged {
            tracing::debug!(waited_us = start.elapsed().as_micros() as u64, "emulation paused");
            f()
        } else {
            let timeouts = Diagnostics::bump(&self.shared.diagnostics.pause_timeouts);
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                timeouts,
                "pause not acknowledged, running with interrupts disabled"
            );
            gate.without_interrupts(f)
        };
        pause.release();
        result
    }
}

#[derive(Clone)]
pub struct ResetHandle {
    shared: Arc<Shared>,
}

impl ResetHandle {
    /// Ask the emulation core to reset at its next iteration.
    pub fn request(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
    }
}
