//! Desktop host for the IKBD emulation core.
//!
//! Models the dual-core board with threads:
//!
//! - **Emulation thread**: runs `EmulationCore::iterate` in a loop, paced
//!   to the 1 MHz E-clock unless `--turbo` is given.
//! - **Main thread (I/O core)**: 10 ms tick for the watchdog, gamepad
//!   polling, mouse quadrature and settings persistence.
//! - **Receive thread**: stands in for the UART interrupt. Bytes read from
//!   stdin are pushed into the receive ring while holding the IRQ lock.
//! - **Transmit thread**: drains the transmit FIFO into stdout.
//!
//! stdout carries only the serial byte stream; logs go to stderr
//! (`RUST_LOG=ikbd_core=debug` for more detail).

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use gilrs::{Axis, Button as GilrsButton, Event as GilrsEvent, EventType, Gilrs};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing_subscriber::EnvFilter;

use ikbd_core::bridge::{RingProducer, UartTx};
use ikbd_core::driver::{cores, EmulationCore, InterruptGate, Iteration, IoCore};
use ikbd_core::peripherals::ports::{JOY_DOWN, JOY_LEFT, JOY_RIGHT, JOY_UP};
use ikbd_core::peripherals::InputLatch;
use ikbd_core::settings::{self, Settings, SettingsStore};
use ikbd_core::{Config, CoreError, EngineMode, Ikbd, CLOCK_HZ};

/// Analog stick deadzone
const STICK_DEADZONE: f32 = 0.3;
/// Mouse counts per I/O tick at full right-stick deflection
const STICK_MOUSE_SPEED: f32 = 8.0;
/// Transmit FIFO depth
const TX_FIFO: usize = 64;
/// Interval between diagnostics log lines
const DIAG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "ikbd-emu")]
#[command(about = "HD6301 keyboard controller emulator with a stdio serial link", long_about = None)]
struct Args {
    /// Firmware image: Intel HEX (.hex) or a raw ROM dump
    firmware: PathBuf,

    /// Halt on undefined opcodes and on a PC outside RAM/ROM
    #[arg(long)]
    strict: bool,

    /// Emulated cycles per driver iteration
    #[arg(long, default_value_t = 1000)]
    batch_cycles: u32,

    /// I/O core tick period in milliseconds
    #[arg(long, default_value_t = 10)]
    io_tick_ms: u64,

    /// Receive ring capacity (power of two)
    #[arg(long, default_value_t = 256)]
    ring: usize,

    /// Overflow queue capacity (power of two)
    #[arg(long, default_value_t = 64)]
    overflow: usize,

    /// Pause acknowledgement timeout in milliseconds
    #[arg(long, default_value_t = 50)]
    pause_timeout_ms: u64,

    /// Settings record file (loaded at start, saved on exit)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Drive port 4 with mouse quadrature from the right stick
    #[arg(long)]
    mouse: bool,

    /// Log every executed instruction (needs RUST_LOG=trace)
    #[arg(long)]
    trace: bool,

    /// Run as fast as possible instead of at 1 MHz
    #[arg(long)]
    turbo: bool,

    /// Stop after this many seconds (0 = run until interrupted)
    #[arg(long, default_value_t = 0)]
    seconds: u64,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            mode: if self.strict { EngineMode::Strict } else { EngineMode::Fast },
            batch_cycles: self.batch_cycles,
            io_tick_ms: self.io_tick_ms,
            ring_capacity: self.ring,
            overflow_capacity: self.overflow,
            pause_timeout_ms: self.pause_timeout_ms,
            trace: self.trace,
            ..Config::default()
        }
    }
}

// ─── Interrupt model ────────────────────────────────────────────────────────

/// The receive thread holds this lock while "in the ISR"; holding it from
/// elsewhere keeps the ISR from running.
#[derive(Clone, Default)]
struct IrqLock(Arc<Mutex<()>>);

impl IrqLock {
    fn enter(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl InterruptGate for IrqLock {
    fn without_interrupts<R, F: FnOnce() -> R>(&self, f: F) -> R {
        let _masked = self.enter();
        f()
    }
}

fn spawn_receiver(mut rx: RingProducer, irq: IrqLock) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 64];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => {
                    tracing::info!("serial input closed");
                    return;
                }
                Ok(n) => {
                    let _isr = irq.enter();
                    for &byte in &buf[..n] {
                        rx.push(byte);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("serial input: {}", e);
                    return;
                }
            }
        }
    })
}

// ─── Transmit path ──────────────────────────────────────────────────────────

struct FifoTx(HeapProd<u8>);

impl UartTx for FifoTx {
    fn is_ready(&self) -> bool {
        !self.0.is_full()
    }

    fn write_byte(&mut self, byte: u8) {
        let _ = self.0.try_push(byte);
    }
}

fn spawn_transmitter(mut fifo: HeapCons<u8>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stdout = std::io::stdout().lock();
        let mut chunk = Vec::with_capacity(TX_FIFO);
        loop {
            chunk.extend(fifo.pop_iter());
            if chunk.is_empty() {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            if let Err(e) = stdout.write_all(&chunk).and_then(|_| stdout.flush()) {
                tracing::error!("serial output: {}", e);
                return;
            }
            chunk.clear();
        }
    })
}

// ─── Emulation thread ───────────────────────────────────────────────────────

fn spawn_emulation(
    mut core: EmulationCore,
    mut tx: FifoTx,
    stop: Arc<AtomicBool>,
    turbo: bool,
) -> thread::JoinHandle<EmulationCore> {
    thread::spawn(move || {
        let start = Instant::now();
        let mut emulated: u64 = 0;
        let mut crash_reported = false;
        while !stop.load(Ordering::Relaxed) {
            match core.iterate(&mut tx) {
                Iteration::Ran(cycles) => {
                    emulated += cycles;
                    crash_reported = false;
                }
                Iteration::Paused => thread::yield_now(),
                Iteration::Reset => {}
                Iteration::Crashed(pc) => {
                    if !crash_reported {
                        tracing::error!(pc = format_args!("{:04X}", pc), "firmware crashed, waiting for reset");
                        crash_reported = true;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            }
            if !turbo {
                // Stay within a couple of milliseconds of real time
                let target = Duration::from_micros(emulated * 1_000_000 / CLOCK_HZ as u64);
                let now = start.elapsed();
                if target > now + Duration::from_millis(2) {
                    thread::sleep(target - now);
                }
            }
        }
        core
    })
}

// ─── Gamepad ────────────────────────────────────────────────────────────────

#[derive(Default, Clone, Copy)]
struct PadState {
    up: bool, down: bool, left: bool, right: bool,
    fire: bool,
    stick_x: f32, stick_y: f32,
    mouse_x: f32, mouse_y: f32,
}

impl PadState {
    fn directions(&self) -> u8 {
        let mut dirs = 0;
        if self.up || self.stick_y < -STICK_DEADZONE { dirs |= JOY_UP; }
        if self.down || self.stick_y > STICK_DEADZONE { dirs |= JOY_DOWN; }
        if self.left || self.stick_x < -STICK_DEADZONE { dirs |= JOY_LEFT; }
        if self.right || self.stick_x > STICK_DEADZONE { dirs |= JOY_RIGHT; }
        dirs
    }
}

/// Host input devices feeding the input latch.
struct HostInput {
    gilrs: Option<Gilrs>,
    pads: [PadState; 2],
    reset_pressed: bool,
}

impl HostInput {
    fn new() -> Self {
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                for (id, gp) in g.gamepads() {
                    tracing::info!("gamepad [{}] \"{}\"", id, gp.name());
                }
                Some(g)
            }
            Err(e) => {
                tracing::warn!("gamepad support unavailable: {}", e);
                None
            }
        };
        HostInput { gilrs, pads: [PadState::default(); 2], reset_pressed: false }
    }

    /// Drain gamepad events. Returns true when the reset button went down.
    fn poll(&mut self) -> bool {
        let Some(gilrs) = self.gilrs.as_mut() else { return false };
        let mut reset = false;
        while let Some(GilrsEvent { id, event, .. }) = gilrs.next_event() {
            let pad = &mut self.pads[usize::from(id) % 2];
            match event {
                EventType::ButtonPressed(GilrsButton::Mode, _) => {
                    reset |= !self.reset_pressed;
                    self.reset_pressed = true;
                }
                EventType::ButtonReleased(GilrsButton::Mode, _) => self.reset_pressed = false,
                EventType::ButtonPressed(b, _) => apply_button(pad, b, true),
                EventType::ButtonReleased(b, _) => apply_button(pad, b, false),
                EventType::AxisChanged(a, v, _) => apply_axis(pad, a, v),
                EventType::Connected => tracing::info!("gamepad [{}] connected", id),
                EventType::Disconnected => {
                    tracing::info!("gamepad [{}] disconnected", id);
                    *pad = PadState::default();
                }
                _ => {}
            }
        }
        reset
    }

    /// Publish pad state. Returns the mouse motion for this tick.
    fn apply(&self, input: &InputLatch, settings: &Settings) -> (i32, i32) {
        let (first, second) = if settings.swap_joysticks { (1, 0) } else { (0, 1) };
        input.set_joystick(first, self.pads[0].directions());
        input.set_joystick(second, self.pads[1].directions());
        input.set_fire(first, self.pads[0].fire);
        input.set_fire(second, self.pads[1].fire);

        let divisor = settings.mouse_divisor.max(1) as f32;
        let pad = &self.pads[0];
        let dx = (pad.mouse_x * STICK_MOUSE_SPEED / divisor) as i32;
        let dy = (pad.mouse_y * STICK_MOUSE_SPEED / divisor) as i32;
        (dx, dy)
    }
}

fn apply_button(pad: &mut PadState, btn: GilrsButton, pressed: bool) {
    match btn {
        GilrsButton::DPadUp    => pad.up    = pressed,
        GilrsButton::DPadDown  => pad.down  = pressed,
        GilrsButton::DPadLeft  => pad.left  = pressed,
        GilrsButton::DPadRight => pad.right = pressed,
        GilrsButton::South | GilrsButton::East |
        GilrsButton::West | GilrsButton::North |
        GilrsButton::LeftTrigger | GilrsButton::RightTrigger => pad.fire = pressed,
        _ => {}
    }
}

fn apply_axis(pad: &mut PadState, axis: Axis, value: f32) {
    match axis {
        Axis::LeftStickX  => pad.stick_x = value,
        Axis::LeftStickY  => pad.stick_y = -value,
        Axis::RightStickX => pad.mouse_x = value,
        Axis::RightStickY => pad.mouse_y = -value,
        Axis::DPadX => { pad.left = value < -STICK_DEADZONE; pad.right = value > STICK_DEADZONE; }
        Axis::DPadY => { pad.up = value > STICK_DEADZONE; pad.down = value < -STICK_DEADZONE; }
        _ => {}
    }
}

// ─── Settings file ──────────────────────────────────────────────────────────

struct FileStore {
    path: PathBuf,
}

impl SettingsStore for FileStore {
    fn read(&self) -> ikbd_core::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, record: &[u8]) -> ikbd_core::Result<()> {
        fs::write(&self.path, record)?;
        Ok(())
    }
}

// ─── Main ───────────────────────────────────────────────────────────────────

fn load_firmware(ikbd: &mut Ikbd, path: &Path) -> ikbd_core::Result<usize> {
    let is_hex = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("hex"));
    if is_hex {
        ikbd.load_hex(&fs::read_to_string(path)?)
    } else {
        ikbd.load_rom(&fs::read(path)?)
    }
}

fn run_io(
    mut io: IoCore,
    args: &Args,
    settings: &Settings,
    stop: &AtomicBool,
) {
    let tick = Duration::from_millis(args.io_tick_ms);
    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let reset = io.reset_handle();
    let input = Arc::clone(io.input());
    input.set_mouse_mode(args.mouse);
    let mut host = HostInput::new();
    let mut last_diag = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        if host.poll() {
            tracing::info!("reset requested from gamepad");
            reset.request();
        }
        let (dx, dy) = host.apply(&input, settings);
        if dx != 0 || dy != 0 {
            io.mouse_move(dx, dy);
        }
        io.tick();

        if last_diag.elapsed() >= DIAG_INTERVAL {
            let snap = io.shared().diagnostics.snapshot();
            tracing::debug!(?snap, "diagnostics");
            last_diag = Instant::now();
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            stop.store(true, Ordering::Relaxed);
        }
        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}

fn run(args: Args) -> ikbd_core::Result<()> {
    let config = args.config();
    config.validate()?;

    let mut ikbd = Ikbd::new(config.mode);
    let size = load_firmware(&mut ikbd, &args.firmware)?;
    tracing::info!(
        "loaded {} bytes from {}, reset vector {:04X}, {:?} mode",
        size, args.firmware.display(), ikbd.cpu.pc, ikbd.mode()
    );

    let mut store = args.settings.clone().map(|path| FileStore { path });
    let user_settings = match store.as_ref() {
        Some(s) => settings::load(s)?,
        None => Settings::default(),
    };

    let c = cores(ikbd, &config)?;
    let irq = IrqLock::default();
    let pause = c.io.pause_handle();
    let stop = Arc::new(AtomicBool::new(false));

    let (tx_prod, tx_cons) = HeapRb::<u8>::new(TX_FIFO).split();
    let _receiver = spawn_receiver(c.rx, irq.clone());
    let transmitter = spawn_transmitter(tx_cons, Arc::clone(&stop));
    let emulation = spawn_emulation(c.emulation, FifoTx(tx_prod), Arc::clone(&stop), args.turbo);

    run_io(c.io, &args, &user_settings, &stop);

    if let Some(store) = store.as_mut() {
        // Emulation thread is still running here, so the pause handshake is live
        let timeout = Duration::from_millis(config.pause_timeout_ms);
        settings::save(store, &pause, timeout, &irq, &user_settings)?;
    }
    stop.store(true, Ordering::Relaxed);

    let core = emulation
        .join()
        .map_err(|_| CoreError::Config("emulation thread panicked".into()))?;
    let _ = transmitter.join();
    let snap = core.shared().diagnostics.snapshot();
    tracing::info!(
        cycles = snap.cycles,
        interrupts = snap.interrupts,
        overruns = snap.sci_overruns,
        ring_drops = snap.ring_drops,
        overflow_drops = snap.overflow_drops,
        pause_timeouts = snap.pause_timeouts,
        stalls = snap.stalls,
        "stopped"
    );
    if let Some(pc) = core.ikbd().crashed() {
        tracing::error!("halted at {:04X}\n{}", pc, core.ikbd().dump_regs());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
