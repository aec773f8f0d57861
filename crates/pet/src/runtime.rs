//! Pet runtime.
//!
//! Wires the engine to an audio output and drives the animation tick on the calling thread.
//! Speech completion waits run on their own threads and report back through the event
//! channel, so the tick never blocks on audio.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::config::PetConfig;
use crate::frames::FrameSink;
use crate::model::HeadlessModel;
use crate::worker::{self, Command, Event};
use pet_engine::engine::PetEngine;
use pet_engine::error::StreamError;
use pet_engine::gesture::ExpressionDispatch;
use pet_engine::playback::{AudioOutput, OutputPlan, output_device_names};
use pet_engine::stream::{SegmentId, StreamingAudioPlayer};

/// Options that do not belong in the config file.
#[derive(Clone, Debug, Default)]
pub struct RuntimeOptions {
    /// Drain speech on a timer instead of opening a device.
    pub headless: bool,
    /// JSON-lines frame dump target.
    pub frames: Option<PathBuf>,
}

/// Print output device names to stdout.
pub fn list_devices() -> Result<()> {
    for (i, name) in output_device_names()?.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Install the Ctrl-C handler. The first signal asks the loop to stop; a second exits.
pub fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let for_signal = flag.clone();
    ctrlc::set_handler(move || {
        if for_signal.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })
    .context("install Ctrl-C handler")?;
    Ok(flag)
}

/// Speech output drained by a timer thread at real-time pace.
pub struct SimulatedOutput {
    player: Arc<StreamingAudioPlayer>,
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SimulatedOutput {
    pub fn new(player: Arc<StreamingAudioPlayer>) -> Self {
        Self {
            player,
            cancel: Arc::new(AtomicBool::new(false)),
            join: None,
        }
    }

    fn ensure_running(&mut self) {
        if self.join.is_some() {
            return;
        }
        self.cancel = Arc::new(AtomicBool::new(false));
        let player = self.player.clone();
        let cancel = self.cancel.clone();
        let block = Duration::from_secs_f64(
            player.block_frames() as f64 / player.sample_rate() as f64,
        );
        self.join = Some(std::thread::spawn(move || {
            let mut buf = vec![0.0f32; player.block_frames()];
            let mut next = Instant::now();
            while !cancel.load(Ordering::Relaxed) {
                player.fill_block(&mut buf);
                next += block;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        }));
        tracing::info!("simulated output started");
    }

    fn halt(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
            tracing::info!("simulated output stopped");
        }
    }
}

/// Where speech audio goes.
pub enum OutputBackend {
    Device(AudioOutput),
    Simulated(SimulatedOutput),
}

impl OutputBackend {
    fn start_stream(&mut self) -> Result<bool> {
        match self {
            OutputBackend::Device(out) => out.start_stream(),
            OutputBackend::Simulated(out) => {
                out.ensure_running();
                Ok(out.player.start_stream())
            }
        }
    }

    fn pause(&mut self) -> Result<bool> {
        match self {
            OutputBackend::Device(out) => out.pause(),
            OutputBackend::Simulated(out) => Ok(out.player.pause()),
        }
    }

    fn resume(&mut self) -> Result<bool> {
        match self {
            OutputBackend::Device(out) => out.resume(),
            OutputBackend::Simulated(out) => {
                out.ensure_running();
                Ok(out.player.resume())
            }
        }
    }

    /// Idempotent.
    fn stop(&mut self) {
        match self {
            OutputBackend::Device(out) => out.stop(),
            OutputBackend::Simulated(out) => {
                out.player.stop();
                out.halt();
            }
        }
    }
}

/// Whether the loop should keep going after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

struct Waiter {
    id: SegmentId,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Engine, headless model, audio output and the outstanding segment waiters.
pub struct Session {
    engine: PetEngine,
    model: HeadlessModel,
    output: OutputBackend,
    events: Sender<Event>,
    waiters: Vec<Waiter>,
    frames: Option<FrameSink>,
    accepted: usize,
    closed: bool,
}

impl Session {
    pub fn new(cfg: &PetConfig, opts: &RuntimeOptions, events: Sender<Event>) -> Result<Self> {
        let registry = cfg.load_registry()?;
        let mut engine_cfg = cfg.engine_config();

        let (player, output) = if opts.headless {
            let player = Arc::new(StreamingAudioPlayer::new(&engine_cfg.audio));
            let output = OutputBackend::Simulated(SimulatedOutput::new(player.clone()));
            (player, output)
        } else {
            let plan = OutputPlan::open(
                cfg.device.as_deref(),
                engine_cfg.audio.sample_rate,
                engine_cfg.audio.block_frames,
            )?;
            if plan.sample_rate() != engine_cfg.audio.sample_rate {
                tracing::info!(
                    configured_hz = engine_cfg.audio.sample_rate,
                    device_hz = plan.sample_rate(),
                    "speech will run at the device rate"
                );
                engine_cfg.audio.sample_rate = plan.sample_rate();
            }
            let player = Arc::new(StreamingAudioPlayer::new(&engine_cfg.audio));
            let output = OutputBackend::Device(AudioOutput::new(player.clone(), plan));
            (player, output)
        };

        let engine = PetEngine::with_player(&engine_cfg, player, registry, cfg.gestures());
        let frames = opts.frames.as_deref().map(FrameSink::open).transpose()?;

        Ok(Self {
            engine,
            model: HeadlessModel::from_config(cfg.model.as_ref()),
            output,
            events,
            waiters: Vec::new(),
            frames,
            accepted: 0,
            closed: false,
        })
    }

    pub fn engine(&self) -> &PetEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PetEngine {
        &mut self.engine
    }

    pub fn model(&self) -> &HeadlessModel {
        &self.model
    }

    /// Segments accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn handle(&mut self, cmd: Command) -> Result<Flow> {
        match cmd {
            Command::StartStream => {
                let started = self.output.start_stream()?;
                self.emit(Event::StreamStarted {
                    already_running: !started,
                });
            }
            Command::Speak { audio } => {
                let result = self.engine.player().add_base64_segment(&audio);
                self.on_submitted(result);
            }
            Command::SpeakFile { path } => match std::fs::read(&path) {
                Ok(bytes) => {
                    let result = self.engine.player().add_segment(&bytes);
                    self.on_submitted(result);
                }
                Err(e) => {
                    tracing::warn!(path = %path, "speech file unreadable: {e}");
                    self.emit(Event::rejected(format!("read {path}: {e}")));
                }
            },
            Command::Expression { name } => {
                let dispatch = self.engine.set_expression(&name);
                self.emit(Event::expression(&name, &dispatch));
            }
            Command::StopExpression => self.engine.stop_expression(),
            Command::Motion { name } => {
                if let Some(motion) = self.engine.launch_motion(&name) {
                    self.emit(Event::Motion {
                        name,
                        group: motion.group,
                        order: motion.order,
                    });
                }
            }
            Command::Pause => {
                let changed = self.output.pause()?;
                self.emit(Event::Paused { changed });
            }
            Command::Resume => {
                let changed = self.output.resume()?;
                self.emit(Event::Resumed { changed });
            }
            Command::Stop => {
                self.output.stop();
                self.emit(Event::Stopped);
            }
            Command::Status => self.emit(Event::Status {
                status: self.engine.status(),
            }),
            Command::Shutdown => return Ok(Flow::Shutdown),
        }
        Ok(Flow::Continue)
    }

    /// One animation tick at `now_ms` on the host clock.
    pub fn tick(&mut self, now_ms: f64) -> Result<()> {
        self.engine.tick(now_ms, &mut self.model);
        if let Some(sink) = self.frames.as_mut() {
            sink.write_frame(now_ms, self.model.values())?;
        }
        Ok(())
    }

    /// Segments whose completion has not been reported yet.
    pub fn pending(&mut self) -> usize {
        let (done, pending): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.join.is_finished());
        for w in done {
            let _ = w.join.join();
        }
        self.waiters = pending;
        self.waiters.len()
    }

    /// Cancel waiters, release the output, flush frames. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for w in &self.waiters {
            w.cancel.store(true, Ordering::Relaxed);
        }
        for w in self.waiters.drain(..) {
            if w.join.join().is_err() {
                tracing::warn!(id = w.id, "segment waiter panicked");
            }
        }
        self.output.stop();
        if let Some(sink) = self.frames.as_mut() {
            if let Err(e) = sink.flush() {
                tracing::warn!("{e:#}");
            }
        }
        tracing::info!("session closed");
    }

    fn on_submitted(&mut self, result: Result<SegmentId, StreamError>) {
        match result {
            Ok(id) => {
                self.accepted += 1;
                let end_time = self
                    .engine
                    .player()
                    .segment(id)
                    .map(|s| s.end_time)
                    .unwrap_or_default();
                self.emit(Event::accepted(id, end_time));
                self.spawn_waiter(id);
            }
            Err(e) => {
                tracing::warn!("segment rejected: {e}");
                self.emit(Event::rejected(e));
            }
        }
    }

    fn spawn_waiter(&mut self, id: SegmentId) {
        let player = self.engine.player().clone();
        let events = self.events.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_for_thread = cancel.clone();
        let join = std::thread::spawn(move || {
            let event = match player.wait_until_finish_or_cancel(id, Some(&cancel_for_thread)) {
                Ok(()) => Event::SegmentFinished {
                    id: worker::wire_id(id),
                },
                // The id was just accepted, so a missing record means a stop cleared it.
                Err(StreamError::Cancelled | StreamError::NotFound(_)) => Event::SegmentCancelled {
                    id: worker::wire_id(id),
                },
                Err(e) => Event::Error {
                    message: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
        self.waiters.push(Waiter { id, cancel, join });
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tick `session` at `period` until `step` or the shutdown flag ends the loop.
///
/// `step` runs before every tick.
pub fn drive<F>(session: &mut Session, period: Duration, shutdown: &AtomicBool, mut step: F) -> Result<()>
where
    F: FnMut(&mut Session) -> Result<Flow>,
{
    let started = Instant::now();
    let mut next = started;
    while !shutdown.load(Ordering::Relaxed) {
        if step(session)? == Flow::Shutdown {
            break;
        }
        session.tick(started.elapsed().as_secs_f64() * 1000.0)?;
        next += period;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            next = now;
        }
    }
    Ok(())
}

/// `run`: JSON-lines commands on stdin, events on stdout.
///
/// Ends on a `shutdown` command, Ctrl-C, or once stdin is closed and all speech has played.
pub fn run_commands(cfg: &PetConfig, opts: &RuntimeOptions, shutdown: Arc<AtomicBool>) -> Result<()> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let writer = worker::spawn_event_writer(std::io::stdout(), event_rx);
    let _reader = worker::spawn_command_reader(std::io::BufReader::new(std::io::stdin()), cmd_tx);

    let mut session = Session::new(cfg, opts, event_tx)?;
    tracing::info!("waiting for commands on stdin");
    let mut input_closed = false;
    let period = cfg.animation.tick_period();
    drive(&mut session, period, &shutdown, |s| {
        drain_commands(s, &cmd_rx, &mut input_closed)
    })?;

    session.shutdown();
    drop(session);
    let _ = writer.join();
    Ok(())
}

fn drain_commands(
    session: &mut Session,
    cmd_rx: &Receiver<Result<Command>>,
    input_closed: &mut bool,
) -> Result<Flow> {
    loop {
        match cmd_rx.try_recv() {
            Ok(Ok(cmd)) => {
                if session.handle(cmd)? == Flow::Shutdown {
                    return Ok(Flow::Shutdown);
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("{e:#}");
                session.emit(Event::Error {
                    message: format!("{e:#}"),
                });
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                if !*input_closed {
                    tracing::info!("command input closed; finishing pending speech");
                    *input_closed = true;
                }
                break;
            }
        }
    }
    if *input_closed && session.pending() == 0 && session.engine().is_settled() {
        return Ok(Flow::Shutdown);
    }
    Ok(Flow::Continue)
}

/// `say`: speak WAV files in order, optionally with an expression.
pub fn run_say(
    cfg: &PetConfig,
    opts: &RuntimeOptions,
    files: &[PathBuf],
    expression: Option<&str>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let writer = worker::spawn_event_writer(std::io::stdout(), event_rx);
    let mut session = Session::new(cfg, opts, event_tx)?;

    session.handle(Command::StartStream)?;
    for file in files {
        session.handle(Command::SpeakFile {
            path: path_arg(file),
        })?;
    }
    if session.accepted() == 0 {
        bail!("none of the {} file(s) could be played", files.len());
    }
    if let Some(name) = expression {
        session.handle(Command::Expression {
            name: name.to_string(),
        })?;
    }

    drive(&mut session, cfg.animation.tick_period(), &shutdown, |s| {
        let expression_playing = s.engine().status().expression.is_some();
        if s.pending() == 0 && !expression_playing {
            Ok(Flow::Shutdown)
        } else {
            Ok(Flow::Continue)
        }
    })?;

    session.shutdown();
    drop(session);
    let _ = writer.join();
    Ok(())
}

/// `play-expression`: play one recorded track and wait for the pose to settle.
pub fn run_play_expression(
    cfg: &PetConfig,
    opts: &RuntimeOptions,
    name: &str,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let writer = worker::spawn_event_writer(std::io::stdout(), event_rx);
    let mut session = Session::new(cfg, opts, event_tx)?;

    match session.engine_mut().set_expression(name) {
        ExpressionDispatch::Recorded => {}
        ExpressionDispatch::Native(order) => {
            bail!("'{name}' is a renderer expression (index {order}); nothing to play headless")
        }
        ExpressionDispatch::Ignored => bail!("unknown expression '{name}'"),
    }

    // Tick once so the rest pose is captured before checking for completion.
    drive(&mut session, cfg.animation.tick_period(), &shutdown, |s| {
        let status = s.engine().status();
        if status.rest_captured && status.settled {
            Ok(Flow::Shutdown)
        } else {
            Ok(Flow::Continue)
        }
    })?;

    session.shutdown();
    drop(session);
    let _ = writer.join();
    Ok(())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
