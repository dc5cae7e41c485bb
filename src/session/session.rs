use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::link::{LiveChannel, LiveConnector, LiveSetup, ServerEvent, SessionControl};
use super::state::SessionState;
use super::stats::SessionStats;
use crate::audio::pcm::EncodedAudioBlob;
use crate::audio::{AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame};
use crate::capture::{CaptureConfig, CapturePipeline, CaptureStats};
use crate::error::SessionError;
use crate::events::EventSender;
use crate::playback::{PlaybackConfig, PlaybackScheduler};
use crate::transcript::{Role, TranscriptMessage};

/// How often finished speech units are reaped while the link is quiet
const REAP_INTERVAL: Duration = Duration::from_millis(250);

/// A voice session: one connection at a time to the live service
///
/// Cloning yields another handle to the same session. Every state change is
/// published on the state event channel in the order it happens.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,

    /// API key read at startup; `None` fails every connect up front
    api_key: Option<String>,

    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn LiveConnector>,
    events: EventSender,

    state: StdMutex<SessionState>,

    /// Bumped by every connect and disconnect; a connection only acts while
    /// its epoch is current
    epoch: watch::Sender<u64>,

    active: Mutex<Option<ActiveConnection>>,

    connected_at: StdMutex<Option<DateTime<Utc>>>,
    last_error: StdMutex<Option<String>>,
}

/// Everything one open connection holds
struct ActiveConnection {
    epoch: u64,
    control: Box<dyn SessionControl>,
    capture: Box<dyn AudioBackend>,
    scheduler: Arc<StdMutex<PlaybackScheduler>>,
    capture_stats: Arc<CaptureStats>,
    capture_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

/// Resources acquired so far by a connect in progress
#[derive(Default)]
struct Pending {
    scheduler: Option<PlaybackScheduler>,
    capture: Option<Box<dyn AudioBackend>>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    outbound: Option<mpsc::Sender<EncodedAudioBlob>>,
    channel: Option<LiveChannel>,
}

struct Established {
    scheduler: PlaybackScheduler,
    capture: Box<dyn AudioBackend>,
    frames: mpsc::Receiver<AudioFrame>,
    outbound: mpsc::Sender<EncodedAudioBlob>,
    channel: LiveChannel,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        api_key: Option<String>,
        devices: Arc<dyn AudioDevices>,
        connector: Arc<dyn LiveConnector>,
        events: EventSender,
    ) -> Self {
        let (epoch, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                config,
                api_key: api_key.filter(|key| !key.trim().is_empty()),
                devices,
                connector,
                events,
                state: StdMutex::new(SessionState::Disconnected),
                epoch,
                active: Mutex::new(None),
                connected_at: StdMutex::new(None),
                last_error: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// Message of the last failure, if the last connection ended in one
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    /// Open a connection: output device, microphone, then the live link
    ///
    /// Rejected while connecting or connected. A missing API key moves the
    /// session to `Error` before any device is touched. Device and transport
    /// failures move it to `Error`, release what was acquired and end in
    /// `Disconnected`. A `disconnect()` during the attempt returns
    /// [`SessionError::Cancelled`].
    pub async fn connect(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let (epoch, api_key) = inner.begin_connect()?;

        // A connection that ended in Error may still hold resources
        let stale = inner.active.lock().await.take();
        if let Some(stale) = stale {
            stale.release().await;
        }

        let mut pending = Pending::default();
        let outcome = tokio::select! {
            result = inner.establish(&api_key, &mut pending) => Some(result),
            _ = superseded(inner.epoch.subscribe(), epoch) => None,
        };

        match outcome {
            Some(Ok(())) => Arc::clone(inner).activate(epoch, pending).await,

            Some(Err(err)) => {
                if inner.transition_if_current(epoch, SessionState::Error) {
                    error!("Failed to connect: {}", err);
                    *lock(&inner.last_error) = Some(err.to_string());
                    pending.release().await;
                    inner.transition_if_current(epoch, SessionState::Disconnected);
                    Err(err)
                } else {
                    pending.release().await;
                    Err(SessionError::Cancelled)
                }
            }

            None => {
                info!("Connect cancelled by disconnect");
                pending.release().await;
                Err(SessionError::Cancelled)
            }
        }
    }

    /// Release everything and end in `Disconnected`
    ///
    /// Safe from any state, including mid-connect; calling it twice is a
    /// no-op apart from the repeated `Disconnected` event. Release failures
    /// are logged, never returned.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let previous = inner.bump_epoch();
        info!("Disconnecting (state: {})", previous);

        let active = inner.active.lock().await.take();
        if let Some(active) = active {
            active.release().await;
        }

        *lock(&inner.connected_at) = None;
        inner.events.level(0.0);
        inner.set_state(SessionState::Disconnected);

        info!("Disconnected");
    }

    /// Connect when idle or failed, disconnect when connecting or connected
    pub async fn toggle_connection(&self) -> Result<(), SessionError> {
        if self.state().is_active() {
            self.disconnect().await;
            Ok(())
        } else {
            self.connect().await
        }
    }

    /// Get current session statistics
    pub async fn get_stats(&self) -> SessionStats {
        let connected_at = *lock(&self.inner.connected_at);
        let duration_secs = connected_at
            .map(|at| Utc::now().signed_duration_since(at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let mut stats = SessionStats {
            state: self.state(),
            connected_at,
            duration_secs,
            frames_sent: 0,
            frames_dropped: 0,
            active_units: 0,
            chunks_dropped: 0,
            last_error: self.last_error(),
        };

        let active = self.inner.active.lock().await;
        if let Some(active) = active.as_ref() {
            stats.frames_sent = active.capture_stats.sent();
            stats.frames_dropped = active.capture_stats.dropped();

            let scheduler = lock(&active.scheduler);
            stats.active_units = scheduler.active_count();
            stats.chunks_dropped = scheduler.dropped_chunks();
        }

        stats
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        Self::apply_state(&self.events, &mut state, next);
    }

    fn apply_state(events: &EventSender, state: &mut SessionState, next: SessionState) {
        debug!("Session state: {} -> {}", state, next);
        *state = next;
        events.state(next);
    }

    /// Change state only if no connect or disconnect has happened since `epoch`
    fn transition_if_current(&self, epoch: u64, next: SessionState) -> bool {
        let mut state = lock(&self.state);
        if self.current_epoch() != epoch {
            return false;
        }
        Self::apply_state(&self.events, &mut state, next);
        true
    }

    fn bump_epoch(&self) -> SessionState {
        let state = lock(&self.state);
        self.epoch.send_modify(|epoch| *epoch += 1);
        *state
    }

    /// Check preconditions and move to `Connecting`
    fn begin_connect(&self) -> Result<(u64, String), SessionError> {
        let mut state = lock(&self.state);

        if state.is_active() {
            warn!("Connect ignored: session is already {}", state);
            return Err(SessionError::AlreadyActive);
        }

        let Some(api_key) = self.api_key.clone() else {
            error!("Cannot connect: API key is missing");
            *lock(&self.last_error) = Some(SessionError::MissingCredential.to_string());
            Self::apply_state(&self.events, &mut state, SessionState::Error);
            return Err(SessionError::MissingCredential);
        };

        self.epoch.send_modify(|epoch| *epoch += 1);
        *lock(&self.last_error) = None;
        Self::apply_state(&self.events, &mut state, SessionState::Connecting);

        Ok((self.current_epoch(), api_key))
    }

    /// Acquire devices and open the link, recording each resource in `pending`
    async fn establish(&self, api_key: &str, pending: &mut Pending) -> Result<(), SessionError> {
        let config = &self.config;
        info!("Connecting voice session (model: {})", config.model);

        let sink = self
            .devices
            .open_output(config.output_sample_rate)
            .await
            .map_err(SessionError::device)?;
        info!("Output opened: {}", sink.name());

        let playback = PlaybackConfig {
            sample_rate: config.output_sample_rate,
            level_stride: config.playback_level_stride,
            level_gain: config.level_gain,
        };
        pending.scheduler = Some(PlaybackScheduler::new(playback, sink, self.events.clone()));

        let backend_config = AudioBackendConfig {
            target_sample_rate: config.input_sample_rate,
            frame_size: config.frame_size,
            queue_frames: config.outbound_queue_frames,
        };
        let capture = self
            .devices
            .open_capture(&backend_config)
            .await
            .map_err(SessionError::device)?;
        let capture = pending.capture.insert(capture);
        let frames = capture.start().await.map_err(SessionError::device)?;
        info!("Capture started: {}", capture.name());
        pending.frames = Some(frames);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_frames.max(1));
        pending.outbound = Some(outbound_tx);

        let channel = self
            .connector
            .connect(api_key, &LiveSetup::from(config), outbound_rx)
            .await
            .map_err(SessionError::transport)?;
        pending.channel = Some(channel);

        Ok(())
    }

    /// Start the pipelines on an established link and move to `Connected`
    async fn activate(self: Arc<Self>, epoch: u64, mut pending: Pending) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;

        let Some(established) = pending.take_established() else {
            drop(active);
            pending.release().await;
            return Err(SessionError::Transport("link was not fully established".to_string()));
        };

        if !self.transition_if_current(epoch, SessionState::Connected) {
            drop(active);
            info!("Connect cancelled by disconnect");
            Pending::from(established).release().await;
            return Err(SessionError::Cancelled);
        }

        let Established {
            scheduler,
            capture,
            mut frames,
            outbound,
            channel,
        } = established;
        let LiveChannel { inbound, control } = channel;

        let pipeline = CapturePipeline::new(
            CaptureConfig {
                sample_rate: self.config.input_sample_rate,
                level_stride: self.config.capture_level_stride,
                level_gain: self.config.level_gain,
            },
            outbound,
            self.events.clone(),
        );
        let capture_stats = pipeline.stats();

        // Audio recorded during the handshake is stale
        let mut stale = 0u64;
        while frames.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} frames captured before the link opened", stale);
            capture_stats.frames_dropped.fetch_add(stale, Ordering::Relaxed);
        }

        let capture_task = pipeline.spawn(frames);

        let scheduler = Arc::new(StdMutex::new(scheduler));
        let dispatch_task = tokio::spawn(dispatch_loop(
            Arc::downgrade(&self),
            epoch,
            inbound,
            Arc::clone(&scheduler),
            self.events.clone(),
        ));

        *active = Some(ActiveConnection {
            epoch,
            control,
            capture,
            scheduler,
            capture_stats,
            capture_task,
            dispatch_task,
        });
        *lock(&self.connected_at) = Some(Utc::now());

        info!("Voice session connected");
        Ok(())
    }

    /// Tear down after the link ended on its own
    async fn end_connection(self: Arc<Self>, epoch: u64, failure: Option<String>) {
        let connection = {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|c| c.epoch == epoch) {
                active.take()
            } else {
                None
            }
        };

        // disconnect() got there first
        let Some(connection) = connection else {
            return;
        };

        if let Some(message) = failure {
            error!("Live link failed: {}", message);
            *lock(&self.last_error) = Some(message);
            self.transition_if_current(epoch, SessionState::Error);
        } else {
            info!("Live link closed by remote");
        }

        connection.release().await;

        *lock(&self.connected_at) = None;
        self.events.level(0.0);
        self.transition_if_current(epoch, SessionState::Disconnected);
    }
}

impl Pending {
    fn take_established(&mut self) -> Option<Established> {
        let complete = self.scheduler.is_some()
            && self.capture.is_some()
            && self.frames.is_some()
            && self.outbound.is_some()
            && self.channel.is_some();
        if !complete {
            return None;
        }

        Some(Established {
            scheduler: self.scheduler.take()?,
            capture: self.capture.take()?,
            frames: self.frames.take()?,
            outbound: self.outbound.take()?,
            channel: self.channel.take()?,
        })
    }

    /// Best-effort release of whatever was acquired, newest first
    async fn release(self) {
        if let Some(mut channel) = self.channel {
            if let Err(e) = channel.control.close().await {
                warn!("Failed to close live link: {:#}", e);
            }
        }

        drop(self.outbound);
        drop(self.frames);

        if let Some(mut capture) = self.capture {
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop capture: {:#}", e);
            }
        }

        if let Some(scheduler) = self.scheduler {
            shutdown_scheduler(scheduler);
        }
    }
}

impl From<Established> for Pending {
    fn from(established: Established) -> Self {
        Self {
            scheduler: Some(established.scheduler),
            capture: Some(established.capture),
            frames: Some(established.frames),
            outbound: Some(established.outbound),
            channel: Some(established.channel),
        }
    }
}

impl ActiveConnection {
    /// Best-effort release of everything the connection holds
    async fn release(mut self) {
        info!("Releasing connection resources");

        if let Err(e) = self.control.close().await {
            warn!("Failed to close live link: {:#}", e);
        }

        self.dispatch_task.abort();
        self.capture_task.abort();

        if let Err(e) = self.capture.stop().await {
            warn!("Failed to stop capture: {:#}", e);
        }

        let mut scheduler = lock(&self.scheduler);
        if let Err(e) = scheduler.shutdown() {
            warn!("Failed to close output: {:#}", e);
        }
    }
}

fn shutdown_scheduler(mut scheduler: PlaybackScheduler) {
    if let Err(e) = scheduler.shutdown() {
        warn!("Failed to close output: {:#}", e);
    }
}

/// Resolves once `epoch` is no longer current
async fn superseded(mut epoch_rx: watch::Receiver<u64>, epoch: u64) {
    loop {
        if *epoch_rx.borrow_and_update() != epoch {
            return;
        }
        if epoch_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Route inbound events until the link ends, then hand off teardown
async fn dispatch_loop(
    session: Weak<Inner>,
    epoch: u64,
    mut inbound: mpsc::Receiver<ServerEvent>,
    scheduler: Arc<StdMutex<PlaybackScheduler>>,
    events: EventSender,
) {
    info!("Dispatch task started");

    let mut reap = tokio::time::interval(REAP_INTERVAL);
    reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut model_turn_open = false;

    let failure = loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(ServerEvent::AudioChunk(blob)) => {
                    lock(&scheduler).enqueue(&blob);
                }
                Some(ServerEvent::Interrupted) => {
                    let stopped = lock(&scheduler).interrupt();
                    info!("Model interrupted, stopped {} queued units", stopped);
                }
                Some(ServerEvent::Transcript { role, text, partial }) => {
                    if role == Role::Model {
                        model_turn_open = partial;
                    }
                    events.transcript(TranscriptMessage::new(role, text, partial));
                }
                Some(ServerEvent::TurnComplete) => {
                    // Finalize a model message still marked partial
                    if model_turn_open {
                        events.transcript(TranscriptMessage::new(Role::Model, "", false));
                        model_turn_open = false;
                    }
                }
                Some(ServerEvent::Error(message)) => break Some(message),
                Some(ServerEvent::Closed(reason)) => {
                    debug!("Remote close: {}", reason.as_deref().unwrap_or("no reason"));
                    break None;
                }
                None => break None,
            },
            _ = reap.tick() => {
                lock(&scheduler).reap_finished();
            }
        }
    };

    info!("Dispatch task stopped");

    // Teardown aborts this task, so it runs on its own
    if let Some(session) = session.upgrade() {
        tokio::spawn(session.end_connection(epoch, failure));
    }
}
