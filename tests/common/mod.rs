// Test doubles for the session's device and transport seams
//
// Every acquisition and release is counted so tests can check that a
// connection leaves nothing behind.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use voice_live::audio::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, ManualClock, NullSink,
    OutputSink, SinkLog,
};
use voice_live::session::{LiveChannel, LiveConnector, LiveSetup, ServerEvent, SessionControl};
use voice_live::{
    event_channels, EncodedAudioBlob, EventReceivers, SessionConfig, SessionState, VoiceSession,
};

#[derive(Debug, Default)]
pub struct Counters {
    pub outputs_opened: AtomicUsize,
    pub captures_opened: AtomicUsize,
    pub captures_started: AtomicUsize,
    pub captures_stopped: AtomicUsize,
    /// Every `stop()` call, including ones on a capture that never started
    pub capture_stop_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub links_opened: AtomicUsize,
    pub links_closed: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Nothing was ever acquired
    pub fn untouched(&self) -> bool {
        Self::get(&self.outputs_opened) == 0
            && Self::get(&self.captures_opened) == 0
            && Self::get(&self.connect_calls) == 0
    }
}

// ============================================================================
// Devices
// ============================================================================

pub struct FakeDevices {
    pub counters: Arc<Counters>,
    pub clock: ManualClock,
    pub sinks: Mutex<Vec<SinkLog>>,
    /// Sender feeding the running fake microphone
    pub microphone: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    pub fail_output: bool,
    pub fail_capture: bool,
    pub hang_capture_start: bool,
}

impl FakeDevices {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self {
            counters,
            clock: ManualClock::new(0.0),
            sinks: Mutex::new(Vec::new()),
            microphone: Arc::new(Mutex::new(None)),
            fail_output: false,
            fail_capture: false,
            hang_capture_start: false,
        }
    }

    pub fn sink_logs(&self) -> Vec<SinkLog> {
        self.sinks.lock().unwrap().clone()
    }

    /// Every output sink ever opened has been closed
    pub fn all_sinks_closed(&self) -> bool {
        self.sink_logs().iter().all(|log| log.is_closed())
    }

    pub fn microphone(&self) -> Option<mpsc::Sender<AudioFrame>> {
        self.microphone.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioDevices for FakeDevices {
    async fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn OutputSink>> {
        if self.fail_output {
            bail!("No output device available");
        }

        self.counters.outputs_opened.fetch_add(1, Ordering::SeqCst);
        let (sink, log) = NullSink::with_log(Arc::new(self.clock.clone()));
        self.sinks.lock().unwrap().push(log);
        Ok(Box::new(sink))
    }

    async fn open_capture(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        if self.fail_capture {
            return Err(anyhow!("Microphone permission denied"));
        }

        self.counters.captures_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            counters: Arc::clone(&self.counters),
            queue_frames: config.queue_frames,
            microphone: Arc::clone(&self.microphone),
            capturing: false,
            hang_start: self.hang_capture_start,
        }))
    }
}

pub struct FakeCapture {
    counters: Arc<Counters>,
    queue_frames: usize,
    microphone: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    capturing: bool,
    hang_start: bool,
}

#[async_trait]
impl AudioBackend for FakeCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.hang_start {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::channel(self.queue_frames.max(1));
        *self.microphone.lock().unwrap() = Some(tx);
        self.capturing = true;
        self.counters.captures_started.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.counters.capture_stop_calls.fetch_add(1, Ordering::SeqCst);
        if !self.capturing {
            bail!("Capture not running");
        }
        self.capturing = false;
        *self.microphone.lock().unwrap() = None;
        self.counters.captures_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake-microphone"
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkBehavior {
    Open,
    Refuse,
    /// Never completes the handshake
    Hang,
    /// Completes the handshake after a delay
    SlowOpen(Duration),
}

/// The remote end of an open fake link
pub struct RemoteEnd {
    pub events: mpsc::Sender<ServerEvent>,
    pub audio: mpsc::Receiver<EncodedAudioBlob>,
    pub setup: LiveSetup,
    pub api_key: String,
}

pub struct FakeConnector {
    pub counters: Arc<Counters>,
    pub behavior: LinkBehavior,
    pub remote: Arc<Mutex<Option<RemoteEnd>>>,
}

impl FakeConnector {
    pub fn new(counters: Arc<Counters>, behavior: LinkBehavior) -> Self {
        Self {
            counters,
            behavior,
            remote: Arc::new(Mutex::new(None)),
        }
    }

    pub fn take_remote(&self) -> Option<RemoteEnd> {
        self.remote.lock().unwrap().take()
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(
        &self,
        api_key: &str,
        setup: &LiveSetup,
        outbound: mpsc::Receiver<EncodedAudioBlob>,
    ) -> Result<LiveChannel> {
        self.counters.connect_calls.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            LinkBehavior::Refuse => bail!("API key not valid"),
            LinkBehavior::Hang => std::future::pending::<()>().await,
            LinkBehavior::SlowOpen(delay) => tokio::time::sleep(delay).await,
            LinkBehavior::Open => {}
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        *self.remote.lock().unwrap() = Some(RemoteEnd {
            events: events_tx,
            audio: outbound,
            setup: setup.clone(),
            api_key: api_key.to_string(),
        });
        self.counters.links_opened.fetch_add(1, Ordering::SeqCst);

        Ok(LiveChannel {
            inbound: events_rx,
            control: Box::new(FakeControl {
                counters: Arc::clone(&self.counters),
                closed: false,
            }),
        })
    }
}

pub struct FakeControl {
    counters: Arc<Counters>,
    closed: bool,
}

#[async_trait]
impl SessionControl for FakeControl {
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            bail!("Live link already closed");
        }
        self.closed = true;
        self.counters.links_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub session: VoiceSession,
    pub events: EventReceivers,
    pub counters: Arc<Counters>,
    pub devices: Arc<FakeDevices>,
    pub connector: Arc<FakeConnector>,
}

pub struct HarnessBuilder {
    api_key: Option<String>,
    behavior: LinkBehavior,
    fail_output: bool,
    fail_capture: bool,
    hang_capture_start: bool,
    config: SessionConfig,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            api_key: Some("test-key".to_string()),
            behavior: LinkBehavior::Open,
            fail_output: false,
            fail_capture: false,
            hang_capture_start: false,
            config: SessionConfig::default(),
        }
    }
}

impl HarnessBuilder {
    pub fn api_key(mut self, key: Option<&str>) -> Self {
        self.api_key = key.map(str::to_string);
        self
    }

    pub fn link(mut self, behavior: LinkBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn fail_output(mut self) -> Self {
        self.fail_output = true;
        self
    }

    pub fn fail_capture(mut self) -> Self {
        self.fail_capture = true;
        self
    }

    pub fn hang_capture_start(mut self) -> Self {
        self.hang_capture_start = true;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let counters = Arc::new(Counters::default());

        let mut devices = FakeDevices::new(Arc::clone(&counters));
        devices.fail_output = self.fail_output;
        devices.fail_capture = self.fail_capture;
        devices.hang_capture_start = self.hang_capture_start;
        let devices = Arc::new(devices);

        let connector = Arc::new(FakeConnector::new(Arc::clone(&counters), self.behavior));

        let (sender, events) = event_channels();
        let session = VoiceSession::new(
            self.config,
            self.api_key,
            devices.clone(),
            connector.clone(),
            sender,
        );

        Harness {
            session,
            events,
            counters,
            devices,
            connector,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// State events emitted so far
    pub fn drain_states(&mut self) -> Vec<SessionState> {
        let mut states = Vec::new();
        while let Ok(state) = self.events.state.try_recv() {
            states.push(state);
        }
        states
    }

    /// Everything the session acquired has been released
    pub fn fully_released(&self) -> bool {
        let c = &self.counters;
        Counters::get(&c.captures_started) == Counters::get(&c.captures_stopped)
            && Counters::get(&c.links_opened) == Counters::get(&c.links_closed)
            && self.devices.all_sinks_closed()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// `seconds` of constant 24kHz audio, encoded as the service sends it
pub fn speech_chunk(seconds: f64) -> EncodedAudioBlob {
    let samples = vec![0.25f32; (seconds * 24000.0) as usize];
    voice_live::audio::encode_pcm(&samples, 24000)
}
