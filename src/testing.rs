//! Dobles de prueba compartidos por los tests de reproducción y descarga.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};

use crate::audio::voice::{Player, SinkEvent, VoiceGateway, VoiceLink};
use crate::error::{MediaError, MediaResult};
use crate::sources::{MediaSource, SourceStream, StreamKind};
use crate::status::{StatusSink, StatusUpdate};
use crate::transcode::TranscodeOutput;

/// Sink que guarda cada actualización en orden.
pub struct RecordingSink {
    updates: watch::Sender<Vec<StatusUpdate>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self {
            updates: watch::channel(Vec::new()).0,
        }
    }
}

impl RecordingSink {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.borrow().clone()
    }

    pub async fn wait_for(&self, update: StatusUpdate) {
        let mut rx = self.updates.subscribe();
        let _ = rx.wait_for(|seen| seen.contains(&update)).await;
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn update(&self, update: StatusUpdate) {
        self.updates.send_modify(|seen| seen.push(update));
    }
}

#[derive(Default)]
struct GatewayCounters {
    connect_delays: Mutex<VecDeque<Duration>>,
    fail_connects: AtomicBool,
    fail_attaches: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    attaches: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Gateway de voz en memoria. Cada `attach` lee la salida del job hasta EOF,
/// emitiendo `Playing` al empezar e `Idle` al terminar.
#[derive(Default)]
pub struct FakeGateway {
    counters: Arc<GatewayCounters>,
}

impl FakeGateway {
    pub fn delay_next_connect(&self, delay: Duration) {
        self.counters.connect_delays.lock().push_back(delay);
    }

    pub fn fail_connects(&self) {
        self.counters.fail_connects.store(true, Ordering::SeqCst);
    }

    /// `connect` sigue funcionando pero cada `attach` falla.
    pub fn fail_attaches(&self) {
        self.counters.fail_attaches.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn attaches(&self) -> usize {
        self.counters.attaches.load(Ordering::SeqCst)
    }

    pub fn active_players(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn max_active_players(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(&self, guild: GuildId, _channel: ChannelId) -> MediaResult<Arc<dyn VoiceLink>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.counters.connect_delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.counters.fail_connects.load(Ordering::SeqCst) {
            return Err(MediaError::ConnectionUnavailable(format!("guild {guild} refused")));
        }
        Ok(Arc::new(FakeLink {
            counters: self.counters.clone(),
        }))
    }

    async fn disconnect(&self, _guild: GuildId) {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeLink {
    counters: Arc<GatewayCounters>,
}

#[async_trait]
impl VoiceLink for FakeLink {
    async fn attach(
        &self,
        mut output: TranscodeOutput,
        events: mpsc::Sender<SinkEvent>,
    ) -> MediaResult<Arc<dyn Player>> {
        if self.counters.fail_attaches.load(Ordering::SeqCst) {
            return Err(MediaError::ConnectionUnavailable("attach refused".to_string()));
        }
        self.counters.attaches.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(now, Ordering::SeqCst);

        tokio::spawn(async move {
            let _ = events.send(SinkEvent::Playing).await;
            let mut sink = Vec::new();
            let _ = output.read_to_end(&mut sink).await;
            let _ = events.send(SinkEvent::Idle).await;
        });

        Ok(Arc::new(FakePlayer {
            counters: self.counters.clone(),
            stopped: AtomicBool::new(false),
        }))
    }
}

struct FakePlayer {
    counters: Arc<GatewayCounters>,
    stopped: AtomicBool,
}

impl Player for FakePlayer {
    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Fuente en memoria. Cada apertura espera el retardo encolado (si lo hay) y
/// entrega unos pocos KiB de silencio.
#[derive(Default)]
pub struct ScriptedSource {
    open_delays: Mutex<VecDeque<Duration>>,
    opens: AtomicUsize,
}

impl ScriptedSource {
    pub fn delay_next_open(&self, delay: Duration) {
        self.open_delays.lock().push_back(delay);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for ScriptedSource {
    async fn open_stream(&self, _video_ref: &str, _kind: StreamKind) -> MediaResult<SourceStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = self.open_delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::pin(Cursor::new(vec![0u8; 4096])))
    }

    async fn title(&self, video_ref: &str) -> MediaResult<String> {
        Ok(video_ref.to_string())
    }
}
