//! Conexiones de voz sobre songbird.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::{AsyncAdapterStream, AsyncMediaSource, AudioStreamError, Input, RawAdapter};
use songbird::tracks::TrackHandle;
use songbird::{Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::audio::voice::{Player, SinkEvent, VoiceGateway, VoiceLink};
use crate::error::{MediaError, MediaResult};
use crate::transcode::TranscodeOutput;

/// Frecuencia y canales del PCM que produce el perfil de voz.
const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;

/// Buffer entre la tarea async que lee ffmpeg y el mezclador de songbird.
const ADAPTER_BUFFER: usize = 64 * 1024;

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> MediaResult<Arc<dyn VoiceLink>> {
        // Reutilizar la conexión si ya está en el canal pedido
        if let Some(call) = self.manager.get(guild) {
            let current = call.lock().await.current_channel();
            if current == Some(channel.into()) {
                debug!("🔊 Reutilizando conexión de voz en guild {}", guild);
                return Ok(Arc::new(SongbirdLink { call }));
            }
        }

        let call = self.manager.join(guild, channel).await.map_err(|e| {
            warn!("❌ No se pudo unir al canal {} en guild {}: {}", channel, guild, e);
            MediaError::ConnectionUnavailable(e.to_string())
        })?;
        info!("🔊 Conectado al canal de voz {} en guild {}", channel, guild);

        Ok(Arc::new(SongbirdLink { call }))
    }

    async fn disconnect(&self, guild: GuildId) {
        match self.manager.remove(guild).await {
            Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", guild),
            // Ya no había conexión
            Err(e) => debug!("remove en guild {}: {}", guild, e),
        }
    }
}

struct SongbirdLink {
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn attach(
        &self,
        output: TranscodeOutput,
        events: mpsc::Sender<SinkEvent>,
    ) -> MediaResult<Arc<dyn Player>> {
        let stream = AsyncAdapterStream::new(Box::new(PcmOutput(output)), ADAPTER_BUFFER);
        let input: Input = RawAdapter::new(stream, SAMPLE_RATE, CHANNELS).into();

        let track = self.call.lock().await.play_only_input(input);

        let forwards = [
            (TrackEvent::Play, SinkEvent::Playing),
            (TrackEvent::End, SinkEvent::Idle),
            (TrackEvent::Error, SinkEvent::Idle),
        ];
        for (trigger, event) in forwards {
            track
                .add_event(
                    Event::Track(trigger),
                    SinkForwarder {
                        events: events.clone(),
                        event,
                    },
                )
                .map_err(|e| MediaError::ConnectionUnavailable(e.to_string()))?;
        }

        Ok(Arc::new(SongbirdPlayer { track }))
    }
}

struct SongbirdPlayer {
    track: TrackHandle,
}

impl Player for SongbirdPlayer {
    fn stop(&self) {
        // Falla sólo si la pista ya terminó
        if let Err(e) = self.track.stop() {
            debug!("stop de pista {}: {}", self.track.uuid(), e);
        }
    }
}

/// Reenvía eventos de la pista a la tarea de la sesión.
struct SinkForwarder {
    events: mpsc::Sender<SinkEvent>,
    event: SinkEvent,
}

#[async_trait]
impl VoiceEventHandler for SinkForwarder {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        // La sesión pudo haber terminado ya
        let _ = self.events.send(self.event).await;
        None
    }
}

/// Salida PCM de ffmpeg como fuente no buscable para songbird.
struct PcmOutput(TranscodeOutput);

impl AsyncRead for PcmOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncSeek for PcmOutput {
    fn start_seek(self: Pin<&mut Self>, _position: SeekFrom) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Err(io::ErrorKind::Unsupported.into()))
    }
}

#[async_trait]
impl AsyncMediaSource for PcmOutput {
    fn is_seekable(&self) -> bool {
        false
    }

    async fn byte_len(&self) -> Option<u64> {
        None
    }

    async fn try_resume(
        &mut self,
        _offset: u64,
    ) -> Result<Box<dyn AsyncMediaSource>, AudioStreamError> {
        Err(AudioStreamError::Unsupported)
    }
}
