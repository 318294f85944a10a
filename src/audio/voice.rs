use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::MediaResult;
use crate::transcode::TranscodeOutput;

/// Señales del sink de reproducción hacia la sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    /// El sink empezó a emitir audio.
    Playing,
    /// El sink se quedó sin datos (fuente terminada o job fallido).
    Idle,
}

/// Capacidad "resolver o unir un canal de voz para una guild".
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Get-or-create: reutiliza la conexión existente de la guild si la hay.
    /// Se resuelve cuando la conexión está lista.
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> MediaResult<Arc<dyn VoiceLink>>;

    /// Destruye la conexión de la guild. Idempotente.
    async fn disconnect(&self, guild: GuildId);
}

/// Conexión de voz lista para recibir audio.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Conecta la salida del transcodificador como fuente de un nuevo sink y
    /// arranca la reproducción. Los cambios del sink se envían a `events`.
    async fn attach(
        &self,
        output: TranscodeOutput,
        events: mpsc::Sender<SinkEvent>,
    ) -> MediaResult<Arc<dyn Player>>;
}

/// Handle del sink activo. `stop` es idempotente.
pub trait Player: Send + Sync {
    fn stop(&self);
}
