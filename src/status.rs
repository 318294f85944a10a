//! Canal de estado hacia el usuario que hizo la solicitud.
//!
//! El núcleo nunca habla con Discord directamente: cada solicitud lleva un
//! [`StatusSink`] y emite [`StatusUpdate`]s. La capa `bot` lo implementa
//! editando la respuesta de la interacción; los tests lo implementan en memoria.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::MediaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// La solicitud de reproducción fue aceptada y el transcodificador arrancó.
    Attempting,
    /// El sink empezó a emitir audio. Se emite una sola vez por sesión.
    NowPlaying,
    /// Se detuvo la sesión y se abandonó el canal de voz.
    Stopped,
    /// `stop` sin sesión activa.
    NothingPlaying,
    DownloadStarted { url: String },
    /// Línea cosmética del ticker de descargas.
    StillWorking { line: String, url: String },
    DownloadComplete { url: String, path: PathBuf },
    Failed(MediaError),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update(&self, update: StatusUpdate);
}
