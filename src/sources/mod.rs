//! # Sources Module
//!
//! Media Source Adapter: given a video reference and a [`StreamKind`], opens
//! a readable byte stream positioned at the start of the selected track.
//!
//! The platform's stream-selection rules are expressed as a pure function,
//! [`select_encoding`], over [`Encoding`] descriptors so they can be tested
//! without touching the network:
//!
//! - **Audio**: highest-bitrate audio-only encoding
//! - **Video**: highest-resolution video-only encoding at or below the height
//!   cap (1080p by default). Higher resolutions are excluded even when
//!   available, to bound transcode cost.
//!
//! Dropping a [`SourceStream`] closes its network connection.

pub mod youtube;

use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::MediaResult;

pub use youtube::YouTubeSource;

/// Altura máxima por defecto para streams de video.
pub const DEFAULT_MAX_VIDEO_HEIGHT: u64 = 1080;

/// Stream de bytes de una pista remota.
pub type SourceStream = Pin<Box<dyn AsyncRead + Send>>;

/// Pista a seleccionar de un video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    AudioOnly,
    VideoOnly,
}

/// Descriptor de una codificación ofrecida por la plataforma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub itag: u64,
    pub has_audio: bool,
    pub has_video: bool,
    pub bitrate: u64,
    pub height: Option<u64>,
}

/// Aplica la política de selección. `None` equivale a `SourceUnavailable`.
pub fn select_encoding(
    encodings: &[Encoding],
    kind: StreamKind,
    max_video_height: u64,
) -> Option<&Encoding> {
    match kind {
        StreamKind::AudioOnly => encodings
            .iter()
            .filter(|e| e.has_audio && !e.has_video)
            .max_by_key(|e| e.bitrate),
        StreamKind::VideoOnly => encodings
            .iter()
            .filter(|e| e.has_video && !e.has_audio)
            .filter(|e| matches!(e.height, Some(h) if h <= max_video_height))
            // A igual resolución gana el de mayor bitrate
            .max_by_key(|e| (e.height, e.bitrate)),
    }
}

/// Trait común para fuentes de medios.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Abre el stream de la pista seleccionada.
    async fn open_stream(&self, video_ref: &str, kind: StreamKind) -> MediaResult<SourceStream>;

    /// Título legible del video (para nombres de archivo).
    async fn title(&self, video_ref: &str) -> MediaResult<String>;
}
