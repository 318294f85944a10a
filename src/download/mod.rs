//! # Download Module
//!
//! Download Job Runner: one-shot transcode of a video into a file under the
//! download directory, with a periodic liveness ticker.
//!
//! ## Flow
//!
//! 1. `DownloadStarted` is reported
//! 2. The title is resolved and sanitized into the file stem
//! 3. One (`AudioOnly`, `VideoOnly`) or two (`Combined`) source streams are
//!    opened and handed to the [`TranscodeSupervisor`]
//! 4. A ticker posts a cosmetic line every period while the job runs
//! 5. Once the job settles the ticker is stopped and joined, then exactly one
//!    final report (`DownloadComplete` or `Failed`) is sent
//!
//! Downloads never touch the session registry.

pub mod ticker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::sources::{MediaSource, SourceStream, StreamKind, YouTubeSource};
use crate::status::{StatusSink, StatusUpdate};
use crate::transcode::{JobState, OutputTarget, TranscodeProfile, TranscodeSupervisor};

pub use ticker::{TickerTier, DEFAULT_TICK_PERIOD};

/// Tipo de descarga pedido por el usuario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DownloadKind {
    /// Mejor audio + mejor video (≤ altura máxima) multiplexados.
    #[default]
    Combined,
    AudioOnly,
    VideoOnly,
}

impl DownloadKind {
    /// Valor de la opción `downloadtype` del comando.
    pub fn from_option(value: &str) -> Option<Self> {
        match value {
            "highest" => Some(Self::Combined),
            "highestaudio" => Some(Self::AudioOnly),
            "highestvideo" => Some(Self::VideoOnly),
            _ => None,
        }
    }

    /// Pistas a abrir, en el orden de los descriptores del perfil.
    pub fn stream_kinds(self) -> &'static [StreamKind] {
        match self {
            Self::Combined => &[StreamKind::AudioOnly, StreamKind::VideoOnly],
            Self::AudioOnly => &[StreamKind::AudioOnly],
            Self::VideoOnly => &[StreamKind::VideoOnly],
        }
    }
}

pub struct DownloadRequest {
    pub video_ref: String,
    /// URL mostrada en los mensajes de estado.
    pub url: String,
    pub kind: DownloadKind,
    pub status: Arc<dyn StatusSink>,
}

/// Perfiles de ffmpeg por tipo de descarga.
#[derive(Debug, Clone)]
struct DownloadProfiles {
    combined: TranscodeProfile,
    audio: TranscodeProfile,
    video: TranscodeProfile,
}

impl Default for DownloadProfiles {
    fn default() -> Self {
        Self {
            combined: TranscodeProfile::download_combined(),
            audio: TranscodeProfile::download_audio(),
            video: TranscodeProfile::download_video(),
        }
    }
}

impl DownloadProfiles {
    fn for_kind(&self, kind: DownloadKind) -> &TranscodeProfile {
        match kind {
            DownloadKind::Combined => &self.combined,
            DownloadKind::AudioOnly => &self.audio,
            DownloadKind::VideoOnly => &self.video,
        }
    }

    fn for_kind_mut(&mut self, kind: DownloadKind) -> &mut TranscodeProfile {
        match kind {
            DownloadKind::Combined => &mut self.combined,
            DownloadKind::AudioOnly => &mut self.audio,
            DownloadKind::VideoOnly => &mut self.video,
        }
    }
}

pub struct DownloadRunner {
    source: Arc<dyn MediaSource>,
    supervisor: TranscodeSupervisor,
    download_dir: PathBuf,
    tick_period: Duration,
    profiles: DownloadProfiles,
}

impl DownloadRunner {
    pub fn new(
        source: Arc<dyn MediaSource>,
        supervisor: TranscodeSupervisor,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            supervisor,
            download_dir: download_dir.into(),
            tick_period: DEFAULT_TICK_PERIOD,
            profiles: DownloadProfiles::default(),
        }
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_profile(mut self, kind: DownloadKind, profile: TranscodeProfile) -> Self {
        *self.profiles.for_kind_mut(kind) = profile;
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Ejecuta la descarga hasta el final. El resultado también se reporta
    /// una sola vez por `request.status`.
    pub async fn run(&self, request: DownloadRequest) -> MediaResult<PathBuf> {
        let status = request.status.clone();
        let url = request.url.clone();
        status
            .update(StatusUpdate::DownloadStarted { url: url.clone() })
            .await;

        let result = self.execute(request).await;
        match &result {
            Ok(path) => {
                info!("💾 Descarga completa: {}", path.display());
                status
                    .update(StatusUpdate::DownloadComplete {
                        url,
                        path: path.clone(),
                    })
                    .await;
            }
            Err(e) => {
                warn!("❌ Descarga fallida para {}: {}", url, e);
                status.update(StatusUpdate::Failed(e.clone())).await;
            }
        }
        result
    }

    async fn execute(&self, request: DownloadRequest) -> MediaResult<PathBuf> {
        let DownloadRequest {
            video_ref,
            url,
            kind,
            status,
        } = request;

        let title = self.source.title(&video_ref).await?;
        let profile = self.profiles.for_kind(kind);
        let target = self.target_path(&title, &video_ref, profile)?;
        tokio::fs::create_dir_all(&self.download_dir).await?;

        let mut inputs: Vec<SourceStream> = Vec::with_capacity(kind.stream_kinds().len());
        for stream_kind in kind.stream_kinds() {
            inputs.push(self.source.open_stream(&video_ref, *stream_kind).await?);
        }

        info!(
            "⬇️ Descargando {:?} de {} en {}",
            kind,
            video_ref,
            target.display()
        );
        let job = self
            .supervisor
            .start(profile, inputs, OutputTarget::File(target.clone()))?;

        let completed = Arc::new(AtomicBool::new(false));
        let stop = CancellationToken::new();
        let ticker = tokio::spawn(ticker::run_ticker(
            self.tick_period,
            url,
            status,
            completed.clone(),
            stop.clone(),
        ));

        let outcome = job.wait().await;

        // Ningún tick puede llegar después del reporte final
        completed.store(true, Ordering::SeqCst);
        stop.cancel();
        if let Err(e) = ticker.await {
            error!("Ticker de descarga terminó con error: {}", e);
        }

        match outcome {
            JobState::Succeeded => Ok(target),
            JobState::Failed(e) => Err(e),
            JobState::Cancelled | JobState::Running => Err(MediaError::TranscodeFailed(
                "download job was interrupted".to_string(),
            )),
        }
    }

    fn target_path(&self, title: &str, video_ref: &str, profile: &TranscodeProfile) -> MediaResult<PathBuf> {
        let extension = profile.extension().ok_or_else(|| {
            MediaError::Spawn(format!("profile {} does not write to a file", profile.name))
        })?;
        let id = YouTubeSource::extract_video_id(video_ref).unwrap_or_else(|_| video_ref.to_string());
        let stem = file_stem(title, &id);
        Ok(self.download_dir.join(format!("{stem}.{extension}")))
    }
}

/// Conserva sólo letras y números Unicode.
pub fn sanitize(name: &str) -> String {
    name.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Nombre base del archivo: título saneado, luego id saneado, luego `download`.
pub fn file_stem(title: &str, video_id: &str) -> String {
    [sanitize(title), sanitize(video_id)]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string())
}
