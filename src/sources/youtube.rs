use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use rusty_ytdl::{Video, VideoError, VideoFormat, VideoOptions, VideoQuality, VideoSearchOptions};
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::{select_encoding, Encoding, MediaSource, SourceStream, StreamKind};
use crate::error::{MediaError, MediaResult};

/// Fuente de YouTube sobre `rusty_ytdl`.
pub struct YouTubeSource {
    max_video_height: u64,
}

impl YouTubeSource {
    pub fn new(max_video_height: u64) -> Self {
        Self { max_video_height }
    }

    /// Extrae el ID de video de una URL de YouTube. Un ID suelto se acepta tal cual.
    pub fn extract_video_id(video_ref: &str) -> MediaResult<String> {
        let video_ref = video_ref.trim();
        if is_bare_video_id(video_ref) {
            return Ok(video_ref.to_string());
        }

        let parsed = url::Url::parse(video_ref)
            .map_err(|e| MediaError::SourceUnavailable(format!("{video_ref}: {e}")))?;

        // youtube.com/watch?v=VIDEO_ID
        if let Some((_, value)) = parsed.query_pairs().find(|(key, _)| key == "v") {
            if is_bare_video_id(&value) {
                return Ok(value.into_owned());
            }
        }

        // youtu.be/VIDEO_ID, youtube.com/shorts/VIDEO_ID, youtube.com/live/VIDEO_ID
        let segments: Vec<&str> = parsed.path_segments().map(|s| s.collect()).unwrap_or_default();
        let candidate = match (parsed.host_str(), segments.as_slice()) {
            (Some("youtu.be"), [id, ..]) => Some(*id),
            (Some(host), ["shorts" | "live" | "embed", id, ..]) if host.ends_with("youtube.com") => {
                Some(*id)
            }
            _ => None,
        };

        candidate
            .filter(|id| is_bare_video_id(id))
            .map(str::to_string)
            .ok_or_else(|| MediaError::SourceUnavailable(format!("not a YouTube video: {video_ref}")))
    }

    fn load(&self, video_id: &str, options: VideoOptions) -> MediaResult<Video> {
        Video::new_with_options(video_id, options).map_err(|e| MediaError::SourceUnavailable(e.to_string()))
    }
}

impl Default for YouTubeSource {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_VIDEO_HEIGHT)
    }
}

fn is_bare_video_id(s: &str) -> bool {
    s.len() == 11 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn describe(format: &VideoFormat) -> Encoding {
    Encoding {
        itag: format.itag,
        has_audio: format.has_audio,
        has_video: format.has_video,
        bitrate: format.bitrate,
        height: format.height,
    }
}

#[async_trait]
impl MediaSource for YouTubeSource {
    async fn open_stream(&self, video_ref: &str, kind: StreamKind) -> MediaResult<SourceStream> {
        let video_id = Self::extract_video_id(video_ref)?;

        let video = self.load(&video_id, VideoOptions::default())?;
        let info = video
            .get_basic_info()
            .await
            .map_err(|e| MediaError::SourceUnavailable(e.to_string()))?;

        let encodings: Vec<Encoding> = info.formats.iter().map(describe).collect();
        let chosen = select_encoding(&encodings, kind, self.max_video_height).ok_or_else(|| {
            warn!("❌ Sin codificación {:?} para {}", kind, video_id);
            MediaError::SourceUnavailable(format!("no {kind:?} encoding for {video_id}"))
        })?;
        let itag = chosen.itag;
        debug!("🎯 {} -> itag {} ({:?})", video_id, itag, kind);

        // Fijar exactamente la codificación elegida
        let options = VideoOptions {
            quality: VideoQuality::Highest,
            filter: VideoSearchOptions::Custom(Arc::new(move |format: &VideoFormat| format.itag == itag)),
            ..Default::default()
        };
        let video = self.load(&video_id, options)?;
        let stream = video
            .stream()
            .await
            .map_err(|e| MediaError::SourceUnavailable(e.to_string()))?;

        info!("📡 Stream {:?} abierto para {}", kind, video_id);
        let reader = StreamReader::new(into_byte_stream(stream));
        Ok(Box::pin(reader))
    }

    async fn title(&self, video_ref: &str) -> MediaResult<String> {
        let video_id = Self::extract_video_id(video_ref)?;
        let video = self.load(&video_id, VideoOptions::default())?;
        let info = video
            .get_basic_info()
            .await
            .map_err(|e| MediaError::SourceUnavailable(e.to_string()))?;
        Ok(info.video_details.title)
    }
}

/// Adapta el stream de `rusty_ytdl` a un `futures::Stream` de bytes.
///
/// Tras el primer error el stream se cierra: no se esperan más chunks válidos.
fn into_byte_stream(
    youtube_stream: Box<dyn rusty_ytdl::stream::Stream + Send>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
    futures::stream::unfold((youtube_stream, false), |(state, errored)| async move {
        if errored {
            return None;
        }
        match state.chunk().await {
            Err(e) => Some((Err(to_io_error(e)), (state, true))),
            Ok(Some(bytes)) => Some((Ok(bytes), (state, false))),
            Ok(None) => None,
        }
    })
}

fn to_io_error(e: VideoError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ids_from_common_url_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "dQw4w9WgXcQ",
        ] {
            assert_eq!(
                YouTubeSource::extract_video_id(url).as_deref(),
                Ok("dQw4w9WgXcQ"),
                "{url}"
            );
        }
    }

    #[test]
    fn rejects_non_video_references() {
        assert!(matches!(
            YouTubeSource::extract_video_id("https://example.com/watch"),
            Err(MediaError::SourceUnavailable(_))
        ));
        assert!(YouTubeSource::extract_video_id("not a url").is_err());
    }
}
