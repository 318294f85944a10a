use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::player::DEFAULT_IDLE_TIMEOUT;
use crate::download::DEFAULT_TICK_PERIOD;
use crate::sources::DEFAULT_MAX_VIDEO_HEIGHT;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Transcodificación
    pub ffmpeg_path: PathBuf,
    pub max_video_height: u64,

    // Reproducción
    pub idle_timeout: Duration,

    // Descargas
    pub download_dir: PathBuf,
    pub download_status_interval: Duration,
    pub downloaders: HashSet<u64>, // IDs de usuario autorizados
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Crear el directorio de descargas si no existe
        std::fs::create_dir_all(&config.download_dir).with_context(|| {
            format!("cannot create download dir {}", config.download_dir.display())
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración a partir de una función de búsqueda de
    /// variables (el entorno en producción).
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            // Discord
            discord_token: non_empty("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: non_empty("APPLICATION_ID")
                .context("APPLICATION_ID is not set")?
                .parse()
                .context("APPLICATION_ID must be a numeric id")?,
            guild_id: non_empty("GUILD_ID").and_then(|s| s.parse().ok()),

            // Transcodificación
            ffmpeg_path: non_empty("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            max_video_height: match non_empty("MAX_VIDEO_HEIGHT") {
                Some(val) => val.parse().context("MAX_VIDEO_HEIGHT must be a number")?,
                None => defaults.max_video_height,
            },

            // Reproducción
            idle_timeout: match non_empty("IDLE_TIMEOUT") {
                Some(val) => humantime::parse_duration(&val).context("IDLE_TIMEOUT")?,
                None => defaults.idle_timeout,
            },

            // Descargas
            download_dir: non_empty("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            download_status_interval: match non_empty("DOWNLOAD_STATUS_INTERVAL") {
                Some(val) => {
                    humantime::parse_duration(&val).context("DOWNLOAD_STATUS_INTERVAL")?
                }
                None => defaults.download_status_interval,
            },
            downloaders: match non_empty("DOWNLOADERS") {
                Some(val) => parse_id_list(&val).context("DOWNLOADERS")?,
                None => HashSet::new(),
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Idle timeout and download status interval must be non-zero
    /// - Maximum video height must be at least 144 (smallest YouTube rendition)
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.download_status_interval.is_zero() {
            anyhow::bail!("Download status interval must be greater than 0");
        }

        if self.max_video_height < 144 {
            anyhow::bail!(
                "Max video height must be at least 144, got: {}",
                self.max_video_height
            );
        }

        Ok(())
    }

    pub fn can_download(&self, user_id: u64) -> bool {
        self.downloaders.contains(&user_id)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Transcoder: {} (video <= {}p)\n  \
            Playback: idle timeout {}\n  \
            Downloads: {} every {}, {} authorized user(s)",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.ffmpeg_path.display(),
            self.max_video_height,
            humantime::format_duration(self.idle_timeout),
            self.download_dir.display(),
            humantime::format_duration(self.download_status_interval),
            self.downloaders.len()
        )
    }
}

fn parse_id_list(raw: &str) -> Result<HashSet<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().with_context(|| format!("invalid user id {s:?}")))
        .collect()
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin defaults, deben venir del entorno)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            ffmpeg_path: "ffmpeg".into(),
            max_video_height: DEFAULT_MAX_VIDEO_HEIGHT,

            idle_timeout: DEFAULT_IDLE_TIMEOUT,

            download_dir: "./downloads".into(),
            download_status_interval: DEFAULT_TICK_PERIOD,
            downloaders: HashSet::new(),
        }
    }
}
