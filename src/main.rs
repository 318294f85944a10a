use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod download;
mod error;
mod sources;
mod status;
mod transcode;
mod ui;

#[cfg(test)]
mod testing;

use crate::audio::{player::PlaybackService, registry::SessionRegistry};
use crate::bot::{voice::SongbirdGateway, TubecastBot};
use crate::config::Config;
use crate::download::DownloadRunner;
use crate::sources::YouTubeSource;
use crate::transcode::TranscodeSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tubecast=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Tubecast v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config.ffmpeg_path).await;
    }

    let config = Arc::new(config);
    let source = Arc::new(YouTubeSource::new(config.max_video_height));
    let supervisor = TranscodeSupervisor::new(config.ffmpeg_path.clone());

    // Songbird se crea antes del cliente para compartirlo con el gateway de voz
    let songbird = Songbird::serenity();
    let playback = PlaybackService::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(SongbirdGateway::new(songbird.clone())),
        source.clone(),
        supervisor.clone(),
    )
    .with_idle_timeout(config.idle_timeout);
    let downloads = DownloadRunner::new(source, supervisor, config.download_dir.clone())
        .with_tick_period(config.download_status_interval);

    // Intents mínimos: slash commands y estados de voz
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = TubecastBot::new(config.clone(), Arc::new(playback), Arc::new(downloads));

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(ffmpeg: &Path) -> Result<()> {
    // Verificar dependencias críticas
    let output = tokio::process::Command::new(ffmpeg)
        .arg("-version")
        .output()
        .await?;

    if output.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("ffmpeg no disponible en {}", ffmpeg.display());
    }
}
