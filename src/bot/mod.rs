//! # Bot Module
//!
//! Discord shell around the media core.
//!
//! This module contains:
//! - Command registration (`/youtube play|download|stop`)
//! - Interaction dispatch to [`handlers`]
//! - The songbird-backed [`voice::SongbirdGateway`]
//!
//! ## Architecture
//!
//! [`TubecastBot`] implements Serenity's [`EventHandler`] trait and owns the
//! two long-lived services:
//!
//! - [`PlaybackService`] for voice sessions (one per guild)
//! - [`DownloadRunner`] for one-shot downloads
//!
//! Every reply goes through a [`StatusSink`](crate::status::StatusSink) that
//! edits the original interaction response.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod voice;

use crate::{audio::player::PlaybackService, config::Config, download::DownloadRunner};

/// Main Discord bot handler.
pub struct TubecastBot {
    /// Configuration loaded from environment variables
    pub config: Arc<Config>,
    pub playback: Arc<PlaybackService>,
    pub downloads: Arc<DownloadRunner>,
}

impl TubecastBot {
    pub fn new(
        config: Arc<Config>,
        playback: Arc<PlaybackService>,
        downloads: Arc<DownloadRunner>,
    ) -> Self {
        Self {
            config,
            playback,
            downloads,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands are registered per-guild when `GUILD_ID` is configured
    /// (instant propagation, useful for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for TubecastBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    /// Handles incoming Discord interactions.
    ///
    /// Errors are logged but don't crash the bot.
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }
}
