use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    all::{ResolvedOption, ResolvedValue},
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    http::Http,
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::player::PlayRequest,
    bot::TubecastBot,
    download::{DownloadKind, DownloadRequest},
    status::{StatusSink, StatusUpdate},
    ui::embeds,
};

/// Edita la respuesta diferida de una interacción con cada actualización.
pub struct InteractionStatus {
    http: Arc<Http>,
    command: CommandInteraction,
}

impl InteractionStatus {
    pub fn new(http: Arc<Http>, command: CommandInteraction) -> Self {
        Self { http, command }
    }
}

/// Edición de la respuesta con el embed de estado.
fn status_edit(update: &StatusUpdate) -> EditInteractionResponse {
    EditInteractionResponse::new().embed(embeds::status_embed(update))
}

#[async_trait]
impl StatusSink for InteractionStatus {
    async fn update(&self, update: StatusUpdate) {
        if let Err(e) = self.command.edit_response(&self.http, status_edit(&update)).await {
            warn!("⚠️ No se pudo editar la respuesta de /{}: {}", self.command.data.name, e);
        }
    }
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &TubecastBot,
) -> Result<()> {
    info!(
        "📝 Comando /{} usado por {} en guild {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    let subcommand = match command.data.options().first() {
        Some(ResolvedOption {
            name,
            value: ResolvedValue::SubCommand(_),
            ..
        }) if command.data.name == "youtube" => name.to_string(),
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
            return Ok(());
        }
    };

    let result = match subcommand.as_str() {
        "play" => handle_play(ctx, &command, bot).await,
        "download" => handle_download(ctx, &command, bot).await,
        "stop" => handle_stop(ctx, &command, bot).await,
        other => Err(anyhow::anyhow!("Subcomando desconocido: {other}")),
    };

    if let Err(e) = result {
        warn!("❌ Error en /youtube {}: {:?}", subcommand, e);
        let response = EditInteractionResponse::new().content(embeds::GENERIC_FAILURE);
        command.edit_response(&ctx.http, response).await?;
    }

    Ok(())
}

/// Opciones del subcomando invocado.
fn subcommand_options(command: &CommandInteraction) -> Vec<ResolvedOption<'_>> {
    match command.data.options().into_iter().next() {
        Some(ResolvedOption {
            value: ResolvedValue::SubCommand(options),
            ..
        }) => options,
        _ => Vec::new(),
    }
}

fn string_option(options: &[ResolvedOption<'_>], name: &str) -> Option<String> {
    options.iter().find(|opt| opt.name == name).and_then(|opt| match &opt.value {
        ResolvedValue::String(value) => Some(value.to_string()),
        _ => None,
    })
}

fn channel_option(options: &[ResolvedOption<'_>], name: &str) -> Option<ChannelId> {
    options.iter().find(|opt| opt.name == name).and_then(|opt| match &opt.value {
        ResolvedValue::Channel(channel) => Some(channel.id),
        _ => None,
    })
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn reply_guild_only(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(embeds::GUILD_ONLY))
        .await?;
    Ok(())
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &TubecastBot) -> Result<()> {
    defer(ctx, command).await?;

    let Some(guild_id) = command.guild_id else {
        return reply_guild_only(ctx, command).await;
    };
    let options = subcommand_options(command);
    let url = string_option(&options, "url")
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?;

    // Canal explícito o, si no, el canal actual del usuario
    let channel = channel_option(&options, "channel")
        .or_else(|| get_user_voice_channel(ctx, guild_id, command.user.id));

    let status = Arc::new(InteractionStatus::new(ctx.http.clone(), command.clone()));
    // El error ya se reportó por el canal de estado
    let _ = bot
        .playback
        .play(PlayRequest {
            guild: guild_id,
            channel,
            video_ref: url,
            status,
        })
        .await;

    Ok(())
}

async fn handle_download(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &TubecastBot,
) -> Result<()> {
    if !bot.config.can_download(command.user.id.get()) {
        info!("🚫 {} no está autorizado para descargar", command.user.name);
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new().content(embeds::NOT_AUTHORIZED),
                ),
            )
            .await?;
        return Ok(());
    }
    defer(ctx, command).await?;

    let options = subcommand_options(command);
    let url = string_option(&options, "url")
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?;
    let kind = match string_option(&options, "downloadtype") {
        None => DownloadKind::default(),
        Some(value) => match DownloadKind::from_option(&value) {
            Some(kind) => kind,
            None => {
                command
                    .edit_response(
                        &ctx.http,
                        EditInteractionResponse::new().content(embeds::INVALID_DOWNLOAD_TYPE),
                    )
                    .await?;
                return Ok(());
            }
        },
    };

    let status = Arc::new(InteractionStatus::new(ctx.http.clone(), command.clone()));
    let _ = bot
        .downloads
        .run(DownloadRequest {
            video_ref: url.clone(),
            url,
            kind,
            status,
        })
        .await;

    Ok(())
}

async fn handle_stop(ctx: &Context, command: &CommandInteraction, bot: &TubecastBot) -> Result<()> {
    defer(ctx, command).await?;

    let Some(guild_id) = command.guild_id else {
        return reply_guild_only(ctx, command).await;
    };
    let status = InteractionStatus::new(ctx.http.clone(), command.clone());
    bot.playback.stop(guild_id, &status).await;

    Ok(())
}

// Funciones auxiliares

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
