use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::CommandOptionType,
        channel::ChannelType,
        id::GuildId,
    },
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![youtube_command()]
}

fn youtube_command() -> CreateCommand {
    CreateCommand::new("youtube")
        .description("Youtube related commands")
        .add_option(play_subcommand())
        .add_option(download_subcommand())
        .add_option(stop_subcommand())
}

fn play_subcommand() -> CreateCommandOption {
    CreateCommandOption::new(
        CommandOptionType::SubCommand,
        "play",
        "Plays the specified youtube video in your current, or provided voice channel",
    )
    .add_sub_option(
        CreateCommandOption::new(
            CommandOptionType::String,
            "url",
            "The url of the youtube video to play",
        )
        .required(true),
    )
    .add_sub_option(
        CreateCommandOption::new(
            CommandOptionType::Channel,
            "channel",
            "The voice channel to play the audio to",
        )
        .channel_types(vec![ChannelType::Voice, ChannelType::Stage]),
    )
}

fn download_subcommand() -> CreateCommandOption {
    CreateCommandOption::new(
        CommandOptionType::SubCommand,
        "download",
        "Downloads the specified youtube video as an mp4",
    )
    .add_sub_option(
        CreateCommandOption::new(
            CommandOptionType::String,
            "url",
            "The url of the youtube video to download",
        )
        .required(true),
    )
    .add_sub_option(
        CreateCommandOption::new(
            CommandOptionType::String,
            "downloadtype",
            "The type of download to perform",
        )
        .add_string_choice("Highest both", "highest")
        .add_string_choice("Highest audio only", "highestaudio")
        .add_string_choice("Highest video only", "highestvideo"),
    )
}

fn stop_subcommand() -> CreateCommandOption {
    CreateCommandOption::new(
        CommandOptionType::SubCommand,
        "stop",
        "Stops any currently playing audio from the play subcommand",
    )
}
