use serenity::{all::Colour, builder::CreateEmbed};

use crate::status::StatusUpdate;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

pub const NOT_AUTHORIZED: &str = "You are not authorized to use this command.";
pub const GUILD_ONLY: &str = "You must use this command in a guild!";
pub const GENERIC_FAILURE: &str = "Sorry, there was an error running your command.";
pub const INVALID_DOWNLOAD_TYPE: &str = "The download type provided is invalid.";

/// Texto que ve el usuario para cada actualización de estado.
pub fn status_text(update: &StatusUpdate) -> String {
    match update {
        StatusUpdate::Attempting => "Attempting to play audio...".to_string(),
        StatusUpdate::NowPlaying => "Playing audio...".to_string(),
        StatusUpdate::Stopped => "Stopping any audio and leaving voice...".to_string(),
        StatusUpdate::NothingPlaying => "There is no audio playing in this guild!".to_string(),
        StatusUpdate::DownloadStarted { url } => format!("Attempting to download: {url}"),
        StatusUpdate::StillWorking { line, url } => format!("{line} {url}"),
        StatusUpdate::DownloadComplete { url, .. } => format!("Your download is complete! {url}"),
        StatusUpdate::Failed(e) => e.user_message().to_string(),
    }
}

fn status_colour(update: &StatusUpdate) -> Colour {
    match update {
        StatusUpdate::NowPlaying => colors::MUSIC_PURPLE,
        StatusUpdate::DownloadComplete { .. } => colors::SUCCESS_GREEN,
        StatusUpdate::StillWorking { .. } | StatusUpdate::NothingPlaying => colors::WARNING_ORANGE,
        StatusUpdate::Failed(_) => colors::ERROR_RED,
        _ => colors::INFO_BLUE,
    }
}

/// Embed compacto con el mismo texto, coloreado según el tipo de evento.
pub fn status_embed(update: &StatusUpdate) -> CreateEmbed {
    CreateEmbed::default()
        .description(status_text(update))
        .color(status_colour(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn playback_messages() {
        assert_eq!(status_text(&StatusUpdate::Attempting), "Attempting to play audio...");
        assert_eq!(status_text(&StatusUpdate::NowPlaying), "Playing audio...");
        assert_eq!(
            status_text(&StatusUpdate::NothingPlaying),
            "There is no audio playing in this guild!"
        );
    }

    #[test]
    fn download_messages_carry_the_url() {
        let url = "https://youtu.be/dQw4w9WgXcQ".to_string();
        assert_eq!(
            status_text(&StatusUpdate::DownloadComplete {
                url: url.clone(),
                path: PathBuf::from("downloads/x.mp4"),
            }),
            "Your download is complete! https://youtu.be/dQw4w9WgXcQ"
        );
        assert_eq!(
            status_text(&StatusUpdate::StillWorking {
                line: "🐢 Slow".to_string(),
                url,
            }),
            "🐢 Slow https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn missing_channel_uses_the_voice_hint() {
        let update = StatusUpdate::Failed(MediaError::ConnectionUnavailable("none".to_string()));
        assert_eq!(
            status_text(&update),
            "You must specify a voice channel, or be in a voice channel to use this command!"
        );
        assert_eq!(status_colour(&update), colors::ERROR_RED);
    }

    #[test]
    fn embed_uses_the_status_text_and_colour() {
        let embed = serde_json::to_value(status_embed(&StatusUpdate::NowPlaying)).unwrap();

        assert_eq!(embed["description"], "Playing audio...");
        assert_eq!(embed["color"], colors::MUSIC_PURPLE.0);
    }

    #[test]
    fn every_update_kind_has_its_colour() {
        let url = "https://youtu.be/x".to_string();
        let cases = [
            (StatusUpdate::Attempting, colors::INFO_BLUE),
            (StatusUpdate::NowPlaying, colors::MUSIC_PURPLE),
            (StatusUpdate::NothingPlaying, colors::WARNING_ORANGE),
            (
                StatusUpdate::DownloadComplete {
                    url,
                    path: PathBuf::from("downloads/x.mp4"),
                },
                colors::SUCCESS_GREEN,
            ),
        ];
        for (update, colour) in cases {
            assert_eq!(status_colour(&update), colour, "{update:?}");
        }
    }
}
