//! Presentación de los mensajes de estado en Discord.

pub mod embeds;
