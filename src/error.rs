use thiserror::Error;

/// Errores del núcleo de medios.
///
/// Cada variante se reporta una sola vez al solicitante a través de
/// [`StatusSink`](crate::status::StatusSink) y se registra con `tracing`;
/// ninguna tumba el proceso.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// No hay ninguna codificación que cumpla la política de selección,
    /// o la referencia de video no es válida. No se reintenta.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Error de red o lectura a mitad del stream; aborta el job.
    #[error("source stream failed: {0}")]
    SourceStreamFailed(String),

    /// El subproceso terminó con código distinto de cero o por señal.
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    /// No se pudo resolver o unir el canal de voz.
    #[error("voice connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// El ejecutable del transcodificador no pudo arrancar.
    #[error("could not start transcoder: {0}")]
    Spawn(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl MediaError {
    /// Mensaje corto para mostrar al usuario en Discord.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "No playable stream was found for that video.",
            Self::SourceStreamFailed(_) => "The video stream broke while it was being read.",
            Self::TranscodeFailed(_) => "Transcoding failed before the media could be finished.",
            Self::ConnectionUnavailable(_) => {
                "You must specify a voice channel, or be in a voice channel to use this command!"
            }
            Self::Spawn(_) | Self::Io(_) => "Sorry, there was an error running your command.",
        }
    }
}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
