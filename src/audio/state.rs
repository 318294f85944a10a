/// Estados de una sesión de reproducción.
///
/// ```text
/// Connecting -> Ready -> Playing -> Idle -> Destroyed
///      \          \         \                  ^
///       `----------`---------`-- Disposed -----'
/// ```
///
/// Desde `Idle`, una nueva solicitud para la misma guild reemplaza la sesión:
/// la vieja pasa a `Destroyed` y la nueva recorre su propio camino hasta
/// `Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Connecting,
    Ready,
    Playing,
    Idle,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// La conexión de voz está lista.
    Connected,
    SinkPlaying,
    SinkIdle,
    /// Venció el temporizador de inactividad.
    IdleTimeout,
    /// Stop explícito, reemplazo por otra sesión o fallo irrecuperable.
    Disposed,
}

impl PlaybackState {
    /// Transición guardada. `None` significa que el evento no aplica en este
    /// estado y se ignora (duplicados, eventos tardíos).
    pub fn next(self, event: PlaybackEvent) -> Option<PlaybackState> {
        use PlaybackEvent::*;
        use PlaybackState::*;

        match (self, event) {
            (Destroyed, _) => None,
            (_, Disposed) => Some(Destroyed),
            (Connecting, Connected) => Some(Ready),
            (Ready, SinkPlaying) => Some(Playing),
            // El job puede fallar antes de emitir audio
            (Ready | Playing, SinkIdle) => Some(Idle),
            (Idle, IdleTimeout) => Some(Destroyed),
            _ => None,
        }
    }

    pub fn is_destroyed(self) -> bool {
        self == PlaybackState::Destroyed
    }
}
