use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::state::PlaybackState;
use super::voice::Player;
use crate::transcode::JobHandle;

pub type SessionId = u64;

/// Vista clonable de la sesión de una guild.
///
/// Los recursos (player, temporizador, job) pertenecen a la tarea de la
/// sesión; este handle sólo puede observarla y pedir que se deseche.
///
/// El handle se instala antes de abrir la fuente, así que el job se asocia
/// más tarde con [`SessionHandle::bind_job`] y puede no existir nunca si la
/// sesión se desecha antes.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    guild: GuildId,
    cancel: CancellationToken,
    state: watch::Receiver<PlaybackState>,
    job: Arc<OnceLock<JobHandle>>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        guild: GuildId,
        cancel: CancellationToken,
        state: watch::Receiver<PlaybackState>,
    ) -> Self {
        Self {
            id,
            guild,
            cancel,
            state,
            job: Arc::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn job(&self) -> Option<&JobHandle> {
        self.job.get()
    }

    /// Asocia el job de transcodificación. Si la sesión ya fue desechada el
    /// job se cancela en el acto.
    pub fn bind_job(&self, job: JobHandle) {
        if self.job.set(job).is_ok() && self.cancel.is_cancelled() {
            if let Some(job) = self.job.get() {
                job.cancel();
            }
        }
    }

    /// Desecha la sesión: cancela su tarea (player y temporizador) y su job.
    /// Sólo debe llamarlo quien recibió la sesión desplazada o removida.
    pub fn dispose(&self) {
        self.cancel.cancel();
        if let Some(job) = self.job.get() {
            job.cancel();
        }
    }

    /// Espera a que la sesión llegue a `Destroyed`.
    pub async fn destroyed(&self) {
        let mut rx = self.state.clone();
        // Si el emisor desaparece la tarea ya terminó
        let _ = rx.wait_for(|s| s.is_destroyed()).await;
    }
}

/// Player conectado actualmente a la conexión de voz de una guild.
pub struct ActivePlayer {
    pub session: SessionId,
    pub player: Arc<dyn Player>,
}

/// Slot de suscripción por guild: a lo sumo un player a la vez.
pub type PlayerSlot = Arc<Mutex<Option<ActivePlayer>>>;

/// Registro de sesiones por guild.
///
/// Inyectado por `Arc` en cada componente que lo necesita. Todas las
/// operaciones son síncronas y linealizables por guild (lock por shard de
/// `DashMap`, nunca retenido a través de un `.await`).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    slots: DashMap<GuildId, PlayerSlot>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instala la sesión y devuelve la anterior, que el llamador debe desechar.
    pub fn install(&self, session: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(session.guild, session)
    }

    /// Separa y devuelve la sesión actual.
    pub fn remove(&self, guild: GuildId) -> Option<SessionHandle> {
        self.sessions.remove(&guild).map(|(_, session)| session)
    }

    /// Separa la sesión sólo si `id` sigue siendo la instalada.
    pub fn remove_if_current(&self, guild: GuildId, id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .remove_if(&guild, |_, session| session.id == id)
            .map(|(_, session)| session)
    }

    pub fn is_current(&self, guild: GuildId, id: SessionId) -> bool {
        self.sessions.get(&guild).is_some_and(|session| session.id == id)
    }

    pub fn current(&self, guild: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild).map(|session| session.clone())
    }

    pub fn contains(&self, guild: GuildId) -> bool {
        self.sessions.contains_key(&guild)
    }

    /// Get-or-create del slot de player de la guild.
    ///
    /// El lock del slot también serializa conectar y desconectar la voz de
    /// la guild.
    pub fn player_slot(&self, guild: GuildId) -> PlayerSlot {
        self.slots.entry(guild).or_default().value().clone()
    }

    /// Descarta el slot de la guild si no hay sesión instalada, el slot está
    /// vacío y nadie más tiene una copia. Devuelve si se descartó.
    pub fn prune_slot(&self, guild: GuildId) -> bool {
        if self.sessions.contains_key(&guild) {
            return false;
        }
        // Con el shard tomado nadie puede clonar el slot mientras se decide
        self.slots
            .remove_if(&guild, |_, slot| {
                Arc::strong_count(slot) == 1
                    && slot.try_lock().is_ok_and(|occupant| occupant.is_none())
            })
            .is_some()
    }

    #[cfg(test)]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
