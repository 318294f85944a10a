use serenity::model::id::{ChannelId, GuildId};
use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{ActivePlayer, SessionHandle, SessionId, SessionRegistry};
use super::state::{PlaybackEvent, PlaybackState};
use super::voice::{Player, SinkEvent, VoiceGateway};
use crate::error::{MediaError, MediaResult};
use crate::sources::{MediaSource, StreamKind};
use crate::status::{StatusSink, StatusUpdate};
use crate::transcode::{JobHandle, JobState, OutputTarget, TranscodeOutput, TranscodeProfile, TranscodeSupervisor};

/// Demora por defecto antes de liberar una sesión inactiva.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

const SINK_EVENT_CAPACITY: usize = 8;

/// Solicitud de reproducción de un video en una guild.
pub struct PlayRequest {
    pub guild: GuildId,
    /// Canal ya resuelto por la capa de comandos (opción explícita o canal
    /// actual del usuario). `None` rechaza la solicitud sin iniciar nada.
    pub channel: Option<ChannelId>,
    pub video_ref: String,
    pub status: Arc<dyn StatusSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NothingPlaying,
}

/// Servicio de reproducción: una sesión por guild, reemplazable y con
/// limpieza por inactividad.
pub struct PlaybackService {
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn VoiceGateway>,
    source: Arc<dyn MediaSource>,
    supervisor: TranscodeSupervisor,
    profile: TranscodeProfile,
    idle_timeout: Duration,
    next_id: AtomicU64,
}

impl PlaybackService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn VoiceGateway>,
        source: Arc<dyn MediaSource>,
        supervisor: TranscodeSupervisor,
    ) -> Self {
        Self {
            registry,
            gateway,
            source,
            supervisor,
            profile: TranscodeProfile::voice(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_profile(mut self, profile: TranscodeProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Inicia la reproducción. Cualquier error se reporta una sola vez por
    /// `request.status` y además se devuelve.
    ///
    /// La guild se reserva antes de la primera espera: las solicitudes se
    /// ordenan por llegada y un `stop` posterior siempre alcanza a esta
    /// sesión, aunque la fuente todavía se esté abriendo.
    pub async fn play(&self, request: PlayRequest) -> MediaResult<SessionHandle> {
        let status = request.status.clone();
        let guild = request.guild;
        match self.start_session(request).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                warn!("❌ No se pudo reproducir en guild {}: {}", guild, e);
                status.update(StatusUpdate::Failed(e.clone())).await;
                Err(e)
            }
        }
    }

    async fn start_session(&self, request: PlayRequest) -> MediaResult<SessionHandle> {
        let PlayRequest {
            guild,
            channel,
            video_ref,
            status,
        } = request;

        let channel = channel.ok_or_else(|| {
            MediaError::ConnectionUnavailable(format!("no voice channel resolved in guild {guild}"))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(PlaybackState::Connecting);
        let handle = SessionHandle::new(id, guild, cancel.clone(), state_rx);

        if let Some(previous) = self.registry.install(handle.clone()) {
            info!(
                "🔁 Sesión {} reemplaza a {} en guild {}",
                id,
                previous.id(),
                guild
            );
            previous.dispose();
        }

        let session = Session {
            id,
            guild,
            registry: self.registry.clone(),
            gateway: self.gateway.clone(),
            status: status.clone(),
            idle_timeout: self.idle_timeout,
            cancel,
            state: state_tx,
        };

        let (job, output) = match self.launch(&session, &video_ref).await {
            Ok(Some(launched)) => launched,
            Ok(None) => {
                debug!("Sesión {} desechada antes de iniciar el job", id);
                session.advance(PlaybackEvent::Disposed);
                return Ok(handle);
            }
            Err(e) => {
                self.registry.remove_if_current(guild, id);
                session.advance(PlaybackEvent::Disposed);
                return Err(e);
            }
        };
        handle.bind_job(job.clone());
        status.update(StatusUpdate::Attempting).await;

        info!(
            "🎵 Sesión {} (job {}) creada en guild {} para {}",
            id,
            job.id(),
            guild,
            video_ref
        );
        tokio::spawn(session.run(channel, job, output));
        Ok(handle)
    }

    /// Abre la fuente y arranca el job sólo si la sesión sigue vigente.
    /// `Ok(None)` significa que otra solicitud o un stop llegó antes.
    async fn launch(
        &self,
        session: &Session,
        video_ref: &str,
    ) -> MediaResult<Option<(JobHandle, TranscodeOutput)>> {
        let stream = tokio::select! {
            _ = session.cancel.cancelled() => return Ok(None),
            stream = self.source.open_stream(video_ref, StreamKind::AudioOnly) => stream?,
        };
        if session.cancel.is_cancelled() || !self.registry.is_current(session.guild, session.id) {
            // El stream se descarta sin iniciar ffmpeg
            return Ok(None);
        }

        let mut job = self
            .supervisor
            .start(&self.profile, vec![stream], OutputTarget::Pipe)?;
        let output = job.take_output().ok_or_else(|| {
            job.cancel();
            MediaError::Spawn(format!("profile {} has no output stream", self.profile.name))
        })?;
        Ok(Some((job.handle(), output)))
    }

    /// Detiene la sesión de la guild y abandona el canal de voz.
    ///
    /// La entrada del registro se quita de forma síncrona; la limpieza de
    /// subproceso y conexión puede terminar después.
    pub async fn stop(&self, guild: GuildId, status: &dyn StatusSink) -> StopOutcome {
        match self.registry.remove(guild) {
            None => {
                debug!("stop sin sesión en guild {}", guild);
                status.update(StatusUpdate::NothingPlaying).await;
                StopOutcome::NothingPlaying
            }
            Some(session) => {
                info!("⏹️ Deteniendo sesión {} en guild {}", session.id(), guild);
                session.dispose();
                leave_if_vacant(&self.registry, self.gateway.as_ref(), guild).await;
                status.update(StatusUpdate::Stopped).await;
                StopOutcome::Stopped
            }
        }
    }
}

/// Desconecta la voz de la guild sólo si ninguna sesión la ocupa.
///
/// Corre bajo el lock del slot de la guild, el mismo que toma una sesión
/// para conectar, así que una sesión instalada después nunca pierde su
/// conexión recién creada.
async fn leave_if_vacant(registry: &SessionRegistry, gateway: &dyn VoiceGateway, guild: GuildId) -> bool {
    if registry.contains(guild) {
        debug!("Guild {} ya tiene otra sesión; se conserva la conexión", guild);
        return false;
    }
    let slot = registry.player_slot(guild);
    let left = {
        let _occupant = slot.lock().await;
        if registry.contains(guild) {
            debug!("Guild {} ya tiene otra sesión; se conserva la conexión", guild);
            false
        } else {
            gateway.disconnect(guild).await;
            true
        }
    };
    drop(slot);
    registry.prune_slot(guild);
    left
}

enum Ending {
    /// Stop o reemplazo: la sesión ya no está (o no debe estar) en el registro.
    Disposed,
    /// Venció la inactividad.
    Expired,
    /// Error antes de reproducir. `connected` indica si la voz llegó a unirse.
    Failed { connected: bool },
}

/// Tarea dueña de los recursos de una sesión.
struct Session {
    id: SessionId,
    guild: GuildId,
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn VoiceGateway>,
    status: Arc<dyn StatusSink>,
    idle_timeout: Duration,
    cancel: CancellationToken,
    state: watch::Sender<PlaybackState>,
}

impl Session {
    async fn run(self, channel: ChannelId, job: JobHandle, output: TranscodeOutput) {
        let mut player = None;
        let ending = self.drive(channel, &job, output, &mut player).await;

        // Sólo la sesión que se retira a sí misma abandona la voz
        let connected = match ending {
            Ending::Disposed => false,
            Ending::Expired => true,
            Ending::Failed { connected } => connected,
        };
        let retired = match ending {
            Ending::Disposed => false,
            Ending::Expired | Ending::Failed { .. } => {
                self.registry.remove_if_current(self.guild, self.id).is_some()
            }
        };
        if retired && connected {
            if let Ending::Expired = ending {
                info!("🚪 Inactividad: abandonando voz en guild {}", self.guild);
            }
            leave_if_vacant(&self.registry, self.gateway.as_ref(), self.guild).await;
        }

        let last = match ending {
            Ending::Expired => PlaybackEvent::IdleTimeout,
            Ending::Disposed | Ending::Failed { .. } => PlaybackEvent::Disposed,
        };
        self.release(&job, player, last).await;
        debug!(
            "Sesión {} en guild {} finalizada ({})",
            self.id,
            self.guild,
            match ending {
                Ending::Disposed => "disposed",
                Ending::Expired => "idle timeout",
                Ending::Failed { .. } => "failed",
            }
        );
    }

    async fn drive(
        &self,
        channel: ChannelId,
        job: &JobHandle,
        output: TranscodeOutput,
        player: &mut Option<Arc<dyn Player>>,
    ) -> Ending {
        let (events_tx, mut events) = mpsc::channel(SINK_EVENT_CAPACITY);
        {
            // Conectar y adjuntar bajo el lock del slot, sólo si seguimos vigentes
            let slot = self.registry.player_slot(self.guild);
            let mut occupant = tokio::select! {
                _ = self.cancel.cancelled() => return Ending::Disposed,
                guard = slot.lock() => guard,
            };
            if self.cancel.is_cancelled() || !self.registry.is_current(self.guild, self.id) {
                return Ending::Disposed;
            }

            // Connecting
            let link = tokio::select! {
                _ = self.cancel.cancelled() => return Ending::Disposed,
                link = self.gateway.connect(self.guild, channel) => link,
            };
            let link = match link {
                Ok(link) => link,
                Err(e) => {
                    error!("❌ Conexión de voz fallida en guild {}: {}", self.guild, e);
                    self.status.update(StatusUpdate::Failed(e)).await;
                    return Ending::Failed { connected: false };
                }
            };
            self.advance(PlaybackEvent::Connected);

            // Ready
            if let Some(previous) = occupant.take() {
                debug!("Sesión {} desplaza al player de la sesión {}", self.id, previous.session);
                previous.player.stop();
            }
            match link.attach(output, events_tx).await {
                Ok(attached) => {
                    *occupant = Some(ActivePlayer {
                        session: self.id,
                        player: attached.clone(),
                    });
                    *player = Some(attached);
                }
                Err(e) => {
                    error!("❌ No se pudo adjuntar el audio en guild {}: {}", self.guild, e);
                    self.status.update(StatusUpdate::Failed(e)).await;
                    return Ending::Failed { connected: true };
                }
            }
        }

        let mut idle_timer: Option<Pin<Box<Sleep>>> = None;
        let mut sink_open = true;
        let mut job_settled = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ending::Disposed,

                event = events.recv(), if sink_open => match event {
                    Some(SinkEvent::Playing) => {
                        if self.advance(PlaybackEvent::SinkPlaying) {
                            info!("▶️ Reproduciendo en guild {}", self.guild);
                            self.status.update(StatusUpdate::NowPlaying).await;
                        }
                    }
                    Some(SinkEvent::Idle) | None => {
                        sink_open = event.is_some();
                        if self.advance(PlaybackEvent::SinkIdle)
                            && self.registry.is_current(self.guild, self.id)
                        {
                            debug!(
                                "⏳ Sesión {} inactiva, liberando en {:?}",
                                self.id, self.idle_timeout
                            );
                            idle_timer = Some(Box::pin(tokio::time::sleep(self.idle_timeout)));
                        }
                    }
                },

                state = job.wait(), if !job_settled => {
                    job_settled = true;
                    if let JobState::Failed(e) = state {
                        error!("❌ Transcodificación fallida en guild {}: {}", self.guild, e);
                        self.status.update(StatusUpdate::Failed(e)).await;
                    }
                }

                _ = expire(&mut idle_timer), if idle_timer.is_some() => return Ending::Expired,
            }
        }
    }

    /// Limpieza idéntica en todos los caminos. `last` lleva la sesión a
    /// `Destroyed` una vez liberado todo.
    async fn release(&self, job: &JobHandle, player: Option<Arc<dyn Player>>, last: PlaybackEvent) {
        job.cancel();
        if let Some(player) = player {
            player.stop();
            let slot = self.registry.player_slot(self.guild);
            let mut occupant = slot.lock().await;
            if occupant.as_ref().is_some_and(|active| active.session == self.id) {
                *occupant = None;
            }
        }
        // La copia local del slot ya se soltó
        self.registry.prune_slot(self.guild);
        self.advance(last);
    }

    fn advance(&self, event: PlaybackEvent) -> bool {
        let mut moved = false;
        self.state.send_if_modified(|state| match state.next(event) {
            Some(next) => {
                debug!("Sesión {}: {:?} -> {:?}", self.id, state, next);
                *state = next;
                moved = true;
                true
            }
            None => false,
        });
        moved
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockMediaSource;
    use crate::status::MockStatusSink;
    use crate::testing::{FakeGateway, RecordingSink, ScriptedSource};
    use crate::transcode::OutputPlan;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    const GUILD: GuildId = GuildId::new(7);
    const CHANNEL: ChannelId = ChannelId::new(70);

    /// Copia stdin a stdout; el destino `pipe:1` llega como `$1` y se ignora.
    fn passthrough_profile() -> TranscodeProfile {
        TranscodeProfile::new(
            "passthrough",
            vec!["-c".to_string(), "exec cat".to_string(), "mux".to_string()],
            vec![0],
            OutputPlan::Pipe,
        )
    }

    fn service_with(gateway: Arc<FakeGateway>, source: Arc<dyn MediaSource>) -> PlaybackService {
        PlaybackService::new(
            Arc::new(SessionRegistry::new()),
            gateway,
            source,
            TranscodeSupervisor::new("sh"),
        )
        .with_profile(passthrough_profile())
        .with_idle_timeout(Duration::from_millis(50))
    }

    fn service(gateway: Arc<FakeGateway>, source: MockMediaSource) -> PlaybackService {
        service_with(gateway, Arc::new(source))
    }

    fn finite_source(times: usize) -> MockMediaSource {
        let mut source = MockMediaSource::new();
        source
            .expect_open_stream()
            .times(times)
            .returning(|_, _| Ok(Box::pin(Cursor::new(vec![1u8; 4096]))));
        source
    }

    fn request(status: &Arc<RecordingSink>) -> PlayRequest {
        PlayRequest {
            guild: GUILD,
            channel: Some(CHANNEL),
            video_ref: "dQw4w9WgXcQ".to_string(),
            status: status.clone(),
        }
    }

    async fn within<F: std::future::Future>(future: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(5), future)
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn idle_session_is_torn_down_after_timeout() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service(gateway.clone(), finite_source(1));
        let status = Arc::new(RecordingSink::default());

        let session = service.play(request(&status)).await.unwrap();
        within(session.destroyed()).await;

        assert!(service.registry().is_empty());
        assert_eq!(service.registry().slot_count(), 0);
        assert_eq!(gateway.disconnects(), 1);
        assert_eq!(gateway.active_players(), 0);
        assert_eq!(
            status.updates(),
            vec![StatusUpdate::Attempting, StatusUpdate::NowPlaying]
        );
        assert_eq!(within(session.job().unwrap().wait()).await, JobState::Succeeded);
    }

    #[tokio::test]
    async fn stop_without_session_reports_nothing_playing() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service(gateway.clone(), MockMediaSource::new());
        let mut status = MockStatusSink::new();
        status
            .expect_update()
            .with(mockall::predicate::eq(StatusUpdate::NothingPlaying))
            .times(1)
            .return_const(());

        let outcome = service.stop(GUILD, &status).await;

        assert_eq!(outcome, StopOutcome::NothingPlaying);
        assert_eq!(gateway.disconnects(), 0);
        assert_eq!(gateway.connects(), 0);
    }

    #[tokio::test]
    async fn missing_channel_is_rejected_before_any_subprocess() {
        let gateway = Arc::new(FakeGateway::default());
        // Sin expectativas: abrir la fuente haría fallar el test
        let service = service(gateway.clone(), MockMediaSource::new());
        let status = Arc::new(RecordingSink::default());
        let mut req = request(&status);
        req.channel = None;

        let result = service.play(req).await;

        assert!(matches!(result, Err(MediaError::ConnectionUnavailable(_))));
        assert!(matches!(
            status.updates().as_slice(),
            [StatusUpdate::Failed(MediaError::ConnectionUnavailable(_))]
        ));
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn unavailable_source_is_reported_once() {
        let gateway = Arc::new(FakeGateway::default());
        let mut source = MockMediaSource::new();
        source
            .expect_open_stream()
            .returning(|_, _| Err(MediaError::SourceUnavailable("no audio".to_string())));
        let service = service(gateway.clone(), source);
        let status = Arc::new(RecordingSink::default());

        assert!(service.play(request(&status)).await.is_err());
        assert_eq!(
            status.updates(),
            vec![StatusUpdate::Failed(MediaError::SourceUnavailable("no audio".to_string()))]
        );
        assert_eq!(gateway.connects(), 0);
    }

    #[tokio::test]
    async fn second_request_before_playing_supersedes_the_first() {
        let gateway = Arc::new(FakeGateway::default());
        // La conexión tarda: la primera sesión queda reemplazada antes de unirse
        gateway.delay_next_connect(Duration::from_millis(300));

        let (_keep_open, endless) = tokio::io::duplex(64);
        let mut source = MockMediaSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_open_stream()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_, _| Ok(Box::pin(endless)));
        source
            .expect_open_stream()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Box::pin(Cursor::new(vec![2u8; 4096]))));
        let service = service(gateway.clone(), source).with_idle_timeout(Duration::from_secs(60));

        let first_status = Arc::new(RecordingSink::default());
        let second_status = Arc::new(RecordingSink::default());
        let first = service.play(request(&first_status)).await.unwrap();
        let second = service.play(request(&second_status)).await.unwrap();

        within(first.destroyed()).await;
        assert_eq!(within(first.job().unwrap().wait()).await, JobState::Cancelled);

        within(second_status.wait_for(StatusUpdate::NowPlaying)).await;
        assert!(service.registry().is_current(GUILD, second.id()));
        assert!(!first_status.updates().contains(&StatusUpdate::NowPlaying));
        assert_eq!(gateway.attaches(), 1);
        assert!(gateway.max_active_players() <= 1);
    }

    #[tokio::test]
    async fn many_requests_leave_one_player() {
        let gateway = Arc::new(FakeGateway::default());
        let service = Arc::new(
            service(gateway.clone(), finite_source(6)).with_idle_timeout(Duration::from_secs(60)),
        );
        let status = Arc::new(RecordingSink::default());

        let mut last = None;
        for _ in 0..6 {
            last = Some(service.play(request(&status)).await.unwrap());
            tokio::task::yield_now().await;
        }
        let last = last.unwrap();

        within(async {
            while last.state() != PlaybackState::Idle {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert_eq!(service.registry().len(), 1);
        assert!(service.registry().is_current(GUILD, last.id()));
        assert!(gateway.max_active_players() <= 1);
    }

    #[tokio::test]
    async fn stop_disposes_a_session_that_is_still_connecting() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.delay_next_connect(Duration::from_secs(30));
        let (_keep_open, endless) = tokio::io::duplex(64);
        let mut source = MockMediaSource::new();
        source
            .expect_open_stream()
            .return_once(move |_, _| Ok(Box::pin(endless)));
        let service = service(gateway.clone(), source);
        let status = Arc::new(RecordingSink::default());

        let session = service.play(request(&status)).await.unwrap();
        assert_eq!(session.state(), PlaybackState::Connecting);

        let stop_status = RecordingSink::default();
        assert_eq!(service.stop(GUILD, &stop_status).await, StopOutcome::Stopped);
        assert!(service.registry().is_empty());

        within(session.destroyed()).await;
        assert_eq!(within(session.job().unwrap().wait()).await, JobState::Cancelled);
        assert_eq!(gateway.attaches(), 0);
        assert_eq!(gateway.disconnects(), 1);
        assert_eq!(stop_status.updates(), vec![StatusUpdate::Stopped]);
    }

    #[tokio::test]
    async fn stop_while_idle_cancels_the_timer() {
        let gateway = Arc::new(FakeGateway::default());
        let service = service(gateway.clone(), finite_source(1)).with_idle_timeout(Duration::from_millis(100));
        let status = Arc::new(RecordingSink::default());

        let session = service.play(request(&status)).await.unwrap();
        within(async {
            while session.state() != PlaybackState::Idle {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        service.stop(GUILD, &RecordingSink::default()).await;
        within(session.destroyed()).await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Sólo la desconexión del stop; el temporizador nunca disparó
        assert_eq!(gateway.disconnects(), 1);
        assert_eq!(gateway.active_players(), 0);
    }

    #[tokio::test]
    async fn failed_connection_is_reported_and_cleaned_up() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_connects();
        let (_keep_open, endless) = tokio::io::duplex(64);
        let mut source = MockMediaSource::new();
        source
            .expect_open_stream()
            .return_once(move |_, _| Ok(Box::pin(endless)));
        let service = service(gateway.clone(), source);
        let status = Arc::new(RecordingSink::default());

        let session = service.play(request(&status)).await.unwrap();
        within(session.destroyed()).await;

        assert!(service.registry().is_empty());
        assert_eq!(gateway.disconnects(), 0);
        assert_eq!(within(session.job().unwrap().wait()).await, JobState::Cancelled);
        assert!(matches!(
            status.updates().last(),
            Some(StatusUpdate::Failed(MediaError::ConnectionUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn failed_attach_leaves_the_voice_channel() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_attaches();
        let (_keep_open, endless) = tokio::io::duplex(64);
        let mut source = MockMediaSource::new();
        source
            .expect_open_stream()
            .return_once(move |_, _| Ok(Box::pin(endless)));
        let service = service(gateway.clone(), source);
        let status = Arc::new(RecordingSink::default());

        let session = service.play(request(&status)).await.unwrap();
        within(session.destroyed()).await;

        assert!(service.registry().is_empty());
        assert_eq!(service.registry().slot_count(), 0);
        assert_eq!(gateway.connects(), 1);
        assert_eq!(gateway.disconnects(), 1);
        assert_eq!(
            status.updates(),
            vec![
                StatusUpdate::Attempting,
                StatusUpdate::Failed(MediaError::ConnectionUnavailable("attach refused".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn slow_earlier_request_never_replaces_a_later_one() {
        let gateway = Arc::new(FakeGateway::default());
        let source = Arc::new(ScriptedSource::default());
        source.delay_next_open(Duration::from_millis(300));
        let service = Arc::new(
            service_with(gateway.clone(), source.clone()).with_idle_timeout(Duration::from_secs(60)),
        );
        let first_status = Arc::new(RecordingSink::default());
        let second_status = Arc::new(RecordingSink::default());

        let first = tokio::spawn({
            let service = service.clone();
            let request = request(&first_status);
            async move { service.play(request).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = service.play(request(&second_status)).await.unwrap();
        let first = within(first).await.unwrap().unwrap();

        assert!(first.id() < second.id());
        within(first.destroyed()).await;
        assert!(first.job().is_none(), "no job for a request replaced while opening");

        within(second_status.wait_for(StatusUpdate::NowPlaying)).await;
        assert_eq!(service.registry().len(), 1);
        assert!(service.registry().is_current(GUILD, second.id()));
        assert!(first_status.updates().is_empty());
        assert_eq!(source.opens(), 2);
        assert_eq!(gateway.attaches(), 1);
    }

    #[tokio::test]
    async fn stop_reaches_a_request_still_opening_its_source() {
        let gateway = Arc::new(FakeGateway::default());
        let source = Arc::new(ScriptedSource::default());
        source.delay_next_open(Duration::from_millis(300));
        let service = Arc::new(service_with(gateway.clone(), source));
        let play_status = Arc::new(RecordingSink::default());

        let play = tokio::spawn({
            let service = service.clone();
            let request = request(&play_status);
            async move { service.play(request).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stop_status = RecordingSink::default();
        assert_eq!(service.stop(GUILD, &stop_status).await, StopOutcome::Stopped);
        let session = within(play).await.unwrap().unwrap();

        within(session.destroyed()).await;
        assert!(session.job().is_none());
        assert!(service.registry().is_empty());
        assert_eq!(service.registry().slot_count(), 0);
        assert_eq!(gateway.connects(), 0);
        assert_eq!(stop_status.updates(), vec![StatusUpdate::Stopped]);
        assert!(play_status.updates().is_empty());
    }

    #[tokio::test]
    async fn leaving_voice_skips_a_guild_with_a_newer_session() {
        let gateway = FakeGateway::default();
        let registry = SessionRegistry::new();
        let (_state, state_rx) = watch::channel(PlaybackState::Connecting);
        registry.install(SessionHandle::new(1, GUILD, CancellationToken::new(), state_rx));

        assert!(!leave_if_vacant(&registry, &gateway, GUILD).await);
        assert_eq!(gateway.disconnects(), 0);

        registry.remove(GUILD);
        assert!(leave_if_vacant(&registry, &gateway, GUILD).await);
        assert_eq!(gateway.disconnects(), 1);
        assert_eq!(registry.slot_count(), 0);
    }

    #[tokio::test]
    async fn late_teardown_keeps_the_connection_of_a_connecting_session() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.delay_next_connect(Duration::from_millis(200));
        let service = service(gateway.clone(), finite_source(1)).with_idle_timeout(Duration::from_secs(60));
        let status = Arc::new(RecordingSink::default());

        let session = service.play(request(&status)).await.unwrap();
        // La sesión toma el slot y empieza a conectar
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gateway.connects(), 1);

        // Un retiro atrasado de otra sesión no corta esta conexión
        let left = leave_if_vacant(service.registry(), gateway.as_ref(), GUILD).await;

        assert!(!left);
        assert_eq!(gateway.disconnects(), 0);
        within(status.wait_for(StatusUpdate::NowPlaying)).await;
        assert!(service.registry().is_current(GUILD, session.id()));
    }
}
