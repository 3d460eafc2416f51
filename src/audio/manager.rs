use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        collaborators::{
            AudioBackend, ConnectionHandle, FailureNotifier, PlaybackRequest, RequestRef, VoiceGateway,
        },
        registry::{GuildPreferences, ManagerMap},
        state::{EndReason, GuildPlayerState, PlayerStatus, RepeatMode},
        track::TrackItem,
    },
    error::{AudioError, TrackFailure},
};

/// Parámetros de reproducción comunes a todos los guilds.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub default_volume: u16,
    pub max_volume: u16,
    pub max_queue_size: usize,
    /// `None` desactiva la desconexión automática.
    pub idle_timeout: Option<Duration>,
    pub inbox_capacity: usize,
}

/// Colaboradores compartidos por todos los managers.
#[derive(Clone)]
pub struct AudioServices {
    pub backend: Arc<dyn AudioBackend>,
    pub voice: Arc<dyn VoiceGateway>,
    pub notifier: Arc<dyn FailureNotifier>,
    pub settings: PlayerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// El track se entregó directamente al backend.
    Started,
    /// El track espera en la cola (1 = siguiente).
    Queued { position: usize },
}

/// Foto del estado de un guild, para los comandos `song` y `queue`.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub guild_id: GuildId,
    pub epoch: u64,
    pub status: PlayerStatus,
    pub now_playing: Option<TrackItem>,
    pub queue: Vec<TrackItem>,
    pub volume: u16,
    pub repeat_mode: RepeatMode,
    pub connected: Option<ChannelId>,
}

impl PlayerSnapshot {
    pub fn total_duration(&self) -> Duration {
        self.now_playing
            .iter()
            .chain(self.queue.iter())
            .filter_map(TrackItem::duration)
            .sum()
    }
}

/// Evento del ciclo de vida de un track, tal como lo reporta el backend.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started(PlaybackRequest),
    Ended(PlaybackRequest, EndReason),
    LoadFailed(PlaybackRequest, TrackFailure),
    PlaybackException(PlaybackRequest, TrackFailure),
}

impl LifecycleEvent {
    pub fn request(&self) -> &PlaybackRequest {
        match self {
            LifecycleEvent::Started(request)
            | LifecycleEvent::Ended(request, _)
            | LifecycleEvent::LoadFailed(request, _)
            | LifecycleEvent::PlaybackException(request, _) => request,
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Enqueue {
        track: TrackItem,
        channel_id: ChannelId,
        reply: Reply<Result<EnqueueOutcome, AudioError>>,
    },
    Skip { reply: Reply<Result<TrackItem, AudioError>> },
    Pause { reply: Reply<Result<(), AudioError>> },
    Resume { reply: Reply<Result<(), AudioError>> },
    SetVolume { volume: u16, reply: Reply<u16> },
    SetRepeat { mode: RepeatMode, reply: Reply<()> },
    Shuffle { reply: Reply<usize> },
    ClearQueue { reply: Reply<usize> },
    MoveTo {
        channel_id: ChannelId,
        reply: Reply<Result<(), AudioError>>,
    },
    Snapshot { reply: Reply<PlayerSnapshot> },
    Shutdown { reply: Reply<()> },
}

enum Message {
    Command(Command),
    Lifecycle(LifecycleEvent),
}

/// Handle hacia el reproductor de un guild.
///
/// Todas las operaciones se encolan en el buzón del guild y las procesa una
/// única tarea, así que comandos y callbacks del mismo guild nunca se
/// intercalan. Guilds distintos no comparten ningún lock.
#[derive(Debug)]
pub struct GuildAudioManager {
    guild_id: GuildId,
    epoch: u64,
    inbox: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl GuildAudioManager {
    pub(crate) fn spawn(
        guild_id: GuildId,
        epoch: u64,
        services: AudioServices,
        preferences: GuildPreferences,
        registry: Weak<ManagerMap>,
    ) -> Self {
        let (inbox, receiver) = mpsc::channel(services.settings.inbox_capacity.max(1));
        let cancel = CancellationToken::new();

        let mut state = GuildPlayerState::new(
            guild_id,
            preferences.volume.unwrap_or(services.settings.default_volume),
            services.settings.max_volume,
            services.settings.max_queue_size,
        );
        state.set_repeat_mode(preferences.repeat_mode);

        let actor = ManagerActor {
            state,
            epoch,
            connection: None,
            services,
            inbox: receiver,
            cancel: cancel.clone(),
            registry,
            idle_since: Some(Instant::now()),
        };
        tokio::spawn(actor.run());

        Self {
            guild_id,
            epoch,
            inbox,
            cancel,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.inbox.is_closed()
    }

    pub async fn enqueue(&self, track: TrackItem, channel_id: ChannelId) -> Result<EnqueueOutcome, AudioError> {
        self.request(|reply| Command::Enqueue {
            track,
            channel_id,
            reply,
        })
        .await?
    }

    /// Pide al backend detener el track actual y devuelve cuál era. El avance
    /// de la cola ocurre cuando llega el callback de fin.
    pub async fn skip(&self) -> Result<TrackItem, AudioError> {
        self.request(|reply| Command::Skip { reply }).await?
    }

    pub async fn pause(&self) -> Result<(), AudioError> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<(), AudioError> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    /// Devuelve el volumen aplicado tras recortarlo al máximo configurado.
    pub async fn set_volume(&self, volume: u16) -> Result<u16, AudioError> {
        self.request(|reply| Command::SetVolume { volume, reply }).await
    }

    pub async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), AudioError> {
        self.request(|reply| Command::SetRepeat { mode, reply }).await
    }

    pub async fn shuffle_queue(&self) -> Result<usize, AudioError> {
        self.request(|reply| Command::Shuffle { reply }).await
    }

    pub async fn clear_queue(&self) -> Result<usize, AudioError> {
        self.request(|reply| Command::ClearQueue { reply }).await
    }

    pub async fn move_to(&self, channel_id: ChannelId) -> Result<(), AudioError> {
        self.request(|reply| Command::MoveTo { channel_id, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<PlayerSnapshot, AudioError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Detiene todo, libera la conexión de voz y saca al manager del registro.
    pub async fn shutdown(&self) -> Result<(), AudioError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Entrega un evento del backend al buzón. Devuelve `false` si el manager
    /// ya terminó.
    pub async fn post(&self, event: LifecycleEvent) -> bool {
        self.inbox.send(Message::Lifecycle(event)).await.is_ok()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, AudioError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Message::Command(build(reply)))
            .await
            .map_err(|_| AudioError::ManagerClosed)?;
        response.await.map_err(|_| AudioError::ManagerClosed)
    }
}

struct ManagerActor {
    state: GuildPlayerState,
    epoch: u64,
    connection: Option<ConnectionHandle>,
    services: AudioServices,
    inbox: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    registry: Weak<ManagerMap>,
    idle_since: Option<Instant>,
}

impl ManagerActor {
    async fn run(mut self) {
        info!("🎛️ Reproductor creado para guild {} (época {})", self.state.guild_id(), self.epoch);
        let mut shutdown_reply = None;

        loop {
            let idle_deadline = self.idle_deadline();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Reproductor de {} cancelado desde el registro", self.state.guild_id());
                    break;
                }
                message = self.inbox.recv() => match message {
                    Some(Message::Command(Command::Shutdown { reply })) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(Message::Command(command)) => self.handle_command(command).await,
                    Some(Message::Lifecycle(event)) => self.handle_lifecycle(event).await,
                    None => break,
                },
                _ = wait_until(idle_deadline) => {
                    info!("⏱️ Guild {} inactivo demasiado tiempo, desconectando", self.state.guild_id());
                    break;
                }
            }

            self.refresh_idle();
        }

        self.teardown().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue {
                track,
                channel_id,
                reply,
            } => {
                let _ = reply.send(self.enqueue(track, channel_id).await);
            }
            Command::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            Command::SetVolume { volume, reply } => {
                let _ = reply.send(self.set_volume(volume).await);
            }
            Command::SetRepeat { mode, reply } => {
                self.state.set_repeat_mode(mode);
                info!("🔁 Modo de repetición en {}: {:?}", self.state.guild_id(), mode);
                let _ = reply.send(());
            }
            Command::Shuffle { reply } => {
                let shuffled = self.state.shuffle_queue();
                info!("🔀 Cola mezclada en {} ({} canciones)", self.state.guild_id(), shuffled);
                let _ = reply.send(shuffled);
            }
            Command::ClearQueue { reply } => {
                let cleared = self.state.clear_queue();
                info!("🗑️ Cola limpiada en {}: {} tracks removidos", self.state.guild_id(), cleared);
                let _ = reply.send(cleared);
            }
            Command::MoveTo { channel_id, reply } => {
                let _ = reply.send(self.move_to(channel_id).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // Se intercepta en `run` para responder después del teardown.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn enqueue(&mut self, track: TrackItem, channel_id: ChannelId) -> Result<EnqueueOutcome, AudioError> {
        let id = track.id();
        let position = self.state.push(track)?;

        if self.state.status() != PlayerStatus::Idle {
            return Ok(EnqueueOutcome::Queued { position });
        }

        // La cola conserva el track aunque falle la conexión.
        self.ensure_connection(channel_id).await?;
        self.advance().await;

        // Si ya no está en la cola el backend lo recibió (y pudo rechazarlo:
        // eso llega como notificación aparte).
        match self.state.queue().iter().position(|queued| queued.id() == id) {
            Some(index) => Ok(EnqueueOutcome::Queued { position: index + 1 }),
            None => Ok(EnqueueOutcome::Started),
        }
    }

    async fn skip(&mut self) -> Result<TrackItem, AudioError> {
        let (Some(current), Some(connection)) = (self.state.now_playing().cloned(), self.connection) else {
            return Err(AudioError::NothingPlaying);
        };

        self.services.backend.stop(connection).await?;
        info!("⏭️ Canción saltada en guild {}: {}", self.state.guild_id(), current.title());
        Ok(current)
    }

    async fn pause(&mut self) -> Result<(), AudioError> {
        self.state.pause()?;
        if let Some(connection) = self.connection {
            if let Err(e) = self.services.backend.pause(connection).await {
                self.state.resume()?;
                return Err(e);
            }
        }

        info!("⏸️ Reproducción pausada en guild {}", self.state.guild_id());
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), AudioError> {
        self.state.resume()?;
        if let Some(connection) = self.connection {
            if let Err(e) = self.services.backend.resume(connection).await {
                self.state.pause()?;
                return Err(e);
            }
        }

        info!("▶️ Reproducción reanudada en guild {}", self.state.guild_id());
        Ok(())
    }

    async fn set_volume(&mut self, volume: u16) -> u16 {
        let applied = self.state.set_volume(volume);

        if let (Some(connection), Some(_)) = (self.connection, self.state.now_playing()) {
            if let Err(e) = self.services.backend.set_volume(connection, applied).await {
                warn!("No se pudo aplicar el volumen en {}: {}", self.state.guild_id(), e);
            }
        }

        info!("🔊 Volumen de {} ajustado a {}%", self.state.guild_id(), applied);
        applied
    }

    async fn move_to(&mut self, channel_id: ChannelId) -> Result<(), AudioError> {
        let connection = self.services.voice.connect(self.state.guild_id(), channel_id).await?;
        self.connection = Some(connection);
        info!("🔗 Guild {} movido al canal {}", self.state.guild_id(), channel_id);

        // Reintenta lo que quedó en cola tras un fallo de conexión.
        self.advance().await;
        Ok(())
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            guild_id: self.state.guild_id(),
            epoch: self.epoch,
            status: self.state.status(),
            now_playing: self.state.now_playing().cloned(),
            queue: self.state.queue().iter().cloned().collect(),
            volume: self.state.volume(),
            repeat_mode: self.state.repeat_mode(),
            connected: self.connection.map(|c| c.channel_id),
        }
    }

    async fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        let request = event.request();
        if request.epoch != self.epoch {
            debug!(
                "Callback obsoleto para {} (época {} != {}), descartado",
                request.guild_id, request.epoch, self.epoch
            );
            return;
        }

        let track_id = request.track.id();
        match event {
            LifecycleEvent::Started(request) => {
                if self.state.is_current(track_id) {
                    debug!("▶️ Backend confirmó inicio de {}", request.track.title());
                } else if self.state.adopt(request.track.clone()) {
                    info!("▶️ Backend inició {} por su cuenta", request.track.title());
                } else {
                    debug!("Inicio obsoleto de {}, descartado", request.track.title());
                }
            }
            LifecycleEvent::Ended(request, reason) => {
                if !self.state.is_current(track_id) {
                    debug!("Fin obsoleto de {}, descartado", request.track.title());
                    return;
                }

                self.state.end_current(reason);
                debug!("🎵 Track terminado en {} ({:?}): {}", request.guild_id, reason, request.track.title());
                self.advance().await;
            }
            LifecycleEvent::LoadFailed(request, failure) => {
                if !self.state.is_current(track_id) {
                    debug!("Fallo de carga obsoleto de {}, descartado", request.track.title());
                    return;
                }

                warn!("❌ No se pudo cargar {} en {}: {}", request.track.title(), request.guild_id, failure);
                self.state.drop_current();
                self.notify(RequestRef::for_track(&request.track), failure);
                self.advance().await;
            }
            LifecycleEvent::PlaybackException(request, failure) => {
                if !self.state.is_current(track_id) {
                    debug!("Excepción obsoleta de {}, descartada", request.track.title());
                    return;
                }

                error!("❌ Error reproduciendo {} en {}: {}", request.track.title(), request.guild_id, failure);
                self.state.drop_current();
                self.advance().await;
            }
        }
    }

    /// Entrega la cabeza de la cola al backend si no hay nada en vuelo.
    async fn advance(&mut self) {
        let Some(connection) = self.connection else {
            return;
        };

        while let Some(track) = self.state.start_next() {
            let request = PlaybackRequest {
                guild_id: self.state.guild_id(),
                epoch: self.epoch,
                track: track.clone(),
                volume: self.state.volume(),
            };

            match self.services.backend.play(connection, request).await {
                Ok(()) => {
                    info!("🎵 Reproduciendo en guild {}: {}", self.state.guild_id(), track);
                    return;
                }
                Err(e) => {
                    warn!("❌ El backend rechazó {}: {}", track.title(), e);
                    self.state.drop_current();
                    self.notify(RequestRef::for_track(&track), TrackFailure::Unavailable(e.to_string()));
                }
            }
        }

        debug!("📭 Cola vacía en guild {}", self.state.guild_id());
    }

    async fn ensure_connection(&mut self, channel_id: ChannelId) -> Result<ConnectionHandle, AudioError> {
        if let Some(connection) = self.connection {
            return Ok(connection);
        }

        let connection = self
            .services
            .voice
            .connect(self.state.guild_id(), channel_id)
            .await
            .inspect_err(|e| warn!("🔌 Sin conexión de voz en {}: {}", self.state.guild_id(), e))?;

        info!("🔊 Conectado al canal {} en guild {}", channel_id, self.state.guild_id());
        self.connection = Some(connection);
        Ok(connection)
    }

    fn notify(&self, request: RequestRef, failure: TrackFailure) {
        let notifier = self.services.notifier.clone();
        let guild_id = self.state.guild_id();
        tokio::spawn(async move {
            notifier.notify_failure(guild_id, request, failure).await;
        });
    }

    fn refresh_idle(&mut self) {
        let idle = self.state.status() == PlayerStatus::Idle && self.state.queue().is_empty();
        match (idle, self.idle_since) {
            (true, None) => self.idle_since = Some(Instant::now()),
            (false, Some(_)) => self.idle_since = None,
            _ => {}
        }
    }

    fn idle_deadline(&self) -> Option<Instant> {
        let timeout = self.services.settings.idle_timeout?;
        self.idle_since.map(|since| since + timeout)
    }

    async fn teardown(&mut self) {
        self.cancel.cancel();

        let was_playing = self.state.reset();
        if let Some(connection) = self.connection.take() {
            if was_playing.is_some() {
                if let Err(e) = self.services.backend.stop(connection).await {
                    warn!("No se pudo detener la reproducción en {}: {}", self.state.guild_id(), e);
                }
            }
            if let Err(e) = self.services.voice.disconnect(connection).await {
                warn!("No se pudo salir del canal de voz en {}: {}", self.state.guild_id(), e);
            }
        }

        if let Some(managers) = self.registry.upgrade() {
            let epoch = self.epoch;
            managers.remove_if(&self.state.guild_id(), |_, manager| manager.epoch() == epoch);
        }

        self.inbox.close();

        info!("👋 Reproductor de guild {} cerrado (época {})", self.state.guild_id(), self.epoch);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        collaborators::{MockAudioBackend, MockVoiceGateway},
        testing::{self, channel, guild, track, Call},
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn titles(snapshot: &PlayerSnapshot) -> Vec<&str> {
        snapshot.queue.iter().map(|t| t.title()).collect()
    }

    fn spawn(services: AudioServices) -> GuildAudioManager {
        GuildAudioManager::spawn(guild(), 1, services, GuildPreferences::default(), Weak::new())
    }

    #[tokio::test]
    async fn first_enqueue_plays_and_rest_stay_fifo() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);

        assert_eq!(manager.enqueue(track("a"), channel()).await, Ok(EnqueueOutcome::Started));
        assert_eq!(
            manager.enqueue(track("b"), channel()).await,
            Ok(EnqueueOutcome::Queued { position: 1 })
        );
        assert_eq!(
            manager.enqueue(track("c"), channel()).await,
            Ok(EnqueueOutcome::Queued { position: 2 })
        );

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.status, PlayerStatus::Playing);
        assert_eq!(snapshot.now_playing.as_ref().unwrap().title(), "a");
        assert_eq!(titles(&snapshot), vec!["b", "c"]);
        assert_eq!(recorder.played_titles(), vec!["a"]);
        assert_eq!(
            recorder.calls()[0],
            Call::Connect(guild(), channel()),
            "la conexión se establece antes de reproducir"
        );
    }

    #[tokio::test]
    async fn skip_advances_once_the_end_callback_arrives() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        for title in ["a", "b", "c"] {
            manager.enqueue(track(title), channel()).await.unwrap();
        }

        let skipped = manager.skip().await.unwrap();
        assert_eq!(skipped.title(), "a");
        assert!(recorder.calls().contains(&Call::Stop(guild())));

        // Hasta el callback, el track sigue siendo el actual.
        let before = manager.snapshot().await.unwrap();
        assert_eq!(before.now_playing, Some(skipped.clone()));

        assert!(manager.post(LifecycleEvent::Ended(recorder.last_request(), EndReason::Stopped)).await);

        let after = manager.snapshot().await.unwrap();
        assert_eq!(after.now_playing.as_ref().unwrap().title(), "b");
        assert_eq!(titles(&after), vec!["c"]);
        assert_eq!(recorder.played_titles(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn skip_on_last_track_goes_idle() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        manager.enqueue(track("a"), channel()).await.unwrap();

        manager.skip().await.unwrap();
        manager
            .post(LifecycleEvent::Ended(recorder.last_request(), EndReason::Stopped))
            .await;

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.status, PlayerStatus::Idle);
        assert!(snapshot.now_playing.is_none());
        assert_eq!(manager.skip().await, Err(AudioError::NothingPlaying));
    }

    #[tokio::test]
    async fn pause_then_resume_restores_playing() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        manager.enqueue(track("a"), channel()).await.unwrap();
        manager.enqueue(track("b"), channel()).await.unwrap();
        let before = manager.snapshot().await.unwrap();

        assert_eq!(manager.resume().await, Err(AudioError::InvalidState {
            operation: "reanudar",
            status: PlayerStatus::Playing,
        }));
        manager.pause().await.unwrap();
        assert_eq!(manager.snapshot().await.unwrap().status, PlayerStatus::Paused);
        assert!(manager.pause().await.is_err());
        manager.resume().await.unwrap();

        let after = manager.snapshot().await.unwrap();
        assert_eq!(after.status, PlayerStatus::Playing);
        assert_eq!(after.now_playing, before.now_playing);
        assert_eq!(after.queue, before.queue);
        assert!(recorder.calls().ends_with(&[Call::Pause(guild()), Call::Resume(guild())]));
    }

    #[tokio::test]
    async fn pause_while_idle_is_rejected() {
        let (services, _recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);

        assert_eq!(
            manager.pause().await,
            Err(AudioError::InvalidState {
                operation: "pausar",
                status: PlayerStatus::Idle,
            })
        );
    }

    #[tokio::test]
    async fn volume_is_clamped_and_applied() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);

        // Sin nada sonando sólo se guarda.
        assert_eq!(manager.set_volume(80).await, Ok(80));
        manager.enqueue(track("a"), channel()).await.unwrap();
        assert_eq!(recorder.last_request().volume, 80);

        assert_eq!(manager.set_volume(200).await, Ok(150));
        assert_eq!(recorder.calls().last(), Some(&Call::Volume(guild(), 150)));
        assert_eq!(manager.snapshot().await.unwrap().volume, 150);
    }

    #[tokio::test]
    async fn clear_queue_keeps_current_track() {
        let (services, _recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        for title in ["a", "b", "c"] {
            manager.enqueue(track(title), channel()).await.unwrap();
        }

        assert_eq!(manager.clear_queue().await, Ok(2));
        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.now_playing.as_ref().unwrap().title(), "a");
        assert!(snapshot.queue.is_empty());
    }

    #[tokio::test]
    async fn load_failure_does_not_stall_the_queue() {
        let (services, recorder, mut notifications) = testing::services(testing::settings());
        let manager = spawn(services);

        let a = track("a");
        manager.enqueue(a.clone(), channel()).await.unwrap();
        let request_a = recorder.last_request();
        manager.enqueue(track("b"), channel()).await.unwrap();

        manager
            .post(LifecycleEvent::LoadFailed(
                request_a,
                TrackFailure::Unavailable("video privado".into()),
            ))
            .await;

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.now_playing.unwrap().title(), "b");
        assert_eq!(recorder.played_titles(), vec!["a", "b"]);

        let (guild_id, request, failure) = notifications.recv().await.unwrap();
        assert_eq!(guild_id, guild());
        assert_eq!(request, RequestRef::for_track(&a));
        assert_eq!(failure, TrackFailure::Unavailable("video privado".into()));
    }

    #[tokio::test]
    async fn playback_exception_advances_without_repeat() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        manager.set_repeat_mode(RepeatMode::Single).await.unwrap();
        manager.enqueue(track("a"), channel()).await.unwrap();
        manager.enqueue(track("b"), channel()).await.unwrap();

        manager
            .post(LifecycleEvent::PlaybackException(
                recorder.last_request(),
                TrackFailure::Decode("stream cortado".into()),
            ))
            .await;

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.now_playing.unwrap().title(), "b");
        assert!(snapshot.queue.is_empty());
    }

    #[tokio::test]
    async fn repeat_single_replays_finished_track() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        manager.set_repeat_mode(RepeatMode::Single).await.unwrap();
        manager.enqueue(track("a"), channel()).await.unwrap();
        manager.enqueue(track("b"), channel()).await.unwrap();
        let first = recorder.last_request();

        manager.post(LifecycleEvent::Ended(first.clone(), EndReason::Finished)).await;

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.now_playing, Some(first.track));
        assert_eq!(titles(&snapshot), vec!["b"]);
        assert_eq!(recorder.played_titles(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn stale_callbacks_are_discarded() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        manager.enqueue(track("a"), channel()).await.unwrap();
        manager.enqueue(track("b"), channel()).await.unwrap();
        let current = recorder.last_request();

        let mut other_epoch = current.clone();
        other_epoch.epoch = 99;
        manager.post(LifecycleEvent::Ended(other_epoch, EndReason::Finished)).await;

        let mut other_track = current.clone();
        other_track.track = track("fantasma");
        manager.post(LifecycleEvent::Ended(other_track, EndReason::Finished)).await;

        // El mismo fin dos veces sólo avanza una.
        manager.post(LifecycleEvent::Ended(current.clone(), EndReason::Finished)).await;
        manager.post(LifecycleEvent::Ended(current, EndReason::Finished)).await;

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.now_playing.unwrap().title(), "b");
        assert_eq!(recorder.played_titles(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn connection_failure_keeps_track_queued_for_retry() {
        let attempts = AtomicUsize::new(0);
        let mut voice = MockVoiceGateway::new();
        voice.expect_connect().times(2).returning(move |guild_id, channel_id| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AudioError::Connection("sin permisos".into()))
            } else {
                Ok(ConnectionHandle { guild_id, channel_id })
            }
        });
        voice.expect_disconnect().returning(|_| Ok(()));

        let (mut services, recorder, _rx) = testing::services(testing::settings());
        services.voice = Arc::new(voice);
        let manager = spawn(services);

        assert_eq!(
            manager.enqueue(track("a"), channel()).await,
            Err(AudioError::Connection("sin permisos".into()))
        );
        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.status, PlayerStatus::Idle);
        assert_eq!(titles(&snapshot), vec!["a"]);

        assert_eq!(
            manager.enqueue(track("b"), channel()).await,
            Ok(EnqueueOutcome::Queued { position: 1 })
        );
        assert_eq!(recorder.played_titles(), vec!["a"]);
    }

    #[tokio::test]
    async fn backend_rejection_moves_on_to_next_track() {
        let mut backend = MockAudioBackend::new();
        backend.expect_play().times(2).returning(|_, request| {
            if request.track.title() == "roto" {
                Err(AudioError::Backend("codec desconocido".into()))
            } else {
                Ok(())
            }
        });

        let (mut services, _recorder, mut notifications) = testing::services(testing::settings());
        services.backend = Arc::new(backend);
        let manager = spawn(services);

        let broken = track("roto");
        manager.enqueue(broken.clone(), channel()).await.unwrap();
        assert_eq!(manager.snapshot().await.unwrap().status, PlayerStatus::Idle);

        assert_eq!(manager.enqueue(track("b"), channel()).await, Ok(EnqueueOutcome::Started));
        let (_, request, _) = notifications.recv().await.unwrap();
        assert_eq!(request, RequestRef::for_track(&broken));
    }

    #[tokio::test]
    async fn move_to_reconnects_and_retries_pending_queue() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        let elsewhere = ChannelId::new(11);

        manager.move_to(elsewhere).await.unwrap();
        manager.enqueue(track("a"), channel()).await.unwrap();

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.connected, Some(elsewhere));
        assert_eq!(
            recorder.calls(),
            vec![Call::Connect(guild(), elsewhere), Call::Play(guild(), "a".into())]
        );
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = spawn(services);
        manager.enqueue(track("a"), channel()).await.unwrap();
        manager.enqueue(track("b"), channel()).await.unwrap();
        let request = recorder.last_request();

        manager.shutdown().await.unwrap();

        assert!(manager.is_closed());
        assert!(recorder.calls().ends_with(&[Call::Stop(guild()), Call::Disconnect(guild())]));
        assert_eq!(manager.enqueue(track("c"), channel()).await, Err(AudioError::ManagerClosed));
        assert!(!manager.post(LifecycleEvent::Ended(request, EndReason::Stopped)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commands_and_callbacks_never_double_advance() {
        const TRACKS: usize = 12;
        let (services, recorder, _rx) = testing::services(testing::settings());
        let manager = Arc::new(spawn(services));

        let enqueues: Vec<_> = (0..TRACKS)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    let title = format!("t{i}");
                    let outcome = manager.enqueue(track(&title), channel()).await.unwrap();
                    (title, outcome)
                })
            })
            .collect();
        let mut accepted: Vec<_> = futures::future::join_all(enqueues)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        // Nada termina durante los enqueues, así que la posición devuelta es el
        // orden de llegada.
        accepted.sort_by_key(|(_, outcome)| match outcome {
            EnqueueOutcome::Started => 0,
            EnqueueOutcome::Queued { position } => *position,
        });
        let arrival: Vec<String> = accepted.into_iter().map(|(title, _)| title).collect();
        assert_eq!(recorder.played_titles(), vec![arrival[0].clone()]);

        for _ in 0..TRACKS {
            let current = recorder.last_request();
            let mut racers: Vec<_> = (0..3)
                .map(|_| {
                    let manager = manager.clone();
                    let event = LifecycleEvent::Ended(current.clone(), EndReason::Finished);
                    tokio::spawn(async move {
                        manager.post(event).await;
                    })
                })
                .collect();
            let skipper = manager.clone();
            racers.push(tokio::spawn(async move {
                let _ = skipper.skip().await;
            }));
            for racer in futures::future::join_all(racers).await {
                racer.unwrap();
            }

            // El snapshot entra al buzón detrás de los eventos anteriores.
            manager.snapshot().await.unwrap();
        }

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.status, PlayerStatus::Idle);
        assert!(snapshot.queue.is_empty());
        assert_eq!(recorder.played_titles(), arrival);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_disconnects() {
        let mut settings = testing::settings();
        settings.idle_timeout = Some(Duration::from_secs(30));
        let (services, recorder, _rx) = testing::services(settings);
        let manager = spawn(services);

        manager.enqueue(track("a"), channel()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!manager.is_closed(), "no expira mientras suena");

        manager
            .post(LifecycleEvent::Ended(recorder.last_request(), EndReason::Finished))
            .await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(manager.is_closed());
        assert_eq!(recorder.calls().last(), Some(&Call::Disconnect(guild())));
    }
}
