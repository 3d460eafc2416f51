use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{Input, YoutubeDl},
    tracks::{PlayError, PlayMode, Track, TrackHandle, TrackState},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, OnceLock},
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        collaborators::{AudioBackend, ConnectionHandle, PlaybackRequest, VoiceGateway},
        listener::TrackEventListener,
        state::EndReason,
        track::TrackId,
    },
    error::{AudioError, TrackFailure},
};

struct ActiveTrack {
    track_id: TrackId,
    handle: TrackHandle,
}

/// Backend de audio sobre Songbird: un track activo por guild, con los
/// eventos del driver reenviados al [`TrackEventListener`].
pub struct SongbirdBackend {
    songbird: Arc<Songbird>,
    http: reqwest::Client,
    listener: OnceLock<TrackEventListener>,
    active: Mutex<HashMap<GuildId, ActiveTrack>>,
    stopped: Arc<StopLedger>,
}

impl SongbirdBackend {
    pub fn new(songbird: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self {
            songbird,
            http,
            listener: OnceLock::new(),
            active: Mutex::new(HashMap::new()),
            stopped: Arc::new(StopLedger::default()),
        }
    }

    /// Gateway de voz que comparte el registro de paradas con este backend.
    pub fn voice(&self) -> SongbirdVoice {
        SongbirdVoice {
            songbird: self.songbird.clone(),
            stopped: self.stopped.clone(),
        }
    }

    /// Conecta los eventos de Songbird con el registro. Se llama una vez al
    /// arrancar, cuando el registro ya existe.
    pub fn attach(&self, listener: TrackEventListener) {
        if self.listener.set(listener).is_err() {
            warn!("El backend de Songbird ya tenía un listener asignado");
        }
    }

    fn handle(&self, guild_id: GuildId) -> Option<TrackHandle> {
        self.active.lock().get(&guild_id).map(|active| active.handle.clone())
    }
}

#[async_trait]
impl AudioBackend for SongbirdBackend {
    async fn play(&self, connection: ConnectionHandle, request: PlaybackRequest) -> Result<(), AudioError> {
        let listener = self
            .listener
            .get()
            .cloned()
            .ok_or_else(|| AudioError::Backend("backend sin listener de eventos".into()))?;
        let call = self
            .songbird
            .get(connection.guild_id)
            .ok_or_else(|| AudioError::Backend(format!("sin llamada de voz en guild {}", connection.guild_id)))?;

        let input: Input = YoutubeDl::new(self.http.clone(), request.track.source().to_string()).into();
        // Empieza en pausa para que los eventos queden registrados antes del primer frame.
        let track = Track::new(input).volume(volume_ratio(request.volume)).pause();

        let handle = {
            let mut call = call.lock().await;
            call.play(track)
        };

        arm(&handle, &request, &listener, &self.stopped)?;

        self.active.lock().insert(
            connection.guild_id,
            ActiveTrack {
                track_id: request.track.id(),
                handle,
            },
        );
        Ok(())
    }

    async fn stop(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        let Some(active) = self.active.lock().remove(&connection.guild_id) else {
            return Ok(());
        };

        request_stop(&active.handle, connection.guild_id, active.track_id, &self.stopped);
        Ok(())
    }

    async fn pause(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        let handle = self.handle(connection.guild_id).ok_or(AudioError::NothingPlaying)?;
        handle
            .pause()
            .map_err(|e| AudioError::Backend(format!("error al pausar: {}", e)))
    }

    async fn resume(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        let handle = self.handle(connection.guild_id).ok_or(AudioError::NothingPlaying)?;
        handle
            .play()
            .map_err(|e| AudioError::Backend(format!("error al reanudar: {}", e)))
    }

    async fn set_volume(&self, connection: ConnectionHandle, volume: u16) -> Result<(), AudioError> {
        let handle = self.handle(connection.guild_id).ok_or(AudioError::NothingPlaying)?;
        handle
            .set_volume(volume_ratio(volume))
            .map_err(|e| AudioError::Backend(format!("error al ajustar volumen: {}", e)))
    }
}

/// Conexiones de voz gestionadas por Songbird. Se obtiene con
/// [`SongbirdBackend::voice`].
pub struct SongbirdVoice {
    songbird: Arc<Songbird>,
    stopped: Arc<StopLedger>,
}

#[async_trait]
impl VoiceGateway for SongbirdVoice {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<ConnectionHandle, AudioError> {
        info!("🔗 Conectando al canal {} en guild {}", channel_id, guild_id);
        self.songbird
            .join(guild_id, channel_id)
            .await
            .map_err(|e| AudioError::Connection(e.to_string()))?;

        Ok(ConnectionHandle { guild_id, channel_id })
    }

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        // Sin driver no llegan más eventos de fin para este guild.
        self.stopped.forget_guild(connection.guild_id);
        self.songbird
            .remove(connection.guild_id)
            .await
            .map_err(|e| AudioError::Connection(e.to_string()))?;

        info!("👋 Desconectado del guild {}", connection.guild_id);
        Ok(())
    }
}

/// Tracks a los que se les pidió `stop`, por guild. Su evento de fin se
/// reporta como `Stopped` aunque el driver lo vea terminar solo.
#[derive(Default)]
struct StopLedger {
    pending: Mutex<HashMap<GuildId, HashSet<TrackId>>>,
}

impl StopLedger {
    fn mark(&self, guild_id: GuildId, track_id: TrackId) {
        self.pending.lock().entry(guild_id).or_default().insert(track_id);
    }

    fn end_reason(&self, guild_id: GuildId, track_id: TrackId) -> EndReason {
        let mut pending = self.pending.lock();
        let Some(ids) = pending.get_mut(&guild_id) else {
            return EndReason::Finished;
        };

        let stopped = ids.remove(&track_id);
        if ids.is_empty() {
            pending.remove(&guild_id);
        }

        if stopped {
            EndReason::Stopped
        } else {
            EndReason::Finished
        }
    }

    fn forget_guild(&self, guild_id: GuildId) {
        self.pending.lock().remove(&guild_id);
    }
}

/// Operaciones sobre un track ya entregado a la llamada.
trait DriverTrack {
    fn relay(&self, event: TrackEvent, relay: LifecycleRelay) -> Result<(), AudioError>;

    fn start(&self) -> Result<(), AudioError>;

    fn halt(&self) -> Result<(), AudioError>;
}

impl DriverTrack for TrackHandle {
    fn relay(&self, event: TrackEvent, relay: LifecycleRelay) -> Result<(), AudioError> {
        self.add_event(Event::Track(event), relay)
            .map_err(|e| AudioError::Backend(format!("error al agregar event handler: {}", e)))
    }

    fn start(&self) -> Result<(), AudioError> {
        self.play()
            .map_err(|e| AudioError::Backend(format!("error al iniciar el track: {}", e)))
    }

    fn halt(&self) -> Result<(), AudioError> {
        self.stop()
            .map_err(|e| AudioError::Backend(format!("error al detener el track: {}", e)))
    }
}

const RELAYS: [(TrackEvent, RelayKind); 3] = [
    (TrackEvent::Play, RelayKind::Start),
    (TrackEvent::End, RelayKind::End),
    (TrackEvent::Error, RelayKind::Error),
];

/// Registra los relays y arranca el track. Si algo falla el track se detiene
/// para que no quede huérfano en la llamada.
fn arm<T: DriverTrack>(
    track: &T,
    request: &PlaybackRequest,
    listener: &TrackEventListener,
    stopped: &Arc<StopLedger>,
) -> Result<(), AudioError> {
    let armed = RELAYS
        .iter()
        .try_for_each(|(event, kind)| {
            track.relay(
                *event,
                LifecycleRelay {
                    kind: *kind,
                    request: request.clone(),
                    listener: listener.clone(),
                    stopped: stopped.clone(),
                },
            )
        })
        .and_then(|()| track.start());

    if let Err(e) = &armed {
        warn!("❌ Track descartado en guild {}: {}", request.guild_id, e);
        if let Err(e) = track.halt() {
            debug!("No se pudo detener el track descartado: {}", e);
        }
    }
    armed
}

fn request_stop<T: DriverTrack>(track: &T, guild_id: GuildId, track_id: TrackId, stopped: &StopLedger) {
    stopped.mark(guild_id, track_id);
    if let Err(e) = track.halt() {
        // Ya había terminado; si su evento de fin sigue en camino saldrá como Stopped.
        debug!("Track {} ya detenido en {}: {}", track_id, guild_id, e);
    }
}

#[derive(Debug, Clone, Copy)]
enum RelayKind {
    Start,
    End,
    Error,
}

/// Handler de Songbird que traduce eventos del driver a callbacks del listener.
struct LifecycleRelay {
    kind: RelayKind,
    request: PlaybackRequest,
    listener: TrackEventListener,
    stopped: Arc<StopLedger>,
}

#[async_trait]
impl VoiceEventHandler for LifecycleRelay {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let request = self.request.clone();

        match self.kind {
            RelayKind::Start => {
                self.listener.on_track_start(request).await;
            }
            RelayKind::End => {
                let reason = self.stopped.end_reason(request.guild_id, request.track.id());
                debug!("🎵 Track terminado en guild {} ({:?})", request.guild_id, reason);
                self.listener.on_track_end(request, reason).await;
            }
            RelayKind::Error => {
                let Some(state) = first_state(ctx) else {
                    return None;
                };

                match classify(state) {
                    Failure::Load(failure) => {
                        warn!("❌ Error al cargar track en guild {}: {}", request.guild_id, failure);
                        self.listener.on_track_load_failure(request, failure).await;
                    }
                    Failure::Playback(failure) => {
                        error!("❌ Error en track para guild {}: {}", request.guild_id, failure);
                        self.listener.on_playback_exception(request, failure).await;
                    }
                }
            }
        }

        None
    }
}

enum Failure {
    Load(TrackFailure),
    Playback(TrackFailure),
}

fn first_state<'a>(ctx: &'a EventContext<'_>) -> Option<&'a TrackState> {
    match ctx {
        EventContext::Track(tracks) => tracks.first().map(|(state, _)| *state),
        _ => None,
    }
}

fn classify(state: &TrackState) -> Failure {
    match &state.playing {
        PlayMode::Errored(PlayError::Create(e)) => Failure::Load(TrackFailure::Unavailable(e.to_string())),
        PlayMode::Errored(PlayError::Parse(e)) => Failure::Load(TrackFailure::Unsupported(e.to_string())),
        PlayMode::Errored(e) => Failure::Playback(TrackFailure::Decode(format!("{:?}", e))),
        other => Failure::Playback(TrackFailure::Decode(format!("estado inesperado: {:?}", other))),
    }
}

fn volume_ratio(volume: u16) -> f32 {
    f32::from(volume) / 100.0
}
