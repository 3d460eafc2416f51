//! Interfaces hacia los colaboradores externos del motor de audio.
//!
//! El motor nunca habla con Discord ni decodifica audio: delega en estas
//! interfaces. Las implementaciones de producción viven en [`crate::voice`].

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};

use crate::{
    audio::track::{TrackId, TrackItem},
    error::{AudioError, TrackFailure},
};

/// Conexión de voz establecida para un guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// Petición de reproducción entregada al backend. Los callbacks del ciclo de
/// vida la devuelven tal cual para que el manager detecte eventos obsoletos.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub guild_id: GuildId,
    pub epoch: u64,
    pub track: TrackItem,
    pub volume: u16,
}

/// Referencia a una petición cuya carga falló.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRef {
    pub track_id: Option<TrackId>,
    pub query: String,
}

impl RequestRef {
    pub fn for_track(track: &TrackItem) -> Self {
        Self {
            track_id: Some(track.id()),
            query: track.title().to_string(),
        }
    }

    pub fn for_query(query: impl Into<String>) -> Self {
        Self {
            track_id: None,
            query: query.into(),
        }
    }
}

/// Reproduce y controla audio sobre una conexión de voz.
///
/// Por cada `play` aceptado el backend invoca exactamente uno de los
/// callbacks terminales de [`crate::audio::listener::TrackEventListener`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn play(&self, connection: ConnectionHandle, request: PlaybackRequest) -> Result<(), AudioError>;

    async fn stop(&self, connection: ConnectionHandle) -> Result<(), AudioError>;

    async fn pause(&self, connection: ConnectionHandle) -> Result<(), AudioError>;

    async fn resume(&self, connection: ConnectionHandle) -> Result<(), AudioError>;

    async fn set_volume(&self, connection: ConnectionHandle, volume: u16) -> Result<(), AudioError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<ConnectionHandle, AudioError>;

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), AudioError>;
}

/// Resuelve una búsqueda o URL a un track reproducible.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<TrackItem, TrackFailure>;
}

/// Avisa en el chat de un track que no se pudo reproducir.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify_failure(&self, guild_id: GuildId, request: RequestRef, failure: TrackFailure);
}
