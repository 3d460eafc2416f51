use thiserror::Error;

use crate::audio::state::PlayerStatus;

/// Errores del motor de audio por guild.
///
/// Sólo `InvalidState`, `NothingPlaying`, `QueueFull` y `Connection` llegan al
/// usuario de forma síncrona; los fallos por track se notifican aparte y nunca
/// detienen al manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("no se puede {operation} mientras el reproductor está {status}")]
    InvalidState {
        operation: &'static str,
        status: PlayerStatus,
    },

    #[error("no hay ninguna canción reproduciéndose")]
    NothingPlaying,

    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("no se pudo conectar al canal de voz: {0}")]
    Connection(String),

    #[error("el reproductor de este servidor ya fue cerrado")]
    ManagerClosed,

    #[error("error del backend de audio: {0}")]
    Backend(String),
}

/// Motivo por el que un track no pudo cargarse o reproducirse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackFailure {
    #[error("no se encontraron resultados para `{0}`")]
    NoMatches(String),

    #[error("la fuente no está disponible: {0}")]
    Unavailable(String),

    #[error("formato de audio no soportado: {0}")]
    Unsupported(String),

    #[error("error al decodificar el audio: {0}")]
    Decode(String),
}
