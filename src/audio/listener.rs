use tracing::debug;

use crate::{
    audio::{
        collaborators::PlaybackRequest,
        manager::LifecycleEvent,
        registry::AudioRegistry,
        state::EndReason,
    },
    error::TrackFailure,
};

/// Punto de entrada de los callbacks del backend de audio.
///
/// Enruta cada evento al buzón del manager del guild. Nunca crea managers:
/// un callback para un guild sin manager vivo (o de otra época) se descarta.
#[derive(Clone)]
pub struct TrackEventListener {
    registry: AudioRegistry,
}

impl TrackEventListener {
    pub fn new(registry: AudioRegistry) -> Self {
        Self { registry }
    }

    pub async fn on_track_start(&self, request: PlaybackRequest) -> bool {
        self.route(LifecycleEvent::Started(request)).await
    }

    pub async fn on_track_end(&self, request: PlaybackRequest, reason: EndReason) -> bool {
        self.route(LifecycleEvent::Ended(request, reason)).await
    }

    pub async fn on_track_load_failure(&self, request: PlaybackRequest, failure: TrackFailure) -> bool {
        self.route(LifecycleEvent::LoadFailed(request, failure)).await
    }

    pub async fn on_playback_exception(&self, request: PlaybackRequest, failure: TrackFailure) -> bool {
        self.route(LifecycleEvent::PlaybackException(request, failure)).await
    }

    async fn route(&self, event: LifecycleEvent) -> bool {
        let request = event.request();
        let Some(manager) = self.registry.get(request.guild_id) else {
            debug!("Callback para guild {} sin reproductor activo, descartado", request.guild_id);
            return false;
        };

        if manager.epoch() != request.epoch {
            debug!(
                "Callback de época {} para guild {} (actual {}), descartado",
                request.epoch,
                request.guild_id,
                manager.epoch()
            );
            return false;
        }

        manager.post(event).await
    }
}
