use async_trait::async_trait;
use dashmap::DashMap;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::{
    audio::collaborators::{FailureNotifier, RequestRef},
    error::TrackFailure,
};

/// Publica los fallos de carga en el último canal de texto donde se usó un
/// comando de música en ese guild.
pub struct ChatNotifier {
    http: Arc<Http>,
    channels: DashMap<GuildId, ChannelId>,
}

impl ChatNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            channels: DashMap::new(),
        }
    }

    pub fn remember(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.channels.insert(guild_id, channel_id);
    }
}

#[async_trait]
impl FailureNotifier for ChatNotifier {
    async fn notify_failure(&self, guild_id: GuildId, request: RequestRef, failure: TrackFailure) {
        let Some(channel_id) = self.channels.get(&guild_id).map(|entry| *entry.value()) else {
            warn!("Sin canal de texto para avisar el fallo en guild {}", guild_id);
            return;
        };

        if let Err(e) = channel_id.say(&self.http, failure_message(&request, &failure)).await {
            error!("Error al enviar aviso de fallo en guild {}: {:?}", guild_id, e);
        }
    }
}

pub fn failure_message(request: &RequestRef, failure: &TrackFailure) -> String {
    format!(
        "❌ No se pudo reproducir **{}**: {}. Continuando con la cola.",
        request.query, failure
    )
}
