use async_trait::async_trait;
use serenity::model::id::UserId;
use songbird::input::{AudioStreamError, Compose, YoutubeDl};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

use crate::{
    audio::{collaborators::TrackResolver, track::TrackItem},
    error::TrackFailure,
};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(25);

/// Resuelve búsquedas y URLs con yt-dlp (vía el `YoutubeDl` de Songbird).
pub struct YtDlpResolver {
    http: reqwest::Client,
}

impl YtDlpResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<TrackItem, TrackFailure> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TrackFailure::NoMatches(String::new()));
        }

        let mut source = if is_url(query) {
            YoutubeDl::new(self.http.clone(), query.to_string())
        } else {
            YoutubeDl::new_search(self.http.clone(), query.to_string())
        };

        info!("🔍 Buscando: {}", query);
        let metadata = match timeout(RESOLVE_TIMEOUT, source.aux_metadata()).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(AudioStreamError::Unsupported)) => {
                return Err(TrackFailure::Unsupported(query.to_string()));
            }
            Ok(Err(e)) => {
                warn!("❌ yt-dlp falló para '{}': {}", query, e);
                return Err(TrackFailure::Unavailable(e.to_string()));
            }
            Err(_) => {
                warn!("⏰ Timeout resolviendo '{}'", query);
                return Err(TrackFailure::Unavailable("tiempo de espera agotado".into()));
            }
        };

        let url = metadata.source_url.unwrap_or_else(|| query.to_string());
        let title = match metadata.title {
            Some(title) => title,
            None if is_url(query) => url.clone(),
            None => return Err(TrackFailure::NoMatches(query.to_string())),
        };

        Ok(TrackItem::new(url, title, metadata.duration, requested_by))
    }
}

/// `true` si la consulta es una URL http(s) y no un término de búsqueda.
pub fn is_url(query: &str) -> bool {
    Url::parse(query)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
