use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::{
    audio::{
        collaborators::{
            AudioBackend, ConnectionHandle, FailureNotifier, PlaybackRequest, RequestRef, VoiceGateway,
        },
        manager::{AudioServices, PlayerSettings},
        track::TrackItem,
    },
    error::{AudioError, TrackFailure},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(GuildId, ChannelId),
    Disconnect(GuildId),
    Play(GuildId, String),
    Stop(GuildId),
    Pause(GuildId),
    Resume(GuildId),
    Volume(GuildId, u16),
}

/// Backend y gateway de voz falsos que sólo registran las llamadas.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    requests: Mutex<Vec<PlaybackRequest>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn last_request(&self) -> PlaybackRequest {
        self.requests.lock().last().cloned().expect("ningún play registrado")
    }

    pub fn played_titles(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.track.title().to_string()).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AudioBackend for Recorder {
    async fn play(&self, connection: ConnectionHandle, request: PlaybackRequest) -> Result<(), AudioError> {
        self.record(Call::Play(connection.guild_id, request.track.title().to_string()));
        self.requests.lock().push(request);
        Ok(())
    }

    async fn stop(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        self.record(Call::Stop(connection.guild_id));
        Ok(())
    }

    async fn pause(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        self.record(Call::Pause(connection.guild_id));
        Ok(())
    }

    async fn resume(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        self.record(Call::Resume(connection.guild_id));
        Ok(())
    }

    async fn set_volume(&self, connection: ConnectionHandle, volume: u16) -> Result<(), AudioError> {
        self.record(Call::Volume(connection.guild_id, volume));
        Ok(())
    }
}

#[async_trait]
impl VoiceGateway for Recorder {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<ConnectionHandle, AudioError> {
        self.record(Call::Connect(guild_id, channel_id));
        Ok(ConnectionHandle { guild_id, channel_id })
    }

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), AudioError> {
        self.record(Call::Disconnect(connection.guild_id));
        Ok(())
    }
}

pub struct ChannelNotifier(pub mpsc::UnboundedSender<(GuildId, RequestRef, TrackFailure)>);

#[async_trait]
impl FailureNotifier for ChannelNotifier {
    async fn notify_failure(&self, guild_id: GuildId, request: RequestRef, failure: TrackFailure) {
        let _ = self.0.send((guild_id, request, failure));
    }
}

pub type Notifications = mpsc::UnboundedReceiver<(GuildId, RequestRef, TrackFailure)>;

pub fn settings() -> PlayerSettings {
    PlayerSettings {
        default_volume: 100,
        max_volume: 150,
        max_queue_size: 50,
        idle_timeout: None,
        inbox_capacity: 16,
    }
}

pub fn services(settings: PlayerSettings) -> (AudioServices, Arc<Recorder>, Notifications) {
    let recorder = Arc::new(Recorder::default());
    let (tx, rx) = mpsc::unbounded_channel();
    let services = AudioServices {
        backend: recorder.clone(),
        voice: recorder.clone(),
        notifier: Arc::new(ChannelNotifier(tx)),
        settings,
    };
    (services, recorder, rx)
}

pub fn track(title: &str) -> TrackItem {
    TrackItem::new(
        format!("https://example.com/{title}.mp3"),
        title,
        Some(Duration::from_secs(180)),
        UserId::new(42),
    )
}

pub fn guild() -> GuildId {
    GuildId::new(1)
}

pub fn channel() -> ChannelId {
    ChannelId::new(10)
}
