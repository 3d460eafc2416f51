use rand::seq::SliceRandom;
use serenity::model::id::GuildId;
use std::{collections::VecDeque, fmt};
use tracing::{debug, info};

use crate::{
    audio::track::{TrackId, TrackItem},
    error::AudioError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlayerStatus::Idle => "inactivo",
            PlayerStatus::Playing => "reproduciendo",
            PlayerStatus::Paused => "en pausa",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    Single,
    Queue,
}

/// Motivo con el que el backend cierra un track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    Stopped,
    Replaced,
}

// El track actual vive dentro del estado de reproducción, así que
// "hay track actual" y "reproduciendo o en pausa" no pueden divergir.
#[derive(Debug, Clone)]
enum Playback {
    Idle,
    Playing(TrackItem),
    Paused(TrackItem),
}

/// Estado mutable de un guild. Sólo lo toca su `GuildAudioManager`.
#[derive(Debug)]
pub struct GuildPlayerState {
    guild_id: GuildId,
    queue: VecDeque<TrackItem>,
    playback: Playback,
    volume: u16,
    max_volume: u16,
    repeat: RepeatMode,
    max_queue_size: usize,
}

impl GuildPlayerState {
    pub fn new(guild_id: GuildId, volume: u16, max_volume: u16, max_queue_size: usize) -> Self {
        Self {
            guild_id,
            queue: VecDeque::new(),
            playback: Playback::Idle,
            volume: volume.min(max_volume),
            max_volume,
            repeat: RepeatMode::Off,
            max_queue_size,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn status(&self) -> PlayerStatus {
        match self.playback {
            Playback::Idle => PlayerStatus::Idle,
            Playback::Playing(_) => PlayerStatus::Playing,
            Playback::Paused(_) => PlayerStatus::Paused,
        }
    }

    pub fn now_playing(&self) -> Option<&TrackItem> {
        match &self.playback {
            Playback::Idle => None,
            Playback::Playing(track) | Playback::Paused(track) => Some(track),
        }
    }

    pub fn is_current(&self, id: TrackId) -> bool {
        self.now_playing().is_some_and(|track| track.id() == id)
    }

    pub fn queue(&self) -> &VecDeque<TrackItem> {
        &self.queue
    }

    pub fn volume(&self) -> u16 {
        self.volume
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    /// Agrega al final de la cola y devuelve la posición (1 = siguiente).
    pub fn push(&mut self, track: TrackItem) -> Result<usize, AudioError> {
        if self.queue.len() >= self.max_queue_size {
            return Err(AudioError::QueueFull {
                max: self.max_queue_size,
            });
        }

        info!("➕ Agregado a la cola de {}: {}", self.guild_id, track.title());
        self.queue.push_back(track);
        Ok(self.queue.len())
    }

    /// Saca la cabeza de la cola y la marca como actual. Sólo avanza desde
    /// `Idle`: nunca hay más de un track en vuelo.
    pub fn start_next(&mut self) -> Option<TrackItem> {
        if !matches!(self.playback, Playback::Idle) {
            return None;
        }

        let next = self.queue.pop_front()?;
        debug!("➡️ Siguiente en cola (FIFO) para {}: {}", self.guild_id, next.title());
        self.playback = Playback::Playing(next.clone());
        Some(next)
    }

    /// Adopta un track que el backend empezó por su cuenta.
    pub fn adopt(&mut self, track: TrackItem) -> bool {
        if !matches!(self.playback, Playback::Idle) {
            return false;
        }

        self.queue.retain(|queued| queued != &track);
        self.playback = Playback::Playing(track);
        true
    }

    /// Cierra el track actual aplicando el modo de repetición.
    pub fn end_current(&mut self, reason: EndReason) -> Option<TrackItem> {
        let ended = self.take_current()?;

        if reason == EndReason::Finished {
            match self.repeat {
                RepeatMode::Single => {
                    info!("🔂 Repitiendo track: {}", ended.title());
                    self.queue.push_front(ended.clone());
                }
                RepeatMode::Queue => {
                    info!("🔁 Track agregado al final por loop de cola: {}", ended.title());
                    self.queue.push_back(ended.clone());
                }
                RepeatMode::Off => {}
            }
        }

        Some(ended)
    }

    /// Descarta el track actual sin repetirlo (fallo de carga o reproducción).
    pub fn drop_current(&mut self) -> Option<TrackItem> {
        self.take_current()
    }

    pub fn pause(&mut self) -> Result<(), AudioError> {
        match std::mem::replace(&mut self.playback, Playback::Idle) {
            Playback::Playing(track) => {
                self.playback = Playback::Paused(track);
                Ok(())
            }
            other => {
                self.playback = other;
                Err(AudioError::InvalidState {
                    operation: "pausar",
                    status: self.status(),
                })
            }
        }
    }

    pub fn resume(&mut self) -> Result<(), AudioError> {
        match std::mem::replace(&mut self.playback, Playback::Idle) {
            Playback::Paused(track) => {
                self.playback = Playback::Playing(track);
                Ok(())
            }
            other => {
                self.playback = other;
                Err(AudioError::InvalidState {
                    operation: "reanudar",
                    status: self.status(),
                })
            }
        }
    }

    pub fn set_volume(&mut self, volume: u16) -> u16 {
        self.volume = volume.min(self.max_volume);
        self.volume
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    pub fn clear_queue(&mut self) -> usize {
        let cleared = self.queue.len();
        self.queue.clear();
        cleared
    }

    pub fn shuffle_queue(&mut self) -> usize {
        let mut rng = rand::thread_rng();
        self.queue.make_contiguous().shuffle(&mut rng);
        self.queue.len()
    }

    /// Vuelve a `Idle` con la cola vacía, devolviendo el track que sonaba.
    pub fn reset(&mut self) -> Option<TrackItem> {
        self.queue.clear();
        self.take_current()
    }

    fn take_current(&mut self) -> Option<TrackItem> {
        match std::mem::replace(&mut self.playback, Playback::Idle) {
            Playback::Idle => None,
            Playback::Playing(track) | Playback::Paused(track) => Some(track),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn state() -> GuildPlayerState {
        GuildPlayerState::new(GuildId::new(1), 100, 150, 3)
    }

    fn track(title: &str) -> TrackItem {
        TrackItem::new(format!("https://example.com/{title}"), title, None, UserId::new(2))
    }

    fn titles(state: &GuildPlayerState) -> Vec<&str> {
        state.queue().iter().map(|t| t.title()).collect()
    }

    #[test]
    fn now_playing_tracks_status() {
        let mut state = state();
        assert_eq!(state.status(), PlayerStatus::Idle);
        assert!(state.now_playing().is_none());

        state.push(track("a")).unwrap();
        let started = state.start_next().unwrap();
        assert_eq!(state.status(), PlayerStatus::Playing);
        assert_eq!(state.now_playing(), Some(&started));
        assert!(state.queue().is_empty());

        state.pause().unwrap();
        assert_eq!(state.status(), PlayerStatus::Paused);
        assert_eq!(state.now_playing(), Some(&started));

        state.end_current(EndReason::Stopped);
        assert_eq!(state.status(), PlayerStatus::Idle);
        assert!(state.now_playing().is_none());
    }

    #[test]
    fn start_next_refuses_while_a_track_is_in_flight() {
        let mut state = state();
        state.push(track("a")).unwrap();
        state.push(track("b")).unwrap();

        assert_eq!(state.start_next().unwrap().title(), "a");
        assert!(state.start_next().is_none());
        assert_eq!(titles(&state), vec!["b"]);
    }

    #[test]
    fn push_reports_position_and_rejects_when_full() {
        let mut state = state();
        assert_eq!(state.push(track("a")).unwrap(), 1);
        assert_eq!(state.push(track("b")).unwrap(), 2);
        assert_eq!(state.push(track("c")).unwrap(), 3);
        assert_eq!(state.push(track("d")), Err(AudioError::QueueFull { max: 3 }));
    }

    #[test]
    fn invalid_pause_and_resume_leave_state_untouched() {
        let mut state = state();
        assert_eq!(
            state.pause().unwrap_err(),
            AudioError::InvalidState {
                operation: "pausar",
                status: PlayerStatus::Idle
            }
        );

        state.push(track("a")).unwrap();
        state.start_next();
        assert!(matches!(
            state.resume(),
            Err(AudioError::InvalidState {
                status: PlayerStatus::Playing,
                ..
            })
        ));
        assert_eq!(state.status(), PlayerStatus::Playing);
    }

    #[test]
    fn repeat_single_requeues_at_head_only_when_finished() {
        let mut state = state();
        state.set_repeat_mode(RepeatMode::Single);
        state.push(track("a")).unwrap();
        state.push(track("b")).unwrap();
        let a = state.start_next().unwrap();

        state.end_current(EndReason::Finished);
        assert_eq!(state.queue().front(), Some(&a));
        assert_eq!(titles(&state), vec!["a", "b"]);

        state.start_next();
        state.end_current(EndReason::Stopped);
        assert_eq!(titles(&state), vec!["b"]);
    }

    #[test]
    fn repeat_queue_appends_finished_track() {
        let mut state = state();
        state.set_repeat_mode(RepeatMode::Queue);
        state.push(track("a")).unwrap();
        state.push(track("b")).unwrap();
        state.start_next();

        state.end_current(EndReason::Finished);
        assert_eq!(titles(&state), vec!["b", "a"]);
    }

    #[test]
    fn dropped_track_is_never_repeated() {
        let mut state = state();
        state.set_repeat_mode(RepeatMode::Single);
        state.push(track("a")).unwrap();
        state.start_next();

        assert_eq!(state.drop_current().unwrap().title(), "a");
        assert!(state.queue().is_empty());
    }

    #[test]
    fn volume_is_clamped() {
        let mut state = state();
        assert_eq!(state.set_volume(200), 150);
        assert_eq!(state.set_volume(40), 40);
        assert_eq!(GuildPlayerState::new(GuildId::new(1), 500, 150, 3).volume(), 150);
    }

    #[test]
    fn clear_queue_keeps_current_track() {
        let mut state = state();
        state.push(track("a")).unwrap();
        state.push(track("b")).unwrap();
        state.push(track("c")).unwrap();
        state.start_next();

        assert_eq!(state.clear_queue(), 2);
        assert_eq!(state.now_playing().unwrap().title(), "a");
    }

    #[test]
    fn adopt_removes_track_from_queue() {
        let mut state = state();
        let b = track("b");
        state.push(track("a")).unwrap();
        state.push(b.clone()).unwrap();

        assert!(state.adopt(b.clone()));
        assert_eq!(state.now_playing(), Some(&b));
        assert_eq!(titles(&state), vec!["a"]);
        assert!(!state.adopt(track("c")));
    }

    #[test]
    fn shuffle_keeps_every_item() {
        let mut state = state();
        state.push(track("a")).unwrap();
        state.push(track("b")).unwrap();
        state.push(track("c")).unwrap();

        assert_eq!(state.shuffle_queue(), 3);
        let mut shuffled = titles(&state);
        shuffled.sort();
        assert_eq!(shuffled, vec!["a", "b", "c"]);
    }
}
