//! # Audio Module
//!
//! Per-guild playback engine for Orion Music.
//!
//! Every guild gets its own [`manager::GuildAudioManager`]: an independent
//! queue and player state machine driven by a single task. Commands from chat
//! and lifecycle callbacks from the audio backend both land in that task's
//! inbox, so they are applied one at a time and never corrupt queue order.
//!
//! ## Architecture
//!
//! ### [`track`] - Queue items
//! - Immutable [`track::TrackItem`] values, compared by identity
//!
//! ### [`state`] - Player state
//! - FIFO queue, current track, status, volume and repeat mode
//! - A current track exists exactly while playing or paused
//!
//! ### [`manager`] - Per-guild player
//! - `enqueue`, `skip`, `pause`, `resume`, `set_volume`, `clear_queue`, `shutdown`
//! - At most one track in flight to the backend per guild
//! - Epoch checks discard stale callbacks
//! - Optional idle timeout that releases the voice connection
//!
//! ### [`registry`] - Guild lookup
//! - Lazily creates exactly one manager per guild
//!
//! ### [`listener`] - Backend callbacks
//! - Routes start/end/failure events to the owning manager
//!
//! ### [`collaborators`] - External interfaces
//! - Audio backend, voice gateway, track resolver and failure notifier
//!
//! ## State
//!
//! Queues live in memory only. A restart loses every queue; this is intended.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use orion_music::audio::{registry::AudioRegistry, manager::AudioServices, track::TrackItem};
//! use serenity::all::{ChannelId, GuildId, UserId};
//!
//! # async fn example(services: AudioServices) -> anyhow::Result<()> {
//! let registry = AudioRegistry::new(services);
//! let player = registry.get_or_create(GuildId::new(123456789));
//!
//! let track = TrackItem::new("https://example.com/song.mp3", "Song", None, UserId::new(1));
//! player.enqueue(track, ChannelId::new(42)).await?;
//!
//! player.pause().await?;
//! player.resume().await?;
//! player.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod listener;
pub mod manager;
pub mod registry;
pub mod state;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;
