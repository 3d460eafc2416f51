//! Production collaborators for the audio engine, built on Songbird and
//! Serenity.
//!
//! - [`driver`]: [`driver::SongbirdBackend`] (playback + track events) and
//!   [`driver::SongbirdVoice`] (voice connections)
//! - [`resolver`]: search/URL resolution through yt-dlp
//! - [`notifier`]: failure notices posted to the guild's text channel

pub mod driver;
pub mod notifier;
pub mod resolver;

pub use driver::{SongbirdBackend, SongbirdVoice};
pub use notifier::ChatNotifier;
pub use resolver::YtDlpResolver;
