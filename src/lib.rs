//! Orion Music: a Discord music bot with an independent playback engine per
//! guild.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod voice;
