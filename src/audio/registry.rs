use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

use crate::audio::{
    listener::TrackEventListener,
    manager::{AudioServices, GuildAudioManager, PlayerSettings},
    state::RepeatMode,
};

pub(crate) type ManagerMap = DashMap<GuildId, Arc<GuildAudioManager>>;

/// Ajustes de un guild que sobreviven a sus reproductores. Un manager nuevo
/// arranca con ellos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuildPreferences {
    pub volume: Option<u16>,
    pub repeat_mode: RepeatMode,
}

/// Mapa de guild a reproductor, compartido por todo el proceso.
///
/// La creación pasa por la entrada de `DashMap`, así que dos comandos que
/// llegan a la vez para un guild nuevo obtienen el mismo manager. Ninguna
/// operación retiene el lock más allá de la búsqueda.
#[derive(Clone)]
pub struct AudioRegistry {
    managers: Arc<ManagerMap>,
    services: AudioServices,
    preferences: Arc<DashMap<GuildId, GuildPreferences>>,
    next_epoch: Arc<AtomicU64>,
}

impl AudioRegistry {
    pub fn new(services: AudioServices) -> Self {
        Self {
            managers: Arc::new(DashMap::new()),
            services,
            preferences: Arc::new(DashMap::new()),
            next_epoch: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildAudioManager> {
        match self.managers.entry(guild_id) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                debug!("Reemplazando reproductor cerrado de guild {}", guild_id);
                let manager = self.spawn(guild_id);
                entry.insert(manager.clone());
                manager
            }
            Entry::Vacant(entry) => {
                let manager = self.spawn(guild_id);
                entry.insert(manager.clone());
                manager
            }
        }
    }

    /// Busca sin crear. Los managers ya cerrados cuentan como ausentes.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildAudioManager>> {
        self.managers
            .get(&guild_id)
            .map(|manager| manager.value().clone())
            .filter(|manager| !manager.is_closed())
    }

    /// Saca al manager del registro y le pide terminar. No hace nada si el
    /// guild no tiene manager.
    pub fn remove(&self, guild_id: GuildId) -> bool {
        match self.managers.remove(&guild_id) {
            Some((_, manager)) => {
                manager.cancel();
                info!("🗑️ Reproductor de guild {} eliminado del registro", guild_id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.managers.iter().map(|entry| *entry.key()).collect()
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.services.settings
    }

    pub fn preferences(&self, guild_id: GuildId) -> GuildPreferences {
        self.preferences
            .get(&guild_id)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    /// Guarda el volumen del guild recortado al máximo y devuelve el aplicado.
    /// No crea reproductor.
    pub fn remember_volume(&self, guild_id: GuildId, volume: u16) -> u16 {
        let applied = volume.min(self.services.settings.max_volume);
        self.preferences.entry(guild_id).or_default().volume = Some(applied);
        applied
    }

    pub fn remember_repeat_mode(&self, guild_id: GuildId, mode: RepeatMode) {
        self.preferences.entry(guild_id).or_default().repeat_mode = mode;
    }

    pub fn listener(&self) -> TrackEventListener {
        TrackEventListener::new(self.clone())
    }

    /// Cierra todos los reproductores (apagado del proceso).
    pub async fn shutdown_all(&self) {
        let managers: Vec<_> = self.managers.iter().map(|entry| entry.value().clone()).collect();
        info!("⚠️ Cerrando {} reproductores activos", managers.len());

        for (manager, result) in managers
            .iter()
            .zip(join_all(managers.iter().map(|manager| manager.shutdown())).await)
        {
            if let Err(e) = result {
                warn!("No se pudo cerrar el reproductor de {}: {}", manager.guild_id(), e);
            }
        }
    }

    fn spawn(&self, guild_id: GuildId) -> Arc<GuildAudioManager> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        Arc::new(GuildAudioManager::spawn(
            guild_id,
            epoch,
            self.services.clone(),
            self.preferences(guild_id),
            Arc::downgrade(&self.managers),
        ))
    }
}
