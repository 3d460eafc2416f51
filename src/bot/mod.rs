//! # Bot Module
//!
//! Discord gateway glue for Orion Music.
//!
//! [`OrionBot`] implements Serenity's [`EventHandler`]. Prefixed chat messages
//! are parsed into [`commands::MusicCommand`]s and handed to the audio engine
//! through the [`AudioRegistry`] stored in the client's data map.
//!
//! ## Example
//!
//! ```rust,no_run
//! use orion_music::{bot::OrionBot, config::Config};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let handler = OrionBot::new(config);
//! # Ok(())
//! # }
//! ```

use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;

use crate::{config::Config, voice::notifier::ChatNotifier};
use commands::{Invocation, MusicContext};

impl TypeMapKey for MusicContext {
    type Value = Arc<MusicContext>;
}

/// Clave del notificador de fallos en el mapa de datos del cliente.
pub struct NotifierKey;

impl TypeMapKey for NotifierKey {
    type Value = Arc<ChatNotifier>;
}

/// Handler de eventos del gateway.
pub struct OrionBot {
    config: Arc<Config>,
}

impl OrionBot {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl EventHandler for OrionBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
        info!("⌨️ Prefijo de comandos: {}", self.config.command_prefix);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(parsed) = commands::parse(&self.config.command_prefix, &msg.content) else {
            return;
        };

        let reply = match parsed {
            Ok(command) => {
                let (music, notifier) = {
                    let data = ctx.data.read().await;
                    (data.get::<MusicContext>().cloned(), data.get::<NotifierKey>().cloned())
                };
                let Some(music) = music else {
                    error!("El registro de audio no está inicializado");
                    return;
                };
                if let Some(notifier) = notifier {
                    notifier.remember(guild_id, msg.channel_id);
                }

                let invocation = Invocation {
                    guild_id,
                    author: msg.author.id,
                    voice_channel: author_voice_channel(&ctx, guild_id, msg.author.id),
                };
                commands::run(&music, &invocation, command).await
            }
            Err(usage) => format!("❌ {}", usage),
        };

        if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
            error!("Error enviando respuesta en guild {}: {:?}", guild_id, e);
        }
    }

    /// Si alguien desconecta al bot a mano, el reproductor del guild se cierra.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let music = ctx.data.read().await.get::<MusicContext>().cloned();
        let Some(player) = music.and_then(|music| music.registry.get(guild_id)) else {
            debug!("Desconexión en guild {} sin reproductor activo", guild_id);
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);
        if let Err(e) = player.shutdown().await {
            warn!("Error al cerrar el reproductor de guild {}: {}", guild_id, e);
        }
    }
}

fn author_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Atajo para `main`: guarda el contexto de música y el notificador en el
/// mapa de datos del cliente.
pub async fn install(client: &serenity::Client, music: MusicContext, notifier: Arc<ChatNotifier>) {
    let mut data = client.data.write().await;
    data.insert::<MusicContext>(Arc::new(music));
    data.insert::<NotifierKey>(notifier);
}
