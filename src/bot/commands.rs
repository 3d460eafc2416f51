use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{
        collaborators::TrackResolver,
        manager::{EnqueueOutcome, GuildAudioManager},
        registry::AudioRegistry,
        state::RepeatMode,
        track::TrackItem,
    },
    error::AudioError,
};

const QUEUE_PAGE: usize = 10;

/// Comandos de música reconocidos en el chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicCommand {
    Play(String),
    Skip,
    Pause,
    Resume,
    Volume(Option<u16>),
    ClearQueue,
    Song,
    Queue,
    Shuffle,
    Repeat(RepeatMode),
    MoveHere,
    Leave,
    Stats,
    Help,
}

/// Interpreta un mensaje con prefijo.
///
/// `None` si el mensaje no es un comando de música; `Some(Err(uso))` si lo es
/// pero los argumentos no son válidos.
pub fn parse(prefix: &str, content: &str) -> Option<Result<MusicCommand, String>> {
    let body = content.trim().strip_prefix(prefix)?;
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "play" | "p" => {
            if args.is_empty() {
                return Some(Err(format!("Uso: `{prefix}play <búsqueda o URL>`")));
            }
            MusicCommand::Play(args.to_string())
        }
        "skip" | "s" => MusicCommand::Skip,
        "pause" => MusicCommand::Pause,
        "resume" => MusicCommand::Resume,
        "volume" | "vol" => {
            if args.is_empty() {
                MusicCommand::Volume(None)
            } else {
                match args.parse::<u16>() {
                    Ok(volume) => MusicCommand::Volume(Some(volume)),
                    Err(_) => return Some(Err(format!("Uso: `{prefix}volume <0-150>`"))),
                }
            }
        }
        "clearqueue" | "clear" => MusicCommand::ClearQueue,
        "song" | "np" | "nowplaying" => MusicCommand::Song,
        "queue" | "q" => MusicCommand::Queue,
        "shuffle" => MusicCommand::Shuffle,
        "repeat" | "loop" => match args.to_lowercase().as_str() {
            "off" | "no" => MusicCommand::Repeat(RepeatMode::Off),
            "single" | "one" | "song" => MusicCommand::Repeat(RepeatMode::Single),
            "queue" | "all" => MusicCommand::Repeat(RepeatMode::Queue),
            _ => return Some(Err(format!("Uso: `{prefix}repeat <off|single|queue>`"))),
        },
        "movehere" => MusicCommand::MoveHere,
        "leave" | "disconnect" => MusicCommand::Leave,
        "stats" => MusicCommand::Stats,
        "help" => MusicCommand::Help,
        _ => return None,
    };

    Some(Ok(command))
}

/// Lo que el adaptador necesita para atender un comando.
pub struct MusicContext {
    pub registry: AudioRegistry,
    pub resolver: Arc<dyn TrackResolver>,
}

/// Quién invoca el comando y desde dónde.
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    pub guild_id: GuildId,
    pub author: UserId,
    /// Canal de voz del autor, si está en uno.
    pub voice_channel: Option<ChannelId>,
}

/// Ejecuta un comando y devuelve la respuesta para el chat.
pub async fn run(music: &MusicContext, invocation: &Invocation, command: MusicCommand) -> String {
    info!("📝 Comando {:?} en guild {}", command, invocation.guild_id);

    let result = match command {
        MusicCommand::Play(query) => play(music, invocation, &query).await,
        MusicCommand::Skip => skip(music, invocation).await,
        MusicCommand::Pause => with_player(music, invocation, |player| async move {
            player.pause().await.map(|_| "⏸️ Pausado".to_string())
        })
        .await,
        MusicCommand::Resume => with_player(music, invocation, |player| async move {
            player.resume().await.map(|_| "▶️ Reanudado".to_string())
        })
        .await,
        MusicCommand::Volume(volume) => set_volume(music, invocation, volume).await,
        MusicCommand::ClearQueue => clear_queue(music, invocation).await,
        MusicCommand::Song => now_playing(music, invocation).await,
        MusicCommand::Queue => queue(music, invocation).await,
        MusicCommand::Shuffle => with_player(music, invocation, |player| async move {
            player
                .shuffle_queue()
                .await
                .map(|count| format!("🔀 Se mezclaron {} canciones", count))
        })
        .await,
        MusicCommand::Repeat(mode) => set_repeat_mode(music, invocation, mode).await,
        MusicCommand::MoveHere => move_here(music, invocation).await,
        MusicCommand::Leave => leave(music, invocation).await,
        MusicCommand::Stats => Ok(format!("📊 Sesiones de música activas: {}", music.registry.len())),
        MusicCommand::Help => Ok(help()),
    };

    result.unwrap_or_else(|e| format!("❌ {}", e))
}

async fn play(music: &MusicContext, invocation: &Invocation, query: &str) -> Result<String, AudioError> {
    let Some(channel_id) = invocation.voice_channel else {
        return Ok("❌ Debes estar en un canal de voz para usar este comando".to_string());
    };

    let track = match music.resolver.resolve(query, invocation.author).await {
        Ok(track) => track,
        Err(failure) => {
            warn!("❌ No se pudo resolver '{}': {}", query, failure);
            return Ok(format!("❌ No se pudo cargar **{}**: {}", query, failure));
        }
    };

    let player = music.registry.get_or_create(invocation.guild_id);
    let outcome = match player.enqueue(track.clone(), channel_id).await {
        // El manager se cerró por inactividad entre la búsqueda y el envío.
        Err(AudioError::ManagerClosed) => {
            music
                .registry
                .get_or_create(invocation.guild_id)
                .enqueue(track.clone(), channel_id)
                .await?
        }
        other => other?,
    };

    Ok(match outcome {
        EnqueueOutcome::Started => format!("▶️ Reproduciendo: **{}**", track),
        EnqueueOutcome::Queued { position } => {
            format!("📝 Agregado a la cola (posición {}): **{}**", position, track)
        }
    })
}

async fn skip(music: &MusicContext, invocation: &Invocation) -> Result<String, AudioError> {
    let player = music
        .registry
        .get(invocation.guild_id)
        .ok_or(AudioError::NothingPlaying)?;

    let skipped = player.skip().await?;
    Ok(format!("⏭️ Saltada: **{}**", skipped))
}

async fn with_player<F, Fut>(music: &MusicContext, invocation: &Invocation, op: F) -> Result<String, AudioError>
where
    F: FnOnce(Arc<GuildAudioManager>) -> Fut,
    Fut: std::future::Future<Output = Result<String, AudioError>>,
{
    match music.registry.get(invocation.guild_id) {
        Some(player) => op(player).await,
        None => Err(AudioError::NothingPlaying),
    }
}

async fn set_volume(
    music: &MusicContext,
    invocation: &Invocation,
    volume: Option<u16>,
) -> Result<String, AudioError> {
    let max = music.registry.settings().max_volume;
    let player = music.registry.get(invocation.guild_id);

    let Some(requested) = volume else {
        let current = match player {
            Some(player) => player.snapshot().await?.volume,
            None => music
                .registry
                .preferences(invocation.guild_id)
                .volume
                .unwrap_or(music.registry.settings().default_volume),
        };
        return Ok(format!("🔊 Volumen actual: {}%", current));
    };

    // Sin sesión sólo se guarda; el próximo reproductor arranca con él.
    let mut applied = music.registry.remember_volume(invocation.guild_id, requested);
    if let Some(player) = player {
        applied = player.set_volume(requested).await?;
    }

    Ok(if applied < requested {
        format!("🔊 Volumen ajustado a {}% (máximo {}%)", applied, max)
    } else {
        format!("🔊 Volumen ajustado a {}%", applied)
    })
}

async fn set_repeat_mode(music: &MusicContext, invocation: &Invocation, mode: RepeatMode) -> Result<String, AudioError> {
    music.registry.remember_repeat_mode(invocation.guild_id, mode);
    if let Some(player) = music.registry.get(invocation.guild_id) {
        player.set_repeat_mode(mode).await?;
    }
    Ok(format!("🔁 Repetición: {}", repeat_label(mode)))
}

async fn clear_queue(music: &MusicContext, invocation: &Invocation) -> Result<String, AudioError> {
    let removed = match music.registry.get(invocation.guild_id) {
        Some(player) => player.clear_queue().await?,
        None => 0,
    };
    Ok(format!("🗑️ Se eliminaron {} canciones de la cola", removed))
}

async fn now_playing(music: &MusicContext, invocation: &Invocation) -> Result<String, AudioError> {
    let Some(player) = music.registry.get(invocation.guild_id) else {
        return Ok("🔇 No hay nada reproduciéndose".to_string());
    };

    let snapshot = player.snapshot().await?;
    let Some(track) = snapshot.now_playing else {
        return Ok("🔇 No hay nada reproduciéndose".to_string());
    };

    Ok(format!(
        "🎵 **{}** ({})\n👤 Pedida por <@{}> · 🔊 {}% · 🔁 {} · 📝 {} en cola",
        track,
        snapshot.status,
        track.requested_by(),
        snapshot.volume,
        repeat_label(snapshot.repeat_mode),
        snapshot.queue.len()
    ))
}

async fn queue(music: &MusicContext, invocation: &Invocation) -> Result<String, AudioError> {
    let Some(player) = music.registry.get(invocation.guild_id) else {
        return Ok("📭 La cola está vacía".to_string());
    };

    let snapshot = player.snapshot().await?;
    if snapshot.now_playing.is_none() && snapshot.queue.is_empty() {
        return Ok("📭 La cola está vacía".to_string());
    }

    let mut lines = Vec::new();
    if let Some(track) = &snapshot.now_playing {
        lines.push(format!("🎵 Ahora: **{}**", track));
    }
    lines.extend(
        snapshot
            .queue
            .iter()
            .take(QUEUE_PAGE)
            .enumerate()
            .map(|(i, track)| format_queue_line(i + 1, track)),
    );
    if snapshot.queue.len() > QUEUE_PAGE {
        lines.push(format!("… y {} más", snapshot.queue.len() - QUEUE_PAGE));
    }
    lines.push(format!(
        "⏱️ Duración total: {} · 🔁 {}",
        humantime::format_duration(snapshot.total_duration()),
        repeat_label(snapshot.repeat_mode)
    ));

    Ok(lines.join("\n"))
}

fn format_queue_line(position: usize, track: &TrackItem) -> String {
    format!("`{}.` {}", position, track)
}

async fn move_here(music: &MusicContext, invocation: &Invocation) -> Result<String, AudioError> {
    let Some(channel_id) = invocation.voice_channel else {
        return Ok("❌ Debes estar en un canal de voz para usar este comando".to_string());
    };
    let Some(player) = music.registry.get(invocation.guild_id) else {
        return Ok("❌ No estoy conectado a ningún canal de voz".to_string());
    };

    player.move_to(channel_id).await?;
    Ok(format!("📍 Me moví a <#{}>", channel_id))
}

async fn leave(music: &MusicContext, invocation: &Invocation) -> Result<String, AudioError> {
    let Some(player) = music.registry.get(invocation.guild_id) else {
        return Ok("❌ No estoy conectado a ningún canal de voz".to_string());
    };

    player.shutdown().await?;
    Ok("👋 Desconectado del canal de voz".to_string())
}

fn repeat_label(mode: RepeatMode) -> &'static str {
    match mode {
        RepeatMode::Off => "desactivada",
        RepeatMode::Single => "canción",
        RepeatMode::Queue => "cola",
    }
}

fn help() -> String {
    [
        "🎵 **Comandos de música**",
        "`play <búsqueda o URL>` - Reproduce o agrega a la cola",
        "`skip` - Salta la canción actual",
        "`pause` / `resume` - Pausa o reanuda",
        "`volume [0-150]` - Muestra o ajusta el volumen",
        "`song` - Canción actual",
        "`queue` - Muestra la cola",
        "`clearqueue` - Vacía la cola",
        "`shuffle` - Mezcla la cola",
        "`repeat <off|single|queue>` - Modo de repetición",
        "`movehere` - Me muevo a tu canal de voz",
        "`leave` - Me desconecto",
        "`stats` - Sesiones activas",
    ]
    .join("\n")
}
