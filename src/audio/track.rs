use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identidad de una petición de reproducción. Dos tracks con la misma URL
/// siguen siendo peticiones distintas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct TrackInner {
    id: TrackId,
    source: String,
    title: String,
    duration: Option<Duration>,
    requested_by: UserId,
    added_at: DateTime<Utc>,
}

/// Un elemento de la cola: inmutable una vez construido.
///
/// Clonar un `TrackItem` comparte la misma petición (mismo [`TrackId`]), y la
/// igualdad compara identidad, no contenido.
#[derive(Debug, Clone)]
pub struct TrackItem {
    inner: Arc<TrackInner>,
}

impl TrackItem {
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        duration: Option<Duration>,
        requested_by: UserId,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: TrackId::next(),
                source: source.into(),
                title: title.into(),
                duration,
                requested_by,
                added_at: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    /// URL o referencia opaca que entiende el backend de audio.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    pub fn duration(&self) -> Option<Duration> {
        self.inner.duration
    }

    pub fn requested_by(&self) -> UserId {
        self.inner.requested_by
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.inner.added_at
    }
}

impl PartialEq for TrackItem {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for TrackItem {}

impl fmt::Display for TrackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.duration {
            Some(duration) => write!(
                f,
                "{} [{}]",
                self.inner.title,
                humantime::format_duration(Duration::from_secs(duration.as_secs()))
            ),
            None => f.write_str(&self.inner.title),
        }
    }
}
