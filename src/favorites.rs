//! Durable favorites list.
//!
//! The whole collection lives under [`FAVORITES_KEY`] as a JSON array and is
//! rewritten in full on every mutation. [`FavoritesSnapshot`] is one
//! consumer's private copy; two snapshots over the same store do not see each
//! other's changes until they reload. [`FavoritesService`] shares a single
//! snapshot, serializes mutations and publishes every new state.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::models::{MovieDraft, MovieSummary};
use crate::storage::{KeyValueStore, StorageError};

pub const FAVORITES_KEY: &str = "favoriteMovies";

#[derive(Error, Debug)]
pub enum FavoritesError {
    #[error("failed to read favorites: {0}")]
    StorageRead(#[source] StorageError),

    #[error("failed to write favorites: {0}")]
    StorageWrite(#[source] StorageError),

    #[error("invalid movie data: {0}")]
    InvalidMovie(String),
}

/// Reads the persisted collection. A missing or blank value is an empty list;
/// entries that are not valid movies are skipped.
pub async fn load_favorites(store: &dyn KeyValueStore) -> Result<Vec<MovieSummary>, FavoritesError> {
    let raw = store
        .get(FAVORITES_KEY)
        .await
        .map_err(FavoritesError::StorageRead)?;
    match raw {
        Some(raw) if !raw.trim().is_empty() => parse_favorites(&raw),
        _ => {
            debug!("No favorites stored yet");
            Ok(Vec::new())
        }
    }
}

pub fn parse_favorites(raw: &str) -> Result<Vec<MovieSummary>, FavoritesError> {
    let entries: Vec<Value> = serde_json::from_str(raw)
        .map_err(|e| FavoritesError::StorageRead(StorageError::Serialization(e)))?;
    let total = entries.len();
    let movies: Vec<MovieSummary> = entries
        .into_iter()
        .filter_map(|entry| {
            let checked = serde_json::from_value::<MovieDraft>(entry.clone())
                .map_err(|e| FavoritesError::InvalidMovie(e.to_string()))
                .and_then(MovieDraft::into_summary);
            match checked {
                Ok(movie) => Some(movie),
                Err(e) => {
                    warn!("Dropping invalid favorite {}: {}", entry, e);
                    None
                }
            }
        })
        .collect();
    debug!("Loaded {} of {} stored favorites", movies.len(), total);
    Ok(movies)
}

async fn save_favorites(
    store: &dyn KeyValueStore,
    movies: &[MovieSummary],
) -> Result<(), FavoritesError> {
    let payload = serde_json::to_string(movies)
        .map_err(|e| FavoritesError::StorageWrite(StorageError::Serialization(e)))?;
    store.set(FAVORITES_KEY, &payload).await.map_err(|e| {
        error!("Failed to persist {} favorites: {}", movies.len(), e);
        FavoritesError::StorageWrite(e)
    })
}

/// One consumer's in-memory copy of the favorites.
///
/// Every mutation writes the complete resulting list and only then replaces
/// the snapshot, so a failed write leaves the snapshot as it was.
pub struct FavoritesSnapshot {
    store: Arc<dyn KeyValueStore>,
    movies: Vec<MovieSummary>,
}

impl FavoritesSnapshot {
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, FavoritesError> {
        let movies = load_favorites(store.as_ref()).await?;
        Ok(Self { store, movies })
    }

    pub async fn reload(&mut self) -> Result<&[MovieSummary], FavoritesError> {
        self.movies = load_favorites(self.store.as_ref()).await?;
        Ok(&self.movies)
    }

    pub fn movies(&self) -> &[MovieSummary] {
        &self.movies
    }

    pub fn contains(&self, movie_id: i64) -> bool {
        self.movies.iter().any(|m| m.id == movie_id)
    }

    /// Appends `movie` to this snapshot. Does not check for an existing entry
    /// with the same id; use [`toggle`](Self::toggle) for that.
    pub async fn add(&mut self, movie: MovieSummary) -> Result<&[MovieSummary], FavoritesError> {
        movie.validate()?;
        let mut updated = self.movies.clone();
        updated.push(movie);
        self.commit(updated).await
    }

    /// Removing an id that is not present still rewrites the list.
    pub async fn remove(&mut self, movie_id: i64) -> Result<&[MovieSummary], FavoritesError> {
        let updated = self
            .movies
            .iter()
            .filter(|m| m.id != movie_id)
            .cloned()
            .collect();
        self.commit(updated).await
    }

    /// Returns whether the movie is a favorite afterwards.
    pub async fn toggle(&mut self, movie: MovieSummary) -> Result<bool, FavoritesError> {
        movie.validate()?;
        if self.contains(movie.id) {
            self.remove(movie.id).await?;
            Ok(false)
        } else {
            self.add(movie).await?;
            Ok(true)
        }
    }

    async fn commit(&mut self, updated: Vec<MovieSummary>) -> Result<&[MovieSummary], FavoritesError> {
        save_favorites(self.store.as_ref(), &updated).await?;
        self.movies = updated;
        Ok(&self.movies)
    }
}

/// Process-wide favorites shared by every consumer.
///
/// Mutations run one at a time against a single snapshot and each committed
/// state is broadcast to subscribers. The service can start without a
/// readable list; every operation that needs it reads storage again until a
/// load succeeds.
#[derive(Clone)]
pub struct FavoritesService {
    state: Arc<Mutex<ServiceState>>,
    published: Arc<watch::Sender<Arc<Vec<MovieSummary>>>>,
}

struct ServiceState {
    snapshot: FavoritesSnapshot,
    loaded: bool,
}

impl FavoritesService {
    /// Never fails: a read error is logged and retried on first use.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        let service = Self {
            state: Arc::new(Mutex::new(ServiceState {
                snapshot: FavoritesSnapshot {
                    store,
                    movies: Vec::new(),
                },
                loaded: false,
            })),
            published: Arc::new(tx),
        };
        match service.list().await {
            Ok(movies) => info!("Loaded {} favorites", movies.len()),
            Err(e) => error!("Favorites unavailable at startup: {}", e),
        }
        service
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<MovieSummary>>> {
        self.published.subscribe()
    }

    /// Last published list; empty until a load has succeeded.
    pub fn current(&self) -> Arc<Vec<MovieSummary>> {
        self.published.borrow().clone()
    }

    pub fn contains(&self, movie_id: i64) -> bool {
        self.published.borrow().iter().any(|m| m.id == movie_id)
    }

    /// The committed list, reading storage first if it is not loaded.
    pub async fn list(&self) -> Result<Arc<Vec<MovieSummary>>, FavoritesError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(self.current())
    }

    pub async fn reload(&self) -> Result<Arc<Vec<MovieSummary>>, FavoritesError> {
        let mut state = self.state.lock().await;
        state.snapshot.reload().await?;
        state.loaded = true;
        Ok(self.publish(&state.snapshot))
    }

    pub async fn add(&self, movie: MovieSummary) -> Result<Arc<Vec<MovieSummary>>, FavoritesError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let id = movie.id;
        let result = state.snapshot.add(movie).await.map(|_| ());
        settle(&mut state, result)?;
        info!("Added movie {} to favorites", id);
        Ok(self.publish(&state.snapshot))
    }

    pub async fn remove(&self, movie_id: i64) -> Result<Arc<Vec<MovieSummary>>, FavoritesError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let result = state.snapshot.remove(movie_id).await.map(|_| ());
        settle(&mut state, result)?;
        info!("Removed movie {} from favorites", movie_id);
        Ok(self.publish(&state.snapshot))
    }

    pub async fn toggle(&self, movie: MovieSummary) -> Result<bool, FavoritesError> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let id = movie.id;
        let result = state.snapshot.toggle(movie).await;
        let now_favorite = settle(&mut state, result)?;
        info!("Toggled movie {} (favorite: {})", id, now_favorite);
        self.publish(&state.snapshot);
        Ok(now_favorite)
    }

    async fn ensure_loaded(&self, state: &mut ServiceState) -> Result<(), FavoritesError> {
        if !state.loaded {
            state.snapshot.reload().await?;
            state.loaded = true;
            self.publish(&state.snapshot);
        }
        Ok(())
    }

    fn publish(&self, snapshot: &FavoritesSnapshot) -> Arc<Vec<MovieSummary>> {
        let movies = Arc::new(snapshot.movies().to_vec());
        self.published.send_replace(movies.clone());
        movies
    }
}

/// A timed-out write may still land, so the stored list is unknown until it
/// is read again.
fn settle<T>(state: &mut ServiceState, result: Result<T, FavoritesError>) -> Result<T, FavoritesError> {
    if let Err(FavoritesError::StorageWrite(StorageError::TimedOut(limit))) = &result {
        warn!("Favorites write timed out after {:?}, reloading before next use", limit);
        state.loaded = false;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            self.inner.set(key, value).await
        }
    }

    /// Writes land in the inner store but are reported as timed out.
    #[derive(Default)]
    struct LateWrites {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for LateWrites {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set(key, value).await?;
            Err(StorageError::TimedOut(std::time::Duration::from_millis(50)))
        }
    }

    fn movie(id: i64, title: &str) -> MovieSummary {
        MovieSummary::new(id, title)
    }

    async fn stored(store: &dyn KeyValueStore) -> Option<String> {
        store.get(FAVORITES_KEY).await.unwrap()
    }

    #[tokio::test]
    async fn load_without_entry_is_empty() {
        let store = MemoryStore::new();
        assert!(load_favorites(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_blank_value_is_empty() {
        let store = MemoryStore::with_value(FAVORITES_KEY, "  ");
        assert!(load_favorites(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_drops_malformed_entries_in_order() {
        let payload = json!([
            {"id": 1, "title": "A", "poster_path": "/a.jpg"},
            {"title": "no id"},
            {"id": 2},
            {"id": 3, "title": ""},
            "not an object",
            {"id": "4", "title": "string id"},
            {"id": 5, "title": "E", "release_date": "1999-03-31", "vote_average": 8.2},
            {"id": 6, "title": "F", "vote_average": "8.1"},
            {"id": 7, "title": "G", "release_date": 20240101, "poster_path": false},
        ])
        .to_string();
        let store = MemoryStore::with_value(FAVORITES_KEY, &payload);
        let movies = load_favorites(&store).await.unwrap();
        let ids: Vec<i64> = movies.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 5, 6, 7]);
        assert_eq!(movies[0].poster_path, "/a.jpg");
        assert_eq!(movies[1].vote_average, Some(8.2));
        assert_eq!(movies[2].vote_average, None);
        assert_eq!(movies[3].release_date, "");
    }

    #[tokio::test]
    async fn load_rejects_unparseable_payloads() {
        for payload in ["{not json", "null", "{\"id\": 1}"] {
            let store = MemoryStore::with_value(FAVORITES_KEY, payload);
            let err = load_favorites(&store).await.unwrap_err();
            assert!(
                matches!(err, FavoritesError::StorageRead(_)),
                "payload {payload:?} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn add_persists_and_reloads_equal() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut snapshot = FavoritesSnapshot::load(store.clone()).await.unwrap();
        let added = snapshot.add(movie(1, "A")).await.unwrap().to_vec();
        assert_eq!(added, vec![movie(1, "A")]);

        let reloaded = load_favorites(store.as_ref()).await.unwrap();
        assert_eq!(reloaded, added);
    }

    #[tokio::test]
    async fn add_rejects_invalid_movie_without_writing() {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(MemoryStore::with_value(FAVORITES_KEY, "[{\"id\":9,\"title\":\"Z\"}]"));
        let before = stored(store.as_ref()).await;
        let mut snapshot = FavoritesSnapshot::load(store.clone()).await.unwrap();

        let err = snapshot.add(movie(2, "")).await.unwrap_err();
        assert!(matches!(err, FavoritesError::InvalidMovie(_)));
        assert_eq!(stored(store.as_ref()).await, before);
        assert_eq!(snapshot.movies().len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_id_is_a_noop() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut snapshot = FavoritesSnapshot::load(store.clone()).await.unwrap();
        snapshot.add(movie(1, "A")).await.unwrap();

        let after = snapshot.remove(42).await.unwrap().to_vec();
        assert_eq!(after, vec![movie(1, "A")]);
    }

    #[tokio::test]
    async fn remove_twice_equals_remove_once() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut snapshot = FavoritesSnapshot::load(store.clone()).await.unwrap();
        snapshot.add(movie(1, "A")).await.unwrap();
        snapshot.add(movie(2, "B")).await.unwrap();

        let once = snapshot.remove(1).await.unwrap().to_vec();
        let twice = snapshot.remove(1).await.unwrap().to_vec();
        assert_eq!(once, twice);
        assert_eq!(twice, vec![movie(2, "B")]);
        assert_eq!(load_favorites(store.as_ref()).await.unwrap(), twice);
    }

    #[tokio::test]
    async fn add_from_second_consumer_duplicates_id() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut first = FavoritesSnapshot::load(store.clone()).await.unwrap();
        first.add(movie(1, "A")).await.unwrap();

        let mut second = FavoritesSnapshot::load(store.clone()).await.unwrap();
        second.add(movie(1, "A")).await.unwrap();

        let persisted = load_favorites(store.as_ref()).await.unwrap();
        assert_eq!(persisted, vec![movie(1, "A"), movie(1, "A")]);
        // The first consumer still holds its own stale copy.
        assert_eq!(first.movies().len(), 1);
    }

    #[tokio::test]
    async fn stale_consumer_overwrites_other_consumer() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut list = FavoritesSnapshot::load(store.clone()).await.unwrap();
        let mut screen = FavoritesSnapshot::load(store.clone()).await.unwrap();

        list.add(movie(1, "A")).await.unwrap();
        screen.add(movie(2, "B")).await.unwrap();

        assert_eq!(
            load_favorites(store.as_ref()).await.unwrap(),
            vec![movie(2, "B")]
        );
        list.reload().await.unwrap();
        assert!(!list.contains(1));
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_snapshot() {
        let flaky = Arc::new(FlakyStore::default());
        let store: Arc<dyn KeyValueStore> = flaky.clone();
        let mut snapshot = FavoritesSnapshot::load(store.clone()).await.unwrap();
        snapshot.add(movie(1, "A")).await.unwrap();
        let before = snapshot.movies().to_vec();

        flaky.fail_writes.store(true, Ordering::SeqCst);
        let err = snapshot.add(movie(2, "B")).await.unwrap_err();
        assert!(matches!(err, FavoritesError::StorageWrite(_)));
        assert_eq!(snapshot.movies(), before.as_slice());

        assert!(snapshot.remove(1).await.is_err());
        assert!(snapshot.toggle(movie(1, "A")).await.is_err());
        assert_eq!(snapshot.movies(), before.as_slice());
        assert_eq!(load_favorites(store.as_ref()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn toggle_adds_then_removes() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut snapshot = FavoritesSnapshot::load(store.clone()).await.unwrap();

        assert!(snapshot.toggle(movie(5, "E")).await.unwrap());
        assert!(snapshot.contains(5));
        assert!(!snapshot.toggle(movie(5, "E")).await.unwrap());
        assert!(!snapshot.contains(5));
        assert!(load_favorites(store.as_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn service_publishes_committed_states() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let service = FavoritesService::open(store.clone()).await;
        let mut rx = service.subscribe();

        service.add(movie(1, "A")).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_slice(), &[movie(1, "A")]);

        assert!(!service.toggle(movie(1, "A")).await.unwrap());
        assert!(service.current().is_empty());
        assert!(!service.contains(1));
    }

    #[tokio::test]
    async fn service_serializes_concurrent_mutations() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let service = FavoritesService::open(store.clone()).await;

        let handles: Vec<_> = (1..=20)
            .map(|id| {
                let service = service.clone();
                tokio::spawn(async move { service.add(movie(id, "M")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let persisted = load_favorites(store.as_ref()).await.unwrap();
        assert_eq!(persisted.len(), 20);
        assert_eq!(service.current().len(), 20);
    }

    #[tokio::test]
    async fn service_failure_publishes_nothing() {
        let flaky = Arc::new(FlakyStore::default());
        let service = FavoritesService::open(flaky.clone()).await;
        service.add(movie(1, "A")).await.unwrap();
        let rx = service.subscribe();

        flaky.fail_writes.store(true, Ordering::SeqCst);
        assert!(service.remove(1).await.is_err());
        assert!(!rx.has_changed().unwrap());
        assert!(service.contains(1));
    }

    #[tokio::test]
    async fn service_opens_over_unreadable_storage_and_recovers() {
        let store = Arc::new(MemoryStore::with_value(FAVORITES_KEY, "{corrupt"));
        let service = FavoritesService::open(store.clone()).await;
        assert!(service.current().is_empty());
        assert!(matches!(
            service.list().await,
            Err(FavoritesError::StorageRead(_))
        ));

        // Mutations must not overwrite a list they could not read.
        assert!(matches!(
            service.add(movie(2, "B")).await,
            Err(FavoritesError::StorageRead(_))
        ));
        assert_eq!(stored(store.as_ref()).await.as_deref(), Some("{corrupt"));

        let repaired = json!([{"id": 1, "title": "A"}]).to_string();
        store.set(FAVORITES_KEY, &repaired).await.unwrap();
        assert_eq!(service.list().await.unwrap().as_slice(), &[movie(1, "A")]);
        assert!(service.contains(1));
    }

    #[tokio::test]
    async fn timed_out_write_is_reread_before_next_use() {
        let store = Arc::new(LateWrites::default());
        let service = FavoritesService::open(store.clone()).await;

        let err = service.add(movie(1, "A")).await.unwrap_err();
        assert!(matches!(
            err,
            FavoritesError::StorageWrite(StorageError::TimedOut(_))
        ));
        assert!(service.current().is_empty());

        assert_eq!(service.list().await.unwrap().as_slice(), &[movie(1, "A")]);
    }
}
