use anyhow::Result;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::CatalogItem;
use crate::tmdb::{CatalogApi, Category};

pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Every rail shown on the browse screen.
#[derive(Debug, Clone, Default)]
pub struct BrowseFeed {
    pub trending: Vec<CatalogItem>,
    pub popular: Vec<CatalogItem>,
    pub top_rated: Vec<CatalogItem>,
    pub upcoming: Vec<CatalogItem>,
    pub now_playing: Vec<CatalogItem>,
    pub trending_tv: Vec<CatalogItem>,
}

impl BrowseFeed {
    /// Fetches all rails at once. Trending and popular are the screen's
    /// primary content and fail the refresh; the rest fall back to empty.
    pub async fn refresh(catalog: &dyn CatalogApi) -> Result<Self> {
        let (trending, popular, top_rated, upcoming, now_playing, trending_tv) = tokio::join!(
            catalog.list(Category::Trending),
            catalog.list(Category::Popular),
            catalog.list(Category::TopRated),
            catalog.list(Category::Upcoming),
            catalog.list(Category::NowPlaying),
            catalog.list(Category::TrendingTv),
        );
        let feed = Self {
            trending: trending?,
            popular: popular?,
            top_rated: or_empty(Category::TopRated, top_rated),
            upcoming: or_empty(Category::Upcoming, upcoming),
            now_playing: or_empty(Category::NowPlaying, now_playing),
            trending_tv: or_empty(Category::TrendingTv, trending_tv),
        };
        debug!(
            "Refreshed browse feed ({} trending, {} popular)",
            feed.trending.len(),
            feed.popular.len()
        );
        Ok(feed)
    }

    pub fn rails(&self) -> [(Category, &[CatalogItem]); 6] {
        [
            (Category::Trending, self.trending.as_slice()),
            (Category::Popular, self.popular.as_slice()),
            (Category::TopRated, self.top_rated.as_slice()),
            (Category::Upcoming, self.upcoming.as_slice()),
            (Category::NowPlaying, self.now_playing.as_slice()),
            (Category::TrendingTv, self.trending_tv.as_slice()),
        ]
    }

    /// Rows for the selected chip. `Favorites` has no catalog rows and is
    /// served from the favorites list by the caller.
    pub fn rows(&self, filter: ContentFilter) -> &[CatalogItem] {
        match filter {
            ContentFilter::Movies => &self.trending,
            ContentFilter::TvShows => &self.trending_tv,
            ContentFilter::People | ContentFilter::Favorites => &[],
        }
    }
}

fn or_empty(category: Category, result: Result<Vec<CatalogItem>>) -> Vec<CatalogItem> {
    result.unwrap_or_else(|e| {
        warn!("Failed to load {} rail: {:#}", category, e);
        Vec::new()
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentFilter {
    #[default]
    Movies,
    TvShows,
    People,
    Favorites,
}

impl ContentFilter {
    pub fn label(&self) -> &'static str {
        match self {
            ContentFilter::Movies => "Movies",
            ContentFilter::TvShows => "TV Shows",
            ContentFilter::People => "People",
            ContentFilter::Favorites => "Favorites",
        }
    }
}

impl fmt::Display for ContentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ContentFilter {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "movies" => Ok(ContentFilter::Movies),
            "tvshows" | "tv" => Ok(ContentFilter::TvShows),
            "people" => Ok(ContentFilter::People),
            "favorites" => Ok(ContentFilter::Favorites),
            _ => Err(anyhow::anyhow!("unknown content filter '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Debounced {
    /// Input was blank: pending searches are cancelled and the query cleared.
    Cleared,
    /// No newer input arrived within the window; search for this text.
    Settled(String),
    /// A newer submission replaced this one.
    Superseded,
}

/// Collapses bursts of search-box input into one query.
#[derive(Debug, Clone)]
pub struct SearchDebouncer {
    delay: Duration,
    latest: Arc<AtomicU64>,
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(SEARCH_DEBOUNCE)
    }
}

impl SearchDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn submit(&self, text: &str) -> Debounced {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if text.trim().is_empty() {
            return Debounced::Cleared;
        }
        tokio::time::sleep(self.delay).await;
        if self.latest.load(Ordering::SeqCst) == ticket {
            Debounced::Settled(text.to_string())
        } else {
            Debounced::Superseded
        }
    }

    /// Drops whatever is pending, e.g. when the screen goes away.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}
