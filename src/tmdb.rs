use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::models::{CatalogItem, MovieCredits, MovieDetails};

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Trending,
    Popular,
    TopRated,
    Upcoming,
    NowPlaying,
    TrendingTv,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Trending,
        Category::Popular,
        Category::TopRated,
        Category::Upcoming,
        Category::NowPlaying,
        Category::TrendingTv,
    ];

    fn path(&self) -> &'static str {
        match self {
            Category::Trending => "trending/movie/week",
            Category::Popular => "movie/popular",
            Category::TopRated => "movie/top_rated",
            Category::Upcoming => "movie/upcoming",
            Category::NowPlaying => "movie/now_playing",
            Category::TrendingTv => "trending/tv/day",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Trending => "trending",
            Category::Popular => "popular",
            Category::TopRated => "top_rated",
            Category::Upcoming => "upcoming",
            Category::NowPlaying => "now_playing",
            Category::TrendingTv => "trending_tv",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown catalog category '{}'", s))
    }
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list(&self, category: Category) -> Result<Vec<CatalogItem>>;
    async fn search_movies(&self, query: &str) -> Result<Vec<CatalogItem>>;
    async fn movie_details(&self, id: i64) -> Result<MovieDetails>;
    async fn movie_credits(&self, id: i64) -> Result<MovieCredits>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ResultsPage {
    #[serde(default)]
    results: Vec<CatalogItem>,
}

impl TmdbClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let user_agent = format!("moviedeck/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> {} {}", url, status, text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn list(&self, category: Category) -> Result<Vec<CatalogItem>> {
        let url = format!("{}/{}", self.base_url, category.path());
        let page: ResultsPage = self
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch {} list", category))?;
        Ok(page.results)
    }

    async fn search_movies(&self, query: &str) -> Result<Vec<CatalogItem>> {
        let url = search_url(&self.base_url, query);
        let page: ResultsPage = self
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to search movies for '{}'", query))?;
        Ok(page.results)
    }

    async fn movie_details(&self, id: i64) -> Result<MovieDetails> {
        let url = format!("{}/movie/{id}?language=en-US", self.base_url);
        self.get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch details for movie {}", id))
    }

    async fn movie_credits(&self, id: i64) -> Result<MovieCredits> {
        let url = format!("{}/movie/{id}/credits", self.base_url);
        self.get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch credits for movie {}", id))
    }
}

fn search_url(base_url: &str, query: &str) -> String {
    format!(
        "{base_url}/search/movie?query={}&include_adult=false&language=en-US&page=1",
        urlencoding::encode(query)
    )
}

pub fn parse_movie_id(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_round_trip_through_names() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert_eq!(" TOP_RATED ".parse::<Category>().unwrap(), Category::TopRated);
        assert!("documentaries".parse::<Category>().is_err());
    }

    #[test]
    fn category_paths_match_endpoints() {
        assert_eq!(Category::Trending.path(), "trending/movie/week");
        assert_eq!(Category::TrendingTv.path(), "trending/tv/day");
    }

    #[test]
    fn search_url_encodes_query() {
        assert_eq!(
            search_url(TMDB_BASE, "the thing & co"),
            "https://api.themoviedb.org/3/search/movie?query=the%20thing%20%26%20co&include_adult=false&language=en-US&page=1"
        );
    }

    #[test]
    fn parses_results_page_with_sparse_rows() {
        let page: ResultsPage = serde_json::from_str(
            r#"{"page":1,"results":[
                {"id":1,"title":"A","poster_path":null,"vote_average":7.5,"genre_ids":[1,2]},
                {"id":2,"name":"Show","first_air_date":"2020-01-01"}
            ],"total_pages":1}"#,
        )
        .unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].poster_url(), None);
        assert_eq!(page.results[1].display_title(), Some("Show"));
    }

    #[test]
    fn parse_movie_id_accepts_digits_only() {
        assert_eq!(parse_movie_id("550"), Some(550));
        assert_eq!(parse_movie_id(" 550 "), Some(550));
        assert_eq!(parse_movie_id("tt0137523"), None);
        assert_eq!(parse_movie_id(""), None);
    }
}
