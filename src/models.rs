use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::favorites::FavoritesError;

pub const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";
pub const PROFILE_PLACEHOLDER: &str = "https://via.placeholder.com/200x300";

/// A favorited movie as it is persisted in the favorites slot.
///
/// Valid only with a non-empty `title`; `id` is always present once a value
/// has this type. Use [`MovieDraft`] for data that has not been checked yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: i64,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub poster_path: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub release_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_average: Option<f64>,
}

impl MovieSummary {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            poster_path: String::new(),
            release_date: String::new(),
            vote_average: None,
        }
    }

    pub fn validate(&self) -> Result<(), FavoritesError> {
        if self.title.is_empty() {
            return Err(FavoritesError::InvalidMovie(format!(
                "movie {} has an empty title",
                self.id
            )));
        }
        Ok(())
    }

    pub fn poster_url(&self) -> Option<String> {
        image_url(&self.poster_path)
    }

    /// First four characters of the release date, empty when unknown.
    pub fn year(&self) -> &str {
        self.release_date.get(..4).unwrap_or(&self.release_date)
    }

    pub fn share_message(&self) -> String {
        format!("Check out this movie: {} ({})", self.title, self.year())
    }
}

/// Unchecked movie data coming from storage or from a client request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieDraft {
    pub id: Option<i64>,
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub poster_path: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub vote_average: Option<f64>,
}

impl MovieDraft {
    pub fn into_summary(self) -> Result<MovieSummary, FavoritesError> {
        let id = self
            .id
            .ok_or_else(|| FavoritesError::InvalidMovie("missing id".to_string()))?;
        let title = self
            .title
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FavoritesError::InvalidMovie(format!("movie {id} has no title")))?;
        Ok(MovieSummary {
            id,
            title,
            poster_path: self.poster_path.unwrap_or_default(),
            release_date: self.release_date.unwrap_or_default(),
            vote_average: self.vote_average,
        })
    }
}

/// A row of a catalog list or search result. TV rows carry `name` and
/// `first_air_date` instead of `title` and `release_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
}

impl CatalogItem {
    pub fn display_title(&self) -> Option<&str> {
        self.title.as_deref().or(self.name.as_deref())
    }

    pub fn display_date(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .or(self.first_air_date.as_deref())
    }

    pub fn poster_url(&self) -> Option<String> {
        self.poster_path.as_deref().and_then(image_url)
    }

    /// Favorites hold movies only, so a record without `title` is rejected.
    pub fn summary(&self) -> Result<MovieSummary, FavoritesError> {
        MovieDraft {
            id: Some(self.id),
            title: self.title.clone(),
            poster_path: self.poster_path.clone(),
            release_date: self.release_date.clone(),
            vote_average: self.vote_average,
        }
        .into_summary()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub runtime: Option<u32>,
}

impl MovieDetails {
    pub fn release_year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .and_then(|y| y.parse().ok())
    }

    pub fn poster_url(&self) -> Option<String> {
        self.poster_path.as_deref().and_then(image_url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub profile_path: Option<String>,
}

impl CastMember {
    pub fn profile_url(&self) -> String {
        self.profile_path
            .as_deref()
            .and_then(image_url)
            .unwrap_or_else(|| PROFILE_PLACEHOLDER.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieCredits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

impl MovieCredits {
    pub fn top_cast(&self, max: usize) -> &[CastMember] {
        &self.cast[..self.cast.len().min(max)]
    }

    pub fn directors(&self) -> Vec<String> {
        self.crew
            .iter()
            .filter(|c| matches!(c.job.as_deref(), Some("Director")))
            .map(|c| c.name.clone())
            .collect()
    }
}

pub fn image_url(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    Some(format!("{IMAGE_BASE}{path}"))
}

/// Optional fields of the wrong type read as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
