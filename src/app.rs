use crate::auth::{check_login, CredentialVerifier, LoginError, SessionSigner, StaticCredentials};
use crate::browse::{BrowseFeed, ContentFilter};
use crate::config::Config;
use crate::favorites::{FavoritesError, FavoritesService};
use crate::models::{CatalogItem, MovieCredits, MovieDraft, MovieSummary};
use crate::storage::{FileStore, KeyValueStore, TimeoutStore};
use crate::tmdb::{self, CatalogApi, Category, TmdbClient};
use anyhow::Result;
use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const LOGIN_LIMIT: u32 = 10; // per minute
const LOGIN_BURST: u32 = 5;
const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;
const DETAIL_CAST_SIZE: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogApi>,
    pub favorites: FavoritesService,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub sessions: SessionSigner,
    pub login_limits: Arc<Mutex<HashMap<String, WindowCounter>>>,
}

#[derive(Clone, Debug)]
pub struct WindowCounter {
    pub window: u64,
    pub count: u32,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        favorites: FavoritesService,
        verifier: Arc<dyn CredentialVerifier>,
        sessions: SessionSigner,
    ) -> Self {
        Self {
            catalog,
            favorites,
            verifier,
            sessions,
            login_limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let catalog: Arc<dyn CatalogApi> = Arc::new(TmdbClient::new(
        &config.tmdb_base_url,
        &config.tmdb_token,
    )?);

    let file_store = FileStore::new(&config.data_dir);
    info!("Storing favorites under {}", file_store.dir().display());
    let store: Arc<dyn KeyValueStore> = match config.storage_timeout {
        Some(limit) => {
            info!("Storage calls time out after {:?}", limit);
            Arc::new(TimeoutStore::new(file_store, limit))
        }
        None => Arc::new(file_store),
    };
    let favorites = FavoritesService::open(store).await;

    let verifier: Arc<dyn CredentialVerifier> = Arc::new(StaticCredentials::new(
        &config.login_identity,
        &config.login_secret,
    ));
    let sessions = SessionSigner::new(&config.session_secret, config.session_ttl);

    let app = build_router(AppState::new(catalog, favorites, verifier, sessions));

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/browse", get(browse))
        .route("/catalog/:category", get(catalog_list))
        .route("/search", get(search))
        .route("/movies/:id", get(movie_detail))
        .route("/favorites", get(list_favorites).post(add_favorite))
        .route("/favorites/toggle", post(toggle_favorite))
        .route("/favorites/:id", delete(remove_favorite))
        .route("/favorites/:id/share", get(share_favorite))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/login", post(login))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn favorites(err: FavoritesError, write_message: &str) -> Self {
        match err {
            FavoritesError::InvalidMovie(detail) => {
                warn!("Rejected favorite: {}", detail);
                Self::new(
                    StatusCode::BAD_REQUEST,
                    "Invalid movie data: Movie must have id and title",
                )
            }
            FavoritesError::StorageRead(e) => {
                error!("Favorites read failed: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load favorites")
            }
            FavoritesError::StorageWrite(e) => {
                error!("Favorites write failed: {}", e);
                Self::new(StatusCode::SERVICE_UNAVAILABLE, write_message)
            }
        }
    }

    fn catalog(err: anyhow::Error, message: &str) -> Self {
        error!("Catalog request failed: {:#}", err);
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"status": "error", "message": self.message})),
        )
            .into_response()
    }
}

/// One movie tile as the list screens render it.
#[derive(Debug, Serialize)]
pub struct RowView {
    pub id: i64,
    pub title: Option<String>,
    pub poster_url: Option<String>,
    pub release_date: Option<String>,
    pub rating: String,
    pub favorite: bool,
}

impl RowView {
    fn from_item(item: &CatalogItem, favorites: &FavoritesService) -> Self {
        Self {
            id: item.id,
            title: item.display_title().map(str::to_string),
            poster_url: item.poster_url(),
            release_date: item.display_date().map(str::to_string),
            rating: format!("{:.1}", item.vote_average.unwrap_or(0.0)),
            favorite: favorites.contains(item.id),
        }
    }

    fn from_favorite(movie: &MovieSummary) -> Self {
        Self {
            id: movie.id,
            title: Some(movie.title.clone()),
            poster_url: movie.poster_url(),
            release_date: Some(movie.release_date.clone()).filter(|d| !d.is_empty()),
            rating: format!("{:.1}", movie.vote_average.unwrap_or(0.0)),
            favorite: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct FavoriteView {
    id: i64,
    title: String,
    year: String,
    poster_url: Option<String>,
}

impl From<&MovieSummary> for FavoriteView {
    fn from(movie: &MovieSummary) -> Self {
        Self {
            id: movie.id,
            title: movie.title.clone(),
            year: movie.year().to_string(),
            poster_url: movie.poster_url(),
        }
    }
}

fn favorites_body(movies: &[MovieSummary]) -> serde_json::Value {
    let views: Vec<FavoriteView> = movies.iter().map(FavoriteView::from).collect();
    json!({ "favorites": views })
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = extract_ip(&headers);
    if !check_login_rate(&state, &ip).await {
        warn!("Login rate limit exceeded for {}", ip);
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many login attempts, try again later",
        ));
    }

    check_login(state.verifier.as_ref(), &req.email, &req.password).map_err(|e| {
        let status = match e {
            LoginError::FieldsRequired => StatusCode::BAD_REQUEST,
            LoginError::InvalidCredentials => {
                warn!("Failed login for '{}' from {}", req.email, ip);
                StatusCode::UNAUTHORIZED
            }
        };
        ApiError::new(status, e.to_string())
    })?;

    info!("User '{}' logged in", req.email);
    let token = state.sessions.issue(&req.email, Utc::now());
    Ok(Json(json!({ "token": token })))
}

async fn require_session(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = auth.and_then(|TypedHeader(authorization)| {
        state.sessions.verify(authorization.token(), Utc::now())
    });
    match identity {
        Some(identity) => {
            debug!("{} {} by '{}'", request.method(), request.uri().path(), identity);
            next.run(request).await
        }
        None => ApiError::new(StatusCode::UNAUTHORIZED, "Login required").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    chip: Option<String>,
}

#[derive(Debug, Serialize)]
struct BrowseView {
    chip: &'static str,
    selected: Vec<RowView>,
    rails: Vec<RailView>,
}

#[derive(Debug, Serialize)]
struct RailView {
    category: &'static str,
    movies: Vec<RowView>,
}

async fn browse(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<BrowseView>, ApiError> {
    let filter = match query.chip.as_deref() {
        Some(chip) => chip
            .parse::<ContentFilter>()
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => ContentFilter::default(),
    };

    let feed = BrowseFeed::refresh(state.catalog.as_ref())
        .await
        .map_err(|e| ApiError::catalog(e, "Failed to load movies"))?;

    let selected = match filter {
        ContentFilter::Favorites => state
            .favorites
            .list()
            .await
            .map_err(|e| ApiError::favorites(e, "Failed to load favorites"))?
            .iter()
            .map(RowView::from_favorite)
            .collect(),
        _ => rows(feed.rows(filter), &state.favorites),
    };
    let rails = feed
        .rails()
        .into_iter()
        .map(|(category, items)| RailView {
            category: category.as_str(),
            movies: rows(items, &state.favorites),
        })
        .collect();

    Ok(Json(BrowseView {
        chip: filter.label(),
        selected,
        rails,
    }))
}

fn rows(items: &[CatalogItem], favorites: &FavoritesService) -> Vec<RowView> {
    items
        .iter()
        .map(|item| RowView::from_item(item, favorites))
        .collect()
}

async fn catalog_list(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<RowView>>, ApiError> {
    let category: Category = category
        .parse()
        .map_err(|e: anyhow::Error| ApiError::new(StatusCode::NOT_FOUND, e.to_string()))?;
    let items = state
        .catalog
        .list(category)
        .await
        .map_err(|e| ApiError::catalog(e, "Failed to load movies"))?;
    Ok(Json(rows(&items, &state.favorites)))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    query: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<RowView>>, ApiError> {
    let Some(text) = query.query.filter(|q| !q.trim().is_empty()) else {
        return Ok(Json(Vec::new()));
    };
    let items = state
        .catalog
        .search_movies(&text)
        .await
        .map_err(|e| ApiError::catalog(e, "Search failed"))?;
    Ok(Json(rows(&items, &state.favorites)))
}

#[derive(Debug, Serialize)]
struct CastView {
    id: i64,
    name: String,
    character: String,
    profile_url: String,
}

#[derive(Debug, Serialize)]
struct DetailView {
    id: i64,
    title: String,
    overview: String,
    poster_url: Option<String>,
    release_year: Option<i32>,
    rating: String,
    cast: Vec<CastView>,
    directors: Vec<String>,
    favorite: bool,
}

async fn movie_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DetailView>, ApiError> {
    let id = parse_id(&id)?;
    let (details, credits) = tokio::join!(
        state.catalog.movie_details(id),
        state.catalog.movie_credits(id)
    );
    let details = details.map_err(|e| ApiError::catalog(e, "Failed to load movie details"))?;
    let credits = credits.unwrap_or_else(|e| {
        warn!("No credits for movie {}: {:#}", id, e);
        MovieCredits::default()
    });

    let cast = credits
        .top_cast(DETAIL_CAST_SIZE)
        .iter()
        .map(|c| CastView {
            id: c.id,
            name: c.name.clone(),
            character: c.character.clone(),
            profile_url: c.profile_url(),
        })
        .collect();

    Ok(Json(DetailView {
        id: details.id,
        poster_url: details.poster_url(),
        release_year: details.release_year(),
        rating: format!("{:.1}/10", details.vote_average),
        directors: credits.directors(),
        favorite: state.favorites.contains(details.id),
        cast,
        title: details.title,
        overview: details.overview,
    }))
}

/// Reads storage on every visit, so a failed load can be retried.
async fn list_favorites(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let movies = state
        .favorites
        .reload()
        .await
        .map_err(|e| ApiError::favorites(e, "Failed to load favorites"))?;
    Ok(Json(favorites_body(&movies)))
}

async fn add_favorite(
    State(state): State<AppState>,
    Json(draft): Json<MovieDraft>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let movie = draft
        .into_summary()
        .map_err(|e| ApiError::favorites(e, "Failed to add favorite"))?;
    let movies = state
        .favorites
        .add(movie)
        .await
        .map_err(|e| ApiError::favorites(e, "Failed to add favorite"))?;
    Ok((StatusCode::CREATED, Json(favorites_body(&movies))))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Json(draft): Json<MovieDraft>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let movie = draft
        .into_summary()
        .map_err(|e| ApiError::favorites(e, "Failed to update favorites"))?;
    let favorite = state
        .favorites
        .toggle(movie)
        .await
        .map_err(|e| ApiError::favorites(e, "Failed to update favorites"))?;
    Ok(Json(json!({ "favorite": favorite })))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id: i64 = id
        .trim()
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid movie id '{}'", id)))?;
    let movies = state.favorites.remove(id).await.map_err(|e| {
        ApiError::favorites(
            e,
            "Failed to remove movie from favorites. Please try again.",
        )
    })?;
    Ok(Json(favorites_body(&movies)))
}

async fn share_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_id(&id)?;
    let movies = state
        .favorites
        .list()
        .await
        .map_err(|e| ApiError::favorites(e, "Failed to load favorites"))?;
    let movie = movies
        .iter()
        .find(|m| m.id == id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Movie is not in favorites"))?;
    Ok(Json(json!({
        "title": "Share Movie",
        "message": movie.share_message(),
    })))
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    tmdb::parse_movie_id(raw)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid movie id '{}'", raw)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

fn extract_ip(headers: &HeaderMap) -> String {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn check_login_rate(state: &AppState, ip: &str) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let mut guards = state.login_limits.lock().await;
    if guards.len() > MAX_RATE_LIMIT_ENTRIES {
        guards.retain(|_, v| v.window == window);
    }
    let entry = guards
        .entry(ip.to_string())
        .or_insert(WindowCounter { window, count: 0 });
    if entry.window != window {
        entry.window = window;
        entry.count = 0;
    }
    if entry.count >= LOGIN_LIMIT + LOGIN_BURST {
        return false;
    }
    entry.count += 1;
    true
}
