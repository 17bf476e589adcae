//! Fetch catalog data and print what the screens would show.
//! Usage:
//!   cargo run --bin catalog_props -- list <trending|popular|top_rated|upcoming|now_playing|trending_tv>
//!   cargo run --bin catalog_props -- search <query>
//!   cargo run --bin catalog_props -- search
//!     (no query: type search text line by line; results print once input settles)
//!   cargo run --bin catalog_props -- movie <tmdb_id>
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use moviedeck::browse::{Debounced, SearchDebouncer};
use moviedeck::models::CatalogItem;
use moviedeck::tmdb::{self, CatalogApi, Category, TmdbClient};
use std::env;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    List,
    Search,
    Movie,
}

impl FromStr for Command {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "list" => Ok(Command::List),
            "search" => Ok(Command::Search),
            "movie" => Ok(Command::Movie),
            _ => Err(anyhow!("command must be 'list', 'search' or 'movie'")),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn print_rows(items: &[CatalogItem]) {
    for item in items {
        info!(
            "{:>8}  {:<40} {:<10} {:.1}  favoritable={}",
            item.id,
            item.display_title().unwrap_or("<untitled>"),
            item.display_date().unwrap_or(""),
            item.vote_average.unwrap_or(0.0),
            item.summary().is_ok()
        );
    }
    info!("{} rows", items.len());
}

async fn interactive_search(client: TmdbClient) -> Result<()> {
    let debouncer = SearchDebouncer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let debouncer = debouncer.clone();
        let client = client.clone();
        tokio::spawn(async move {
            match debouncer.submit(&line).await {
                Debounced::Settled(query) => match client.search_movies(&query).await {
                    Ok(items) => {
                        info!("--- search '{}' ---", query);
                        print_rows(&items);
                    }
                    Err(e) => warn!("Search failed: {:#}", e),
                },
                Debounced::Cleared => info!("Search cleared"),
                Debounced::Superseded => {}
            }
        });
    }
    debouncer.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let mut args = env::args().skip(1);
    let command: Command = args
        .next()
        .ok_or_else(|| anyhow!("missing command"))?
        .parse()?;
    let rest: Vec<String> = args.collect();
    let arg = rest.join(" ");

    let token = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
    let base = env::var("TMDB_BASE_URL").unwrap_or_else(|_| tmdb::TMDB_BASE.to_string());
    let client = TmdbClient::new(&base, &token)?;

    match command {
        Command::List => {
            let category: Category = arg.parse()?;
            info!("--- {} ---", category);
            print_rows(&client.list(category).await?);
        }
        Command::Search if arg.trim().is_empty() => interactive_search(client).await?,
        Command::Search => {
            info!("--- search '{}' ---", arg);
            print_rows(&client.search_movies(&arg).await?);
        }
        Command::Movie => {
            let id = tmdb::parse_movie_id(&arg)
                .ok_or_else(|| anyhow!("movie id must be numeric, got '{}'", arg))?;
            let (details, credits) =
                tokio::try_join!(client.movie_details(id), client.movie_credits(id))?;
            info!("title: {}", details.title);
            info!("year: {:?}", details.release_year());
            info!("rating: {:.1}/10", details.vote_average);
            info!("runtime: {:?}", details.runtime);
            info!("poster: {}", details.poster_url().unwrap_or_default());
            info!("directors: {}", credits.directors().join(", "));
            for member in credits.top_cast(10) {
                info!("cast: {} as {}", member.name, member.character);
            }
            info!("overview: {}", details.overview);
        }
    }
    Ok(())
}
