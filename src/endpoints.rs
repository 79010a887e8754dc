//! Logical endpoint table
//!
//! Each logical endpoint knows how to build its upstream path, whether its
//! payload is unwrapped from the `data` envelope field, which TTL class it is
//! cached under and which snapshot file backs it.

use crate::config::TtlConfig;
use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How a successful upstream body is turned into the payload returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeMode {
    /// Return the `data` field of `{ status: "Ok", data: ... }`
    Unwrap,
    /// Return the whole body; list fields and pagination live at the top level
    PassThrough,
}

/// Cache lifetime class of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Volatile,
    Standard,
    Reference,
}

impl TtlClass {
    pub fn duration(&self, ttl: &TtlConfig) -> Duration {
        let secs = match self {
            TtlClass::Volatile => ttl.volatile_secs,
            TtlClass::Standard => ttl.standard_secs,
            TtlClass::Reference => ttl.reference_secs,
        };
        Duration::from_secs(secs)
    }
}

/// A named category of upstream request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalEndpoint {
    Home,
    Ongoing,
    Complete,
    Movies,
    MovieDetail,
    AnimeDetail,
    AnimeEpisodes,
    EpisodeDetail,
    Search,
    Genres,
    GenreAnime,
}

impl LogicalEndpoint {
    pub const ALL: [LogicalEndpoint; 11] = [
        LogicalEndpoint::Home,
        LogicalEndpoint::Ongoing,
        LogicalEndpoint::Complete,
        LogicalEndpoint::Movies,
        LogicalEndpoint::MovieDetail,
        LogicalEndpoint::AnimeDetail,
        LogicalEndpoint::AnimeEpisodes,
        LogicalEndpoint::EpisodeDetail,
        LogicalEndpoint::Search,
        LogicalEndpoint::Genres,
        LogicalEndpoint::GenreAnime,
    ];

    /// Name used in cache keys and inbound routes
    pub fn name(&self) -> &'static str {
        match self {
            LogicalEndpoint::Home => "home",
            LogicalEndpoint::Ongoing => "ongoing-anime",
            LogicalEndpoint::Complete => "complete-anime",
            LogicalEndpoint::Movies => "movies",
            LogicalEndpoint::MovieDetail => "movie",
            LogicalEndpoint::AnimeDetail => "anime",
            LogicalEndpoint::AnimeEpisodes => "anime-episodes",
            LogicalEndpoint::EpisodeDetail => "episode",
            LogicalEndpoint::Search => "search",
            LogicalEndpoint::Genres => "genres",
            LogicalEndpoint::GenreAnime => "genre",
        }
    }

    /// Upstream path segments, relative to the base URL
    ///
    /// # Returns
    /// * `Err(GatewayError::MissingParameter)` if a required parameter is absent or empty
    pub fn path_segments(&self, params: &HashMap<String, String>) -> Result<Vec<String>> {
        let segments = match self {
            LogicalEndpoint::Home => vec!["home".to_string()],
            LogicalEndpoint::Ongoing => vec!["ongoing-anime".to_string(), page(params)],
            LogicalEndpoint::Complete => vec!["complete-anime".to_string(), page(params)],
            LogicalEndpoint::Movies => vec!["movies".to_string(), page(params)],
            LogicalEndpoint::MovieDetail => vec![
                "movies".to_string(),
                required(params, "year")?,
                required(params, "month")?,
                required(params, "slug")?,
            ],
            LogicalEndpoint::AnimeDetail => vec!["anime".to_string(), required(params, "slug")?],
            LogicalEndpoint::AnimeEpisodes => vec![
                "anime".to_string(),
                required(params, "slug")?,
                "episodes".to_string(),
            ],
            LogicalEndpoint::EpisodeDetail => vec![
                "anime".to_string(),
                required(params, "slug")?,
                "episodes".to_string(),
                required(params, "episode")?,
            ],
            LogicalEndpoint::Search => vec!["search".to_string(), required(params, "keyword")?],
            LogicalEndpoint::Genres => vec!["genres".to_string()],
            LogicalEndpoint::GenreAnime => vec![
                "genres".to_string(),
                required(params, "genre")?,
                page(params),
            ],
        };
        Ok(segments)
    }

    /// Upstream path as a `/`-joined string, for logging
    pub fn path(&self, params: &HashMap<String, String>) -> Result<String> {
        Ok(format!("/{}", self.path_segments(params)?.join("/")))
    }

    pub fn envelope(&self) -> EnvelopeMode {
        match self {
            LogicalEndpoint::Ongoing
            | LogicalEndpoint::Complete
            | LogicalEndpoint::Movies
            | LogicalEndpoint::MovieDetail
            | LogicalEndpoint::Search
            | LogicalEndpoint::GenreAnime => EnvelopeMode::PassThrough,
            LogicalEndpoint::Home
            | LogicalEndpoint::AnimeDetail
            | LogicalEndpoint::AnimeEpisodes
            | LogicalEndpoint::EpisodeDetail
            | LogicalEndpoint::Genres => EnvelopeMode::Unwrap,
        }
    }

    pub fn ttl_class(&self) -> TtlClass {
        match self {
            LogicalEndpoint::Home | LogicalEndpoint::Ongoing | LogicalEndpoint::Search => {
                TtlClass::Volatile
            }
            LogicalEndpoint::Genres => TtlClass::Reference,
            _ => TtlClass::Standard,
        }
    }

    /// Snapshot document backing this endpoint, shared by all pages
    pub fn snapshot_file(&self) -> Option<&'static str> {
        match self {
            LogicalEndpoint::Home => Some("v1_home.json"),
            LogicalEndpoint::Ongoing => Some("v1_ongoing-anime_page.json"),
            LogicalEndpoint::Complete => Some("v1_complete-anime_page.json"),
            LogicalEndpoint::Genres => Some("v1_genres.json"),
            LogicalEndpoint::Search => Some("v1_search_keyword.json"),
            LogicalEndpoint::AnimeEpisodes => Some("v1_anime_slug_episodes.json"),
            LogicalEndpoint::AnimeDetail => Some("v1_anime_slug.json"),
            LogicalEndpoint::EpisodeDetail => Some("v1_episode_slug.json"),
            LogicalEndpoint::Movies | LogicalEndpoint::MovieDetail | LogicalEndpoint::GenreAnime => {
                None
            }
        }
    }
}

impl fmt::Display for LogicalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogicalEndpoint {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        LogicalEndpoint::ALL
            .iter()
            .copied()
            .find(|endpoint| endpoint.name() == s)
            .ok_or_else(|| GatewayError::UnknownEndpoint(s.to_string()))
    }
}

fn page(params: &HashMap<String, String>) -> String {
    params
        .get("page")
        .filter(|value| !value.is_empty())
        .cloned()
        .unwrap_or_else(|| "1".to_string())
}

fn required(params: &HashMap<String, String>, name: &'static str) -> Result<String> {
    params
        .get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or(GatewayError::MissingParameter(name))
}
