//! Read-only movie database, reached through the backend's `/tmdb/*` proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::transport::gateway::Gateway;
use crate::transport::ApiRequest;

const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";
const KID_GENRES: [u32; 2] = [16, 14];
const KID_GENRES_PARAM: &str = "16,14";
const KID_PAGE_SIZE: usize = 20;

pub fn image_url(path: Option<&str>, size: &str) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{IMAGE_BASE}/{size}{p}"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmdbMovie {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
    #[serde(default)]
    pub adult: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TmdbPage {
    #[serde(default = "one")]
    page: u32,
    #[serde(default = "one")]
    total_pages: u32,
    #[serde(default)]
    results: Vec<TmdbMovie>,
}

fn one() -> u32 {
    1
}

/// Display projection of a movie-db result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieCard {
    pub id: u64,
    pub title: String,
    pub year: Option<i32>,
    pub rating: f64,
    pub overview: String,
    pub poster_url: Option<String>,
    pub poster_large_url: Option<String>,
    pub genre: String,
    pub adult: bool,
    pub genre_ids: Vec<u32>,
    pub release_date: String,
}

impl From<&TmdbMovie> for MovieCard {
    fn from(m: &TmdbMovie) -> Self {
        let title = m
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| m.name.clone().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| "Untitled".to_string());
        let release_date = m.release_date.clone().unwrap_or_default();
        let year = release_date.get(..4).and_then(|y| y.parse().ok());
        let rating = m
            .vote_average
            .map(|v| (v * 10.0).round() / 10.0)
            .unwrap_or(0.0);

        Self {
            id: m.id,
            title,
            year,
            rating,
            overview: m.overview.clone().unwrap_or_default(),
            poster_url: image_url(m.poster_path.as_deref(), "w500"),
            poster_large_url: image_url(m.poster_path.as_deref(), "w780"),
            genre: m
                .genre_ids
                .first()
                .map(|g| format!("#{g}"))
                .unwrap_or_default(),
            adult: m.adult,
            genre_ids: m.genre_ids.clone(),
            release_date,
        }
    }
}

impl MovieCard {
    pub fn is_kid_friendly(&self) -> bool {
        self.genre_ids.iter().any(|g| KID_GENRES.contains(g))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardPage {
    pub page: u32,
    pub total_pages: u32,
    pub results: Vec<MovieCard>,
}

impl From<TmdbPage> for CardPage {
    fn from(p: TmdbPage) -> Self {
        Self {
            page: p.page,
            total_pages: p.total_pages,
            results: p.results.iter().map(MovieCard::from).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MovieDetail {
    pub raw: Value,
    pub card: MovieCard,
}

/// Server-side filters for `/tmdb/discover`.
#[derive(Debug, Clone, Default)]
pub struct DiscoverQuery {
    pub page: u32,
    /// Primary release year
    pub year: Option<i32>,
    pub with_genres: Option<String>,
    pub certification_country: Option<String>,
    pub certification_lte: Option<String>,
}

impl DiscoverQuery {
    fn kid(page: u32) -> Self {
        Self {
            page,
            with_genres: Some(KID_GENRES_PARAM.to_string()),
            certification_country: Some("US".to_string()),
            certification_lte: Some("PG".to_string()),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct TmdbClient {
    gateway: Gateway,
    language: String,
    region: String,
}

impl TmdbClient {
    pub fn new(gateway: Gateway, language: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            gateway,
            language: language.into(),
            region: region.into(),
        }
    }

    pub fn from_config(gateway: Gateway, config: &GatewayConfig) -> Self {
        Self::new(gateway, &config.tmdb_language, &config.tmdb_region)
    }

    fn request(&self, path: &str) -> ApiRequest {
        ApiRequest::get(path)
            .query("language", &self.language)
            .query("region", &self.region)
    }

    async fn fetch_page(&self, req: ApiRequest) -> Result<TmdbPage> {
        self.gateway.send_json(req).await
    }

    pub async fn popular(&self, page: u32) -> Result<CardPage> {
        let req = self.request("/tmdb/popular").query("page", page.max(1));
        Ok(self.fetch_page(req).await?.into())
    }

    pub async fn search(&self, q: &str, page: u32) -> Result<CardPage> {
        Ok(self.search_raw(q, page).await?.into())
    }

    async fn search_raw(&self, q: &str, page: u32) -> Result<TmdbPage> {
        let req = self
            .request("/tmdb/search")
            .query("q", q)
            .query("page", page.max(1));
        self.fetch_page(req).await
    }

    pub async fn discover(&self, query: &DiscoverQuery) -> Result<CardPage> {
        let req = self
            .request("/tmdb/discover")
            .query("include_adult", false)
            .query("page", query.page.max(1))
            .query_opt("year", query.year)
            .query_opt("with_genres", query.with_genres.as_deref())
            .query_opt("certification_country", query.certification_country.as_deref())
            .query_opt("certification_lte", query.certification_lte.as_deref());
        Ok(self.fetch_page(req).await?.into())
    }

    pub async fn movie(&self, id: u64) -> Result<MovieDetail> {
        let raw: Value = self
            .gateway
            .send_json(self.request(&format!("/tmdb/movie/{id}")))
            .await?;
        let parsed: TmdbMovie = serde_json::from_value(raw.clone())?;
        Ok(MovieDetail {
            card: MovieCard::from(&parsed),
            raw,
        })
    }

    /// Movies released in `year`; `kid` restricts to Animation/Fantasy rated
    /// PG or lower.
    pub async fn by_year(&self, year: i32, page: u32, kid: bool) -> Result<CardPage> {
        let mut query = if kid {
            DiscoverQuery::kid(page)
        } else {
            DiscoverQuery {
                page,
                ..Default::default()
            }
        };
        query.year = Some(year);
        self.discover(&query).await
    }

    pub async fn kid_feed(&self, page: u32) -> Result<CardPage> {
        self.discover(&DiscoverQuery::kid(page)).await
    }

    /// Title search restricted to Animation/Fantasy. The proxy cannot filter
    /// searches by genre, so proxy pages are walked from `page` until a full
    /// page of matches is collected or results run out.
    pub async fn kid_search(&self, q: &str, page: u32) -> Result<CardPage> {
        let page = page.max(1);
        let mut collected: Vec<MovieCard> = Vec::new();
        let mut proxy_page = page;
        let mut total_pages = 1;

        while collected.len() < KID_PAGE_SIZE {
            let data = self.search_raw(q, proxy_page).await?;
            total_pages = data.total_pages.max(1);

            if data.results.is_empty() {
                break;
            }
            collected.extend(
                data.results
                    .iter()
                    .map(MovieCard::from)
                    .filter(MovieCard::is_kid_friendly),
            );

            if proxy_page >= total_pages {
                break;
            }
            proxy_page += 1;
        }

        collected.truncate(KID_PAGE_SIZE);
        Ok(CardPage {
            page,
            total_pages,
            results: collected,
        })
    }
}
