use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::api::Page;
use crate::error::Result;
use crate::transport::gateway::Gateway;
use crate::transport::ApiRequest;

pub const DEFAULT_PAGE_LIMIT: u32 = 12;

/// Catalog entry managed by this application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub show_date: Option<String>,
    #[serde(default)]
    pub show_time: Option<String>,
}

impl Movie {
    /// Scheduled showtime; only when both date and time are set and parse.
    pub fn showtime(&self) -> Option<NaiveDateTime> {
        let date = parse_show_date(self.show_date.as_deref()?)?;
        let time = parse_show_time(self.show_time.as_deref()?)?;
        Some(date.and_time(time))
    }
}

/// Accepts `YYYY-MM-DD`, an ISO timestamp starting with one, or `DD/MM/YYYY`
/// (also with `.` or `-` separators).
pub fn parse_show_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Some(prefix) = s.get(..10) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(d);
        }
    }
    ["%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Accepts `HH:mm` or `HH:mm:ss`; seconds are dropped.
pub fn parse_show_time(raw: &str) -> Option<NaiveTime> {
    let s = raw.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()?
        .with_second(0)
}

/// Create/update payload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieInput {
    pub title: String,
    pub year: i32,
    pub genre: String,
    pub rating: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_time: Option<String>,
}

#[derive(Clone)]
pub struct MoviesClient {
    gateway: Gateway,
}

impl MoviesClient {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn list(&self, q: Option<&str>, page: u32, limit: u32) -> Result<Page<Movie>> {
        let req = ApiRequest::get("/movies")
            .query("q", q.unwrap_or(""))
            .query("page", page.max(1))
            .query("limit", limit);
        self.gateway.send_json(req).await
    }

    pub async fn get(&self, id: &str) -> Result<Movie> {
        self.gateway
            .get_json(&format!("/movies/{}", urlencoding::encode(id)))
            .await
    }

    pub async fn create(&self, movie: &MovieInput) -> Result<Movie> {
        self.gateway.post_json("/movies", movie).await
    }

    pub async fn update(&self, id: &str, movie: &MovieInput) -> Result<Movie> {
        self.gateway
            .put_json(&format!("/movies/{}", urlencoding::encode(id)), movie)
            .await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.gateway
            .delete(&format!("/movies/{}", urlencoding::encode(id)))
            .await?;
        Ok(())
    }
}
