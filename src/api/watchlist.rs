use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::transport::gateway::Gateway;
use crate::transport::ApiRequest;

/// Where a watchlisted movie lives: the local catalog or the movie-db proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchSource {
    Local,
    Tmdb,
}

impl WatchSource {
    /// Purely numeric ids come from the movie database; anything else is a
    /// local catalog id.
    pub fn infer(movie_id: &str) -> Self {
        if !movie_id.is_empty() && movie_id.bytes().all(|b| b.is_ascii_digit()) {
            WatchSource::Tmdb
        } else {
            WatchSource::Local
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchSource::Local => "local",
            WatchSource::Tmdb => "tmdb",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchlistItem {
    pub id: String,
    pub source: WatchSource,
    pub title: String,
    pub poster_url: String,
    pub year: Option<i32>,
    pub rating: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    movie_id: Value,
    #[serde(default)]
    source: Option<WatchSource>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    poster_url: Option<String>,
    #[serde(default)]
    year: Value,
    #[serde(default)]
    rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<RawItem>,
}

fn id_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl From<RawItem> for WatchlistItem {
    fn from(raw: RawItem) -> Self {
        let id = id_string(&raw.movie_id);
        let source = raw.source.unwrap_or_else(|| WatchSource::infer(&id));
        let year = match &raw.year {
            Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Self {
            id,
            source,
            title: raw.title.unwrap_or_default(),
            poster_url: raw.poster_url.unwrap_or_default(),
            year,
            rating: raw.rating.unwrap_or(0.0),
        }
    }
}

/// A movie to put on a watchlist, from either catalog.
#[derive(Debug, Clone, Default)]
pub struct WatchEntry {
    pub movie_id: String,
    pub source: Option<WatchSource>,
    pub title: String,
    pub poster_url: String,
    pub year: Option<i32>,
    pub rating: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryPayload<'a> {
    profile_id: &'a str,
    movie_id: String,
    source: WatchSource,
    title: &'a str,
    poster_url: &'a str,
    year: Option<i32>,
    rating: Option<f64>,
}

impl WatchEntry {
    fn payload<'a>(&'a self, profile_id: &'a str) -> Result<EntryPayload<'a>> {
        let movie_id = self.movie_id.trim().to_string();
        if movie_id.is_empty() {
            return Err(GatewayError::InvalidRequest("movieId is required".to_string()));
        }
        let source = self.source.unwrap_or_else(|| WatchSource::infer(&movie_id));
        Ok(EntryPayload {
            profile_id,
            movie_id,
            source,
            title: &self.title,
            poster_url: &self.poster_url,
            year: self.year,
            rating: self.rating,
        })
    }
}

pub fn contains(items: &[WatchlistItem], movie_id: &str, source: WatchSource) -> bool {
    let movie_id = movie_id.trim();
    items.iter().any(|m| m.id == movie_id && m.source == source)
}

fn require_profile(profile_id: &str) -> Result<()> {
    if profile_id.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("select a profile first".to_string()));
    }
    Ok(())
}

/// Per-profile watchlist. Every mutation answers with the full list.
#[derive(Clone)]
pub struct WatchlistClient {
    gateway: Gateway,
}

impl WatchlistClient {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    async fn items(&self, req: ApiRequest) -> Result<Vec<WatchlistItem>> {
        let resp: ItemsResponse = self.gateway.send_json(req).await?;
        Ok(resp.items.into_iter().map(WatchlistItem::from).collect())
    }

    pub async fn list(&self, profile_id: &str) -> Result<Vec<WatchlistItem>> {
        require_profile(profile_id)?;
        self.items(ApiRequest::get("/watchlist").query("profileId", profile_id))
            .await
    }

    /// Add the movie if absent, remove it if present.
    pub async fn toggle(&self, profile_id: &str, entry: &WatchEntry) -> Result<Vec<WatchlistItem>> {
        require_profile(profile_id)?;
        let req = ApiRequest::post("/watchlist").json(&entry.payload(profile_id)?)?;
        self.items(req).await
    }

    pub async fn add(&self, profile_id: &str, entry: &WatchEntry) -> Result<Vec<WatchlistItem>> {
        require_profile(profile_id)?;
        let req = ApiRequest::post("/watchlist")
            .query("mode", "add")
            .json(&entry.payload(profile_id)?)?;
        self.items(req).await
    }

    pub async fn remove(
        &self,
        profile_id: &str,
        movie_id: &str,
        source: Option<WatchSource>,
    ) -> Result<Vec<WatchlistItem>> {
        require_profile(profile_id)?;
        let movie_id = movie_id.trim();
        if movie_id.is_empty() {
            return Err(GatewayError::InvalidRequest("movieId is required".to_string()));
        }
        let req = ApiRequest::delete(format!("/watchlist/{}", urlencoding::encode(movie_id)))
            .query("profileId", profile_id)
            .query_opt("source", source.map(|s| s.as_str()));
        self.items(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infer_source_from_id_shape() {
        assert_eq!(WatchSource::infer("603"), WatchSource::Tmdb);
        assert_eq!(WatchSource::infer("65a1f0c2e4b0"), WatchSource::Local);
        assert_eq!(WatchSource::infer(""), WatchSource::Local);
    }

    #[test]
    fn raw_items_are_normalized() {
        let resp: ItemsResponse = serde_json::from_value(json!({
            "items": [
                {"movieId": 603, "title": "The Matrix", "year": 1999, "rating": 8.2},
                {"movieId": "65a1f0c2", "source": "local", "year": ""},
                {"movieId": "77", "source": "local", "year": "2001"},
                {"movieId": "78", "year": 4294969297i64}
            ]
        }))
        .unwrap();
        let items: Vec<WatchlistItem> = resp.items.into_iter().map(Into::into).collect();

        assert_eq!(items[0].id, "603");
        assert_eq!(items[0].source, WatchSource::Tmdb);
        assert_eq!(items[0].year, Some(1999));
        assert_eq!(items[1].source, WatchSource::Local);
        assert_eq!(items[1].year, None);
        assert_eq!(items[1].rating, 0.0);
        assert_eq!(items[2].source, WatchSource::Local);
        assert_eq!(items[2].year, Some(2001));
        assert_eq!(items[3].year, None);

        assert!(contains(&items, "603", WatchSource::Tmdb));
        assert!(!contains(&items, "603", WatchSource::Local));
    }

    #[test]
    fn payload_requires_movie_id() {
        let entry = WatchEntry {
            movie_id: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(entry.payload("p1"), Err(GatewayError::InvalidRequest(_))));

        let entry = WatchEntry {
            movie_id: " 603 ".into(),
            title: "The Matrix".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(entry.payload("p1").unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "profileId": "p1",
                "movieId": "603",
                "source": "tmdb",
                "title": "The Matrix",
                "posterUrl": "",
                "year": null,
                "rating": null
            })
        );
    }
}
