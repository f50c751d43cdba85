use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use patrimo_core::Clock;

use crate::cache::TtlCache;

pub const DEFAULT_GEO_BASE_URL: &str = "https://geo.api.gouv.fr";

const RESULT_LIMIT: &str = "10";
const FIELDS: &str = "code,codeRegion,codeDepartement,codesPostaux,centre,population,nom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoSettings {
    pub base_url: String,
    pub cache_ttl_hours: i64,
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEO_BASE_URL.to_string(),
            cache_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commune {
    pub name: String,
    pub insee_code: String,
    pub postal_codes: Vec<String>,
    pub department: String,
    pub region: String,
    pub lat: f64,
    pub lon: f64,
    pub population: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCommune {
    nom: String,
    code: String,
    #[serde(default)]
    codes_postaux: Vec<String>,
    #[serde(default)]
    code_departement: String,
    #[serde(default)]
    code_region: String,
    centre: Option<ApiPoint>,
    population: Option<u64>,
}

/// GeoJSON point: `[lon, lat]`.
#[derive(Debug, Deserialize)]
struct ApiPoint {
    coordinates: [f64; 2],
}

impl From<ApiCommune> for Commune {
    fn from(c: ApiCommune) -> Self {
        let [lon, lat] = c.centre.map(|p| p.coordinates).unwrap_or([0.0, 0.0]);
        Commune {
            name: c.nom,
            insee_code: c.code,
            postal_codes: c.codes_postaux,
            department: c.code_departement,
            region: c.code_region,
            lat,
            lon,
            population: c.population.unwrap_or(0),
        }
    }
}

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Empty commune query")]
    EmptyQuery,
    #[error("Commune directory unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),
}

fn is_postal_code(query: &str) -> bool {
    (2..=5).contains(&query.len()) && query.bytes().all(|b| b.is_ascii_digit())
}

/// Commune lookup by name or postal code against the public geo API,
/// cached per normalized query.
pub struct CommuneDirectory {
    client: reqwest::Client,
    base_url: String,
    cache: TtlCache<String, Vec<Commune>>,
}

impl CommuneDirectory {
    pub fn new(settings: &GeoSettings, clock: Arc<dyn Clock>) -> Self {
        Self::with_client(reqwest::Client::new(), settings, clock)
    }

    pub fn with_client(client: reqwest::Client, settings: &GeoSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            cache: TtlCache::new(Duration::hours(settings.cache_ttl_hours), clock),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Commune>, GeoError> {
        let key = query.trim().to_lowercase();
        if key.is_empty() {
            return Err(GeoError::EmptyQuery);
        }
        if let Some(hit) = self.cache.get(&key) {
            debug!(query = %key, "Commune cache hit");
            return Ok((*hit).clone());
        }

        let by = if is_postal_code(&key) { "codePostal" } else { "nom" };
        let response = self
            .client
            .get(format!("{}/communes", self.base_url))
            .query(&[
                ("limit", RESULT_LIMIT),
                ("fields", FIELDS),
                ("boost", "population"),
                (by, key.as_str()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                warn!(query = %key, error = %e, "Geo API request failed");
                e
            })?;

        let communes: Vec<ApiCommune> = response.json().await?;
        let communes: Vec<Commune> = communes.into_iter().map(Commune::from).collect();
        info!(query = %key, results = communes.len(), "Commune search");
        self.cache.insert(key, communes.clone());
        Ok(communes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, extract::State, http::StatusCode, routing::get, Json, Router};
    use chrono::NaiveDate;
    use patrimo_core::FixedClock;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// In-process stand-in for the geo API.
    struct MockGeoServer {
        addr: SocketAddr,
        hits: Arc<AtomicUsize>,
        last_query: Arc<Mutex<HashMap<String, String>>>,
        shutdown_tx: Option<oneshot::Sender<()>>,
    }

    #[derive(Clone)]
    struct MockState {
        hits: Arc<AtomicUsize>,
        last_query: Arc<Mutex<HashMap<String, String>>>,
        fail: bool,
    }

    async fn handle_communes(
        State(state): State<MockState>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Result<Json<Value>, StatusCode> {
        state.hits.fetch_add(1, Ordering::SeqCst);
        *state.last_query.lock().unwrap() = params;
        if state.fail {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        Ok(Json(json!([
            {
                "nom": "Lyon",
                "code": "69123",
                "codesPostaux": ["69001", "69002"],
                "codeDepartement": "69",
                "codeRegion": "84",
                "centre": {"type": "Point", "coordinates": [4.8351, 45.758]},
                "population": 522250
            },
            {
                "nom": "Lyons-la-Forêt",
                "code": "27377",
                "codesPostaux": ["27480"],
                "codeDepartement": "27",
                "codeRegion": "28"
            }
        ])))
    }

    impl MockGeoServer {
        async fn start(fail: bool) -> Self {
            let hits = Arc::new(AtomicUsize::new(0));
            let last_query = Arc::new(Mutex::new(HashMap::new()));
            let app = Router::new()
                .route("/communes", get(handle_communes))
                .with_state(MockState {
                    hits: hits.clone(),
                    last_query: last_query.clone(),
                    fail,
                });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        shutdown_rx.await.ok();
                    })
                    .await
                    .unwrap();
            });

            Self {
                addr,
                hits,
                last_query,
                shutdown_tx: Some(shutdown_tx),
            }
        }

        fn settings(&self) -> GeoSettings {
            GeoSettings {
                base_url: format!("http://{}/", self.addr),
                ..GeoSettings::default()
            }
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn last_param(&self, name: &str) -> Option<String> {
            self.last_query.lock().unwrap().get(name).cloned()
        }
    }

    impl Drop for MockGeoServer {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::at_date(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()))
    }

    #[tokio::test]
    async fn search_by_name_maps_results() {
        let server = MockGeoServer::start(false).await;
        let directory = CommuneDirectory::new(&server.settings(), clock());

        let communes = directory.search("  Lyon ").await.unwrap();

        assert_eq!(communes.len(), 2);
        assert_eq!(communes[0].insee_code, "69123");
        assert_eq!(communes[0].lat, 45.758);
        assert_eq!(communes[0].lon, 4.8351);
        assert_eq!(communes[0].postal_codes, vec!["69001", "69002"]);
        assert_eq!(communes[1].lat, 0.0);
        assert_eq!(communes[1].population, 0);
        assert_eq!(server.last_param("nom").as_deref(), Some("lyon"));
        assert_eq!(server.last_param("limit").as_deref(), Some("10"));
        assert_eq!(server.last_param("boost").as_deref(), Some("population"));
    }

    #[tokio::test]
    async fn digits_search_by_postal_code() {
        let server = MockGeoServer::start(false).await;
        let directory = CommuneDirectory::new(&server.settings(), clock());

        directory.search("69001").await.unwrap();

        assert_eq!(server.last_param("codePostal").as_deref(), Some("69001"));
        assert_eq!(server.last_param("nom"), None);
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache_for_a_day() {
        let server = MockGeoServer::start(false).await;
        let clock = clock();
        let directory = CommuneDirectory::new(&server.settings(), clock.clone());

        directory.search("Lyon").await.unwrap();
        directory.search("lyon ").await.unwrap();
        assert_eq!(server.hits(), 1);

        clock.advance(Duration::hours(24));
        directory.search("lyon").await.unwrap();
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn upstream_error_is_unavailable_and_not_cached() {
        let server = MockGeoServer::start(true).await;
        let directory = CommuneDirectory::new(&server.settings(), clock());

        let err = directory.search("lyon").await.unwrap_err();
        assert!(matches!(err, GeoError::Unavailable(_)));
        assert!(directory.search("lyon").await.is_err());
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn blank_query_is_rejected_locally() {
        let directory = CommuneDirectory::new(&GeoSettings::default(), clock());
        assert!(matches!(directory.search("   ").await, Err(GeoError::EmptyQuery)));
    }

    #[test]
    fn postal_code_detection() {
        assert!(is_postal_code("69"));
        assert!(is_postal_code("69001"));
        assert!(!is_postal_code("6"));
        assert!(!is_postal_code("690010"));
        assert!(!is_postal_code("69a"));
    }
}
