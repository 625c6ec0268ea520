use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use wayfare_core::engine::{self, Dashboard, TripFilter};
use wayfare_core::insights::{self, FilterOptions};
use wayfare_core::models::{
    EnrichedTrip, Meal, NewMeal, NewTrip, Trip, UpdateMeal, UpdateTrip,
};
use wayfare_core::{Error, Session, csv_io};

use crate::config::Config;
use crate::store;

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
struct AppState {
    session: Arc<Mutex<Session>>,
    config: Arc<Config>,
}

impl AppState {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Write both tables back to the data directory. Callers hold the session
    /// lock so concurrent edits cannot interleave with the write.
    fn persist(&self, session: &Session) -> Result<(), ApiError> {
        store::save(&self.config, session).map_err(ApiError::from)
    }
}

// --- Request / Response types ---

/// Dashboard filters as query parameters. Lists are comma-separated; an absent
/// parameter selects everything, a present but empty one selects nothing.
#[derive(Deserialize, Default)]
struct FilterQuery {
    countries: Option<String>,
    years: Option<String>,
    q: Option<String>,
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty())
}

impl FilterQuery {
    fn to_filter(&self) -> Result<TripFilter, ApiError> {
        let years = self
            .years
            .as_deref()
            .map(|s| {
                split_list(s)
                    .map(|y| {
                        y.parse::<i32>()
                            .map_err(|_| ApiError::BadRequest(format!("Invalid year '{y}'")))
                    })
                    .collect::<Result<BTreeSet<i32>, ApiError>>()
            })
            .transpose()?;
        Ok(TripFilter {
            countries: self
                .countries
                .as_deref()
                .map(|s| split_list(s).map(str::to_string).collect()),
            years,
            search: self.q.clone(),
        })
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    top: Option<usize>,
}

#[derive(Deserialize)]
struct MealListQuery {
    trip_id: Option<i64>,
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ApiError> {
    csv_io::parse_date(value).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid {field} '{value}'. Use YYYY-MM-DD"))
    })
}

#[derive(Deserialize)]
struct CreateTripRequest {
    trip_name: String,
    primary_city: String,
    country: String,
    start_date: String,
    end_date: String,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    transportation_cost_usd: f64,
    #[serde(default)]
    accommodation_cost_usd: f64,
    #[serde(default)]
    activities_cost_usd: f64,
    #[serde(default)]
    food_cost_usd: f64,
    internet_speed_mbps: Option<f64>,
}

impl CreateTripRequest {
    fn into_new(self) -> Result<NewTrip, ApiError> {
        Ok(NewTrip {
            start_date: parse_date("start_date", &self.start_date)?,
            end_date: parse_date("end_date", &self.end_date)?,
            trip_name: self.trip_name,
            primary_city: self.primary_city,
            country: self.country,
            lat: self.lat,
            lon: self.lon,
            total_cost_usd: self.total_cost_usd,
            transportation_cost_usd: self.transportation_cost_usd,
            accommodation_cost_usd: self.accommodation_cost_usd,
            activities_cost_usd: self.activities_cost_usd,
            food_cost_usd: self.food_cost_usd,
            internet_speed_mbps: self.internet_speed_mbps,
        })
    }
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Partial trip edit. For the optional amounts, an explicit `null` clears the
/// value and an absent key leaves it alone.
#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateTripRequest {
    trip_name: Option<String>,
    primary_city: Option<String>,
    country: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_some")]
    total_cost_usd: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    transportation_cost_usd: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    accommodation_cost_usd: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    activities_cost_usd: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    food_cost_usd: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    internet_speed_mbps: Option<Option<f64>>,
}

impl UpdateTripRequest {
    fn into_update(self) -> Result<UpdateTrip, ApiError> {
        Ok(UpdateTrip {
            start_date: self
                .start_date
                .as_deref()
                .map(|d| parse_date("start_date", d))
                .transpose()?,
            end_date: self
                .end_date
                .as_deref()
                .map(|d| parse_date("end_date", d))
                .transpose()?,
            trip_name: self.trip_name,
            primary_city: self.primary_city,
            country: self.country,
            lat: self.lat,
            lon: self.lon,
            total_cost_usd: self.total_cost_usd,
            transportation_cost_usd: self.transportation_cost_usd,
            accommodation_cost_usd: self.accommodation_cost_usd,
            activities_cost_usd: self.activities_cost_usd,
            food_cost_usd: self.food_cost_usd,
            internet_speed_mbps: self.internet_speed_mbps,
        })
    }
}

#[derive(Deserialize)]
struct SpeedRequest {
    internet_speed_mbps: Option<f64>,
}

#[derive(Deserialize)]
struct CreateMealRequest {
    trip_id: i64,
    date: String,
    cuisine: String,
    #[serde(default)]
    restaurant: String,
    #[serde(default)]
    dish_name: String,
    rating_1_10: u8,
    cost_usd: f64,
}

#[derive(Deserialize)]
struct UpdateMealRequest {
    trip_id: Option<i64>,
    date: Option<String>,
    cuisine: Option<String>,
    restaurant: Option<String>,
    dish_name: Option<String>,
    rating_1_10: Option<u8>,
    cost_usd: Option<f64>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct DashboardResponse {
    #[serde(flatten)]
    dashboard: Dashboard,
    options: FilterOptions,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => {
                warn!(error = %msg, "rejected request");
                (StatusCode::BAD_REQUEST, msg)
            }
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            e if e.is_not_found() => Self::NotFound(e.to_string()),
            e @ (Error::Validation(_) | Error::Schema { .. } | Error::Csv(_)) => {
                Self::BadRequest(e.to_string())
            }
            e => Self::Internal(e.into()),
        }
    }
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Dashboard ---

async fn get_dashboard(
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let filter = params.to_filter()?;
    let enriched = state.session().enriched();
    Ok(Json(DashboardResponse {
        dashboard: engine::build_dashboard(&enriched, &filter),
        options: insights::filter_options(&enriched),
    }))
}

/// Snapshot of the visible trips plus the meal table, taken under one lock.
fn visible(
    state: &AppState,
    params: &FilterQuery,
) -> Result<(Vec<EnrichedTrip>, Vec<Meal>), ApiError> {
    let filter = params.to_filter()?;
    let session = state.session();
    Ok((filter.select(&session.enriched()), session.meals().to_vec()))
}

// --- Trips ---

async fn list_trips(
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
) -> Result<Json<Vec<EnrichedTrip>>, ApiError> {
    let (trips, _) = visible(&state, &params)?;
    Ok(Json(trips))
}

async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<EnrichedTrip>, ApiError> {
    let enriched = state.session().enriched();
    enriched
        .into_iter()
        .find(|t| t.trip.trip_id == id)
        .map(Json)
        .ok_or_else(|| Error::TripNotFound(id).into())
}

async fn create_trip(
    State(state): State<AppState>,
    Json(req): Json<CreateTripRequest>,
) -> Result<(StatusCode, Json<Trip>), ApiError> {
    let new = req.into_new()?;
    let mut session = state.session();
    let trip = session.add_trip(new)?;
    state.persist(&session)?;
    info!(trip_id = trip.trip_id, "created trip");
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn update_trip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTripRequest>,
) -> Result<Json<Trip>, ApiError> {
    let update = req.into_update()?;
    let mut session = state.session();
    let trip = session.update_trip(id, &update)?;
    state.persist(&session)?;
    Ok(Json(trip))
}

async fn set_speed(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SpeedRequest>,
) -> Result<Json<Trip>, ApiError> {
    let mut session = state.session();
    let trip = session.set_internet_speed(id, req.internet_speed_mbps)?;
    state.persist(&session)?;
    Ok(Json(trip))
}

async fn delete_trip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.session();
    session.delete_trip(id)?;
    state.persist(&session)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_trips(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.session();
    let removed = session.clear_trips();
    state.persist(&session)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

// --- Meals ---

async fn list_meals(
    State(state): State<AppState>,
    Query(params): Query<MealListQuery>,
) -> Result<Json<Vec<Meal>>, ApiError> {
    let session = state.session();
    if let Some(id) = params.trip_id {
        session.trip(id)?;
    }
    let meals = session
        .meals()
        .iter()
        .filter(|m| params.trip_id.is_none() || m.trip_id == params.trip_id)
        .cloned()
        .collect();
    Ok(Json(meals))
}

async fn create_meal(
    State(state): State<AppState>,
    Json(req): Json<CreateMealRequest>,
) -> Result<(StatusCode, Json<Meal>), ApiError> {
    let new = NewMeal {
        trip_id: req.trip_id,
        date: parse_date("date", &req.date)?,
        cuisine: req.cuisine,
        restaurant: req.restaurant,
        dish_name: req.dish_name,
        rating_1_10: req.rating_1_10,
        cost_usd: req.cost_usd,
    };
    let mut session = state.session();
    let meal = session.add_meal(new)?;
    state.persist(&session)?;
    Ok((StatusCode::CREATED, Json(meal)))
}

async fn update_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMealRequest>,
) -> Result<Json<Meal>, ApiError> {
    let update = UpdateMeal {
        trip_id: req.trip_id,
        date: req
            .date
            .as_deref()
            .map(|d| parse_date("date", d))
            .transpose()?,
        cuisine: req.cuisine,
        restaurant: req.restaurant,
        dish_name: req.dish_name,
        rating_1_10: req.rating_1_10,
        cost_usd: req.cost_usd,
    };
    let mut session = state.session();
    let meal = session.update_meal(id, &update)?;
    state.persist(&session)?;
    Ok(Json(meal))
}

async fn delete_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.session();
    session.delete_meal(id)?;
    state.persist(&session)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_meals(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.session();
    let removed = session.clear_meals();
    state.persist(&session)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

// --- Import / export ---

async fn import_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.session();
    let rows = match table.as_str() {
        "trips" => session.load_trips_csv(body.as_bytes())?,
        "meals" => session.load_meals_csv(body.as_bytes())?,
        _ => return Err(ApiError::NotFound(format!("Unknown table '{table}'"))),
    };
    state.persist(&session)?;
    info!(table = %table, rows, "imported table");
    Ok(Json(serde_json::json!({ "table": table, "rows": rows })))
}

fn csv_response(name: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}.csv\""),
            ),
        ],
        body,
    )
        .into_response()
}

async fn export_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Response, ApiError> {
    let mut buf = Vec::new();
    {
        let session = state.session();
        match table.as_str() {
            "trips" => csv_io::write_trips_csv(&mut buf, session.trips())?,
            "meals" => csv_io::write_meals_csv(&mut buf, session.meals())?,
            "enriched" => csv_io::write_enriched_csv(&mut buf, &session.enriched())?,
            _ => return Err(ApiError::NotFound(format!("Unknown table '{table}'"))),
        }
    }
    Ok(csv_response(&table, buf))
}

async fn template_table(Path(table): Path<String>) -> Result<Response, ApiError> {
    let mut buf = Vec::new();
    match table.as_str() {
        "trips" => csv_io::write_trips_csv(&mut buf, &[csv_io::template_trip()])?,
        "meals" => csv_io::write_meals_csv(&mut buf, &[csv_io::template_meal()])?,
        _ => return Err(ApiError::NotFound(format!("Unknown table '{table}'"))),
    }
    Ok(csv_response(&format!("{table}_template"), buf))
}

// --- Insights ---

async fn insight_workability(
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
    Query(limit): Query<LimitQuery>,
) -> Result<Json<Vec<engine::RankedTrip>>, ApiError> {
    let (trips, _) = visible(&state, &params)?;
    Ok(Json(engine::rank_workability(
        &trips,
        limit.top.unwrap_or(5),
    )))
}

async fn insight_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
    Query(limit): Query<LimitQuery>,
) -> Result<Json<Vec<EnrichedTrip>>, ApiError> {
    let (trips, _) = visible(&state, &params)?;
    let mut board = insights::cost_per_day_leaderboard(&trips);
    if let Some(n) = limit.top {
        board.truncate(n);
    }
    Ok(Json(board))
}

async fn insight_spend(
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
    Query(limit): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (trips, _) = visible(&state, &params)?;
    let value = serde_json::json!({
        "breakdown": insights::spend_breakdown(&trips),
        "top_trips": insights::top_by_spend(&trips, limit.top.unwrap_or(10)),
    });
    Ok(Json(value))
}

async fn insight_connectivity(
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (trips, _) = visible(&state, &params)?;
    let value = serde_json::json!({
        "stats": insights::connectivity_stats(&trips),
        "by_country": insights::speed_by_country(&trips),
    });
    Ok(Json(value))
}

async fn insight_food(
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (trips, meals) = visible(&state, &params)?;
    let value = serde_json::json!({
        "best_trip": insights::best_food_trip(&trips, &meals),
        "cuisines": insights::cuisine_ratings(&trips, &meals),
        "trips": insights::trip_ratings(&trips, &meals),
        "meals": insights::meal_log(&trips, &meals),
    });
    Ok(Json(value))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/dashboard", get(get_dashboard))
        .route(
            "/api/trips",
            get(list_trips).post(create_trip).delete(clear_trips),
        )
        .route(
            "/api/trips/{id}",
            get(get_trip).put(update_trip).delete(delete_trip),
        )
        .route("/api/trips/{id}/speed", put(set_speed))
        .route(
            "/api/meals",
            get(list_meals).post(create_meal).delete(clear_meals),
        )
        .route("/api/meals/{id}", put(update_meal).delete(delete_meal))
        .route("/api/import/{table}", post(import_table))
        .route("/api/export/{table}", get(export_table))
        .route("/api/template/{table}", get(template_table))
        .route("/api/insights/workability", get(insight_workability))
        .route("/api/insights/leaderboard", get(insight_leaderboard))
        .route("/api/insights/spend", get(insight_spend))
        .route("/api/insights/connectivity", get(insight_connectivity))
        .route("/api/insights/food", get(insight_food))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

/// Serve `session` over HTTP. Every successful edit is written back to the
/// data directory of `config`, the same files the CLI commands use.
pub async fn start_server(
    config: Config,
    session: Session,
    port: u16,
    bind: &str,
) -> anyhow::Result<()> {
    info!(
        trips = session.trips().len(),
        meals = session.meals().len(),
        dir = %config.data_dir.display(),
        "seeded session"
    );
    let state = AppState {
        session: Arc::new(Mutex::new(session)),
        config: Arc::new(config),
    };
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!(
            "Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const TRIPS: &str = "\
trip_id,trip_name,start_date,end_date,primary_city,country,total_cost_usd,internet_speed_mbps
1,Tokyo Spring Break,2023-03-15,2023-03-22,Tokyo,Japan,2000,20
2,Lisbon Remote Month,2024-02-01,2024-03-01,Lisbon,Portugal,2900,80
";

    const MEALS: &str = "\
meal_id,trip_id,date,cuisine,rating_1_10,cost_usd
1,1,2023-03-16,Japanese,9,12
2,1,2023-03-17,Japanese,8,18
";

    /// State over the fixture tables, persisting into a fresh temp dir that
    /// lives as long as the returned guard.
    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        session.load_trips_csv(TRIPS.as_bytes()).unwrap();
        session.load_meals_csv(MEALS.as_bytes()).unwrap();
        let state = AppState {
            session: Arc::new(Mutex::new(session)),
            config: Arc::new(Config::load(Some(dir.path().to_path_buf())).unwrap()),
        };
        (state, dir)
    }

    fn test_app() -> (Router, tempfile::TempDir) {
        let (state, dir) = test_state();
        (build_router(state), dir)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn json_request(
        method: &str,
        uri: &str,
        body: &serde_json::Value,
    ) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn security_headers_present() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/dashboard"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn security_headers_on_not_found() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/trips/99"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        let json = body_json(response).await;
        assert_eq!(json["error"], "Trip 99 not found");
    }

    #[tokio::test]
    async fn dashboard_unfiltered() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/dashboard"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["trips"].as_array().unwrap().len(), 2);
        assert_eq!(json["summary"]["trip_count"], 2);
        assert_eq!(json["trips"][0]["days"], 7);
        assert_eq!(json["trips"][0]["cost_per_day"], 285.71);
        assert_eq!(json["trips"][0]["food_cost_final"], 30.0);
        assert_eq!(json["options"]["countries"][1], "Portugal");
        // Lisbon is both faster and cheaper per day.
        assert_eq!(json["trips"][1]["workability_score"], 100.0);
    }

    #[tokio::test]
    async fn dashboard_filtered_rescores_against_selection() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/dashboard?countries=Japan&years=2023"))
            .await
            .unwrap();
        let json = body_json(response).await;
        let trips = json["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0]["trip_name"], "Tokyo Spring Break");
        assert_eq!(trips[0]["workability_score"], 100.0);
        // Options always cover the full table.
        assert_eq!(json["options"]["countries"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dashboard_empty_selection() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/dashboard?countries="))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["summary"]["trip_count"], 0);
        assert!(json["summary"]["median_cost_per_day"].is_null());
        assert!(json["summary"]["avg_internet_speed_mbps"].is_null());
    }

    #[tokio::test]
    async fn dashboard_bad_year_is_400() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/dashboard?years=twenty"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid year 'twenty'");
    }

    #[tokio::test]
    async fn create_trip_then_list() {
        let (state, _dir) = test_state();
        let body = serde_json::json!({
            "trip_name": "Mexico City Week",
            "primary_city": "Mexico City",
            "country": "Mexico",
            "start_date": "2024-11-01",
            "end_date": "2024-11-08",
            "total_cost_usd": 1400.0,
        });
        let response = build_router(state.clone())
            .oneshot(json_request("POST", "/api/trips", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["trip_id"], 3);

        let response = build_router(state)
            .oneshot(get_request("/api/trips?q=mexico"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["cost_per_day"], 200.0);
    }

    #[tokio::test]
    async fn create_trip_is_written_to_data_dir() {
        let (state, _dir) = test_state();
        let body = serde_json::json!({
            "trip_name": "Hanoi Food Week",
            "primary_city": "Hanoi",
            "country": "Vietnam",
            "start_date": "2024-04-01",
            "end_date": "2024-04-08",
            "total_cost_usd": 700.0,
        });
        let response = build_router(state.clone())
            .oneshot(json_request("POST", "/api/trips", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let reloaded = store::load(&state.config).unwrap();
        assert_eq!(reloaded.trips().len(), 3);
        assert_eq!(reloaded.trip(3).unwrap().trip_name, "Hanoi Food Week");
        assert_eq!(reloaded.meals().len(), 2);
    }

    #[tokio::test]
    async fn delete_meal_is_written_to_data_dir() {
        let (state, _dir) = test_state();
        let response = build_router(state.clone())
            .oneshot(
                axum::http::Request::delete("/api/meals/2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let reloaded = store::load(&state.config).unwrap();
        assert_eq!(reloaded.meals().len(), 1);
        assert_eq!(reloaded.enriched()[0].food_cost_final, 12.0);
    }

    #[tokio::test]
    async fn rejected_edit_leaves_data_dir_untouched() {
        let (state, _dir) = test_state();
        let body = serde_json::json!({ "end_date": "2020-01-01" });
        let response = build_router(state.clone())
            .oneshot(json_request("PUT", "/api/trips/1", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!state.config.trips_path().exists());
    }

    #[tokio::test]
    async fn create_trip_inverted_dates_is_400() {
        let body = serde_json::json!({
            "trip_name": "Backwards",
            "primary_city": "Lima",
            "country": "Peru",
            "start_date": "2024-05-10",
            "end_date": "2024-05-01",
        });
        let (state, _dir) = test_state();
        let response = build_router(state.clone())
            .oneshot(json_request("POST", "/api/trips", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.session().trips().len(), 2);
    }

    #[tokio::test]
    async fn update_trip_clears_speed_with_null() {
        let (state, _dir) = test_state();
        let body = serde_json::json!({ "internet_speed_mbps": null });
        let response = build_router(state.clone())
            .oneshot(json_request("PUT", "/api/trips/1", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.session().trip(1).unwrap().internet_speed_mbps, None);
    }

    #[tokio::test]
    async fn update_trip_empty_body_is_400() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(json_request("PUT", "/api/trips/1", &serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "No fields to update");
    }

    #[tokio::test]
    async fn update_missing_trip_is_404() {
        let body = serde_json::json!({ "country": "Spain" });
        let (app, _dir) = test_app();
        let response = app
            .oneshot(json_request("PUT", "/api/trips/42", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn set_speed_endpoint() {
        let body = serde_json::json!({ "internet_speed_mbps": 150.0 });
        let (app, _dir) = test_app();
        let response = app
            .oneshot(json_request("PUT", "/api/trips/1/speed", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["internet_speed_mbps"], 150.0);
    }

    #[tokio::test]
    async fn delete_trip_orphans_meals() {
        let (state, _dir) = test_state();
        let response = build_router(state.clone())
            .oneshot(
                axum::http::Request::delete("/api/trips/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let session = state.session();
        assert_eq!(session.trips().len(), 1);
        assert_eq!(session.meals().len(), 2);
    }

    #[tokio::test]
    async fn create_meal_updates_food_cost() {
        let (state, _dir) = test_state();
        let body = serde_json::json!({
            "trip_id": 2,
            "date": "2024-02-03",
            "cuisine": "Portuguese",
            "dish_name": "Bacalhau",
            "rating_1_10": 8,
            "cost_usd": 22.0,
        });
        let response = build_router(state.clone())
            .oneshot(json_request("POST", "/api/meals", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["meal_id"], 3);
        assert_eq!(state.session().enriched()[1].food_cost_final, 22.0);
    }

    #[tokio::test]
    async fn create_meal_for_missing_trip_is_404() {
        let body = serde_json::json!({
            "trip_id": 9,
            "date": "2024-02-03",
            "cuisine": "Portuguese",
            "rating_1_10": 8,
            "cost_usd": 22.0,
        });
        let (app, _dir) = test_app();
        let response = app
            .oneshot(json_request("POST", "/api/meals", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_meal_bad_rating_is_400() {
        let body = serde_json::json!({
            "trip_id": 1,
            "date": "2023-03-18",
            "cuisine": "Japanese",
            "rating_1_10": 11,
            "cost_usd": 5.0,
        });
        let (app, _dir) = test_app();
        let response = app
            .oneshot(json_request("POST", "/api/meals", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_meals_for_trip() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/meals?trip_id=1"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn import_schema_error_keeps_table() {
        let (state, _dir) = test_state();
        let response = build_router(state.clone())
            .oneshot(
                axum::http::Request::post("/api/import/meals")
                    .header("content-type", "text/csv")
                    .body(Body::from("meal_id,trip_id\n1,1\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(
            json["error"],
            "meals table is missing required column 'cost_usd'"
        );
        assert_eq!(state.session().meals().len(), 2);
    }

    #[tokio::test]
    async fn import_replaces_table() {
        let (state, _dir) = test_state();
        let response = build_router(state.clone())
            .oneshot(
                axum::http::Request::post("/api/import/meals")
                    .header("content-type", "text/csv")
                    .body(Body::from("meal_id,trip_id,cost_usd\n,2,10\n,2,5\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["rows"], 2);
        let enriched = state.session().enriched();
        assert_eq!(enriched[0].food_cost_from_meals, None);
        assert_eq!(enriched[1].food_cost_final, 15.0);
        assert_eq!(store::load(&state.config).unwrap().meals().len(), 2);
    }

    #[tokio::test]
    async fn import_unknown_table_is_404() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(
                axum::http::Request::post("/api/import/hotels")
                    .body(Body::from("a,b\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn import_over_body_limit_is_413() {
        let body = vec![b'a'; BODY_LIMIT + 1];
        let (app, _dir) = test_app();
        let response = app
            .oneshot(
                axum::http::Request::post("/api/import/trips")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn export_enriched_csv() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/export/enriched"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/csv; charset=utf-8"
        );
        assert_eq!(
            response.headers().get("content-disposition").unwrap(),
            "attachment; filename=\"enriched.csv\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().ends_with(",year"));
        assert!(text.contains(",7,285.71,"));
    }

    #[tokio::test]
    async fn template_download() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/template/meals"))
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Ichiran"));
    }

    #[tokio::test]
    async fn insight_workability_top() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/insights/workability?top=1"))
            .await
            .unwrap();
        let json = body_json(response).await;
        let ranked = json.as_array().unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0]["trip_name"], "Lisbon Remote Month");
        assert_eq!(ranked[0]["score"], 100.0);
    }

    #[tokio::test]
    async fn insight_food() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/insights/food"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["best_trip"]["trip_name"], "Tokyo Spring Break");
        assert_eq!(json["cuisines"][0]["key"], "Japanese");
        assert_eq!(json["meals"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn insight_connectivity_without_speeds() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(get_request("/api/insights/connectivity?countries=Nowhere"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert!(json["stats"].is_null());
        assert_eq!(json["by_country"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn clear_meals_endpoint() {
        let (state, _dir) = test_state();
        let response = build_router(state.clone())
            .oneshot(
                axum::http::Request::delete("/api/meals")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["removed"], 2);
        assert!(state.session().meals().is_empty());
    }
}
