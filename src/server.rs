use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::predictor::{PredictError, PriceService};
use crate::types::{
    BrandsOut, FuelTypesOut, ModelsOut, ScopedFuelTypesOut, TransmissionsOut, YearsOut,
};

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PriceService>,
}

impl AppState {
    pub fn new(service: PriceService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

// ---------- Errors ----------

impl PredictError {
    pub fn status(&self) -> StatusCode {
        match self {
            PredictError::NotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            PredictError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        if !self.is_client_error() {
            tracing::error!("{}", self);
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, PredictError>;

/// Path segments use `_` in place of spaces ("Land_Rover").
fn from_path(segment: &str) -> String {
    segment.replace('_', " ")
}

// ---------- Handlers ----------

pub async fn brands(State(state): State<AppState>) -> ApiResult<BrandsOut> {
    let a = state.service.loaded()?;
    Ok(Json(BrandsOut {
        brands: a.index.brands.clone(),
    }))
}

pub async fn models(
    State(state): State<AppState>,
    Path(brand): Path<String>,
) -> ApiResult<ModelsOut> {
    let a = state.service.loaded()?;
    let brand = from_path(&brand);
    Ok(Json(ModelsOut {
        models: a.index.models_for(&brand).to_vec(),
        brand,
    }))
}

pub async fn fuel_types(State(state): State<AppState>) -> ApiResult<FuelTypesOut> {
    let a = state.service.loaded()?;
    Ok(Json(FuelTypesOut {
        fuel_types: a.index.fuel_types.clone(),
    }))
}

pub async fn fuel_types_for_model(
    State(state): State<AppState>,
    Path((brand, model)): Path<(String, String)>,
) -> ApiResult<ScopedFuelTypesOut> {
    let a = state.service.loaded()?;
    let (brand, model) = (from_path(&brand), from_path(&model));
    Ok(Json(ScopedFuelTypesOut {
        fuel_types: a.index.fuel_types_for(&brand, &model).to_vec(),
        brand,
        model,
    }))
}

pub async fn transmissions(State(state): State<AppState>) -> ApiResult<TransmissionsOut> {
    let a = state.service.loaded()?;
    Ok(Json(TransmissionsOut {
        transmissions: a.index.transmissions.clone(),
    }))
}

pub async fn years(State(state): State<AppState>) -> ApiResult<YearsOut> {
    let a = state.service.loaded()?;
    Ok(Json(YearsOut {
        years: a.index.years.clone(),
        year_range: a.index.year_range,
    }))
}

// Raw bytes so that a malformed body gets the same {error} shape as other failures.
pub async fn predict(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return PredictError::MalformedBody(e.to_string()).into_response(),
    };
    match state.service.predict(&payload) {
        Ok(out) => Json(out).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn reload(State(state): State<AppState>) -> Response {
    match state.service.reload() {
        Ok(out) => {
            tracing::info!(
                "reloaded artifacts: {} brands, {} models",
                out.brands_count,
                out.models_count
            );
            Json(out).into_response()
        }
        Err(e) => {
            tracing::error!("reload failed, keeping previous artifacts: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": "Failed to reload dataset and models",
                    "detail": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    Json(state.service.health()).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/brands", get(brands))
        .route("/api/models/:brand", get(models))
        .route("/api/fuel-types", get(fuel_types))
        .route("/api/fuel-types/:brand/:model", get(fuel_types_for_model))
        .route("/api/transmissions", get(transmissions))
        .route("/api/years", get(years))
        .route("/predict", post(predict))
        .route("/api/reload", post(reload))
        .route("/health", get(health))
        // the browser frontend is served from another origin
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PredictError::MissingField("brand").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PredictError::YearOutOfRange {
                year: 1999,
                min: 2019,
                max: 2024
            }
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(PredictError::NotLoaded.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            PredictError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_path_underscores() {
        assert_eq!(from_path("Land_Rover"), "Land Rover");
        assert_eq!(from_path("Swift"), "Swift");
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed() {
        use axum::body::Body;
        use axum::http::{header, Method, Request};
        use tower::ServiceExt;

        let dir = tempfile::tempdir().unwrap();
        let app = router(AppState::new(PriceService::start(dir.path())));
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/predict")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_success(), "status {}", resp.status());
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_unloaded_service_answers() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(PriceService::start(dir.path()));

        let resp = health(State(state.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let err = brands(State(state.clone())).await.unwrap_err();
        assert!(matches!(err, PredictError::NotLoaded));

        let resp = predict(State(state), Bytes::from_static(b"{not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
