use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app_state::SharedState;
use crate::handlers::{collections, config, duplicates, files, health, ingest, notes, routing_rules, statistics, versions};
use crate::middleware::ip_filter::ip_filter_middleware;
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::middleware::security_headers::security_headers_middleware;
use crate::middleware::size_limit::size_limit_middleware;

fn cors_layer(state: &SharedState) -> CorsLayer {
    let cfg = &state.config.cors;
    let origin = if cfg.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(parsed)
    };
    let mut layer = CorsLayer::new().allow_origin(origin).allow_methods(tower_http::cors::Any);
    if cfg.allow_credentials {
        layer = layer.allow_credentials(true);
    }
    layer
}

/// Builds the full route table (spec.md §6) wrapped in the middleware chain
/// from §4.8. Layers are applied innermost-first; the last `.layer()` call
/// becomes outermost, so panic recovery is added last to sit outside
/// everything else, matching the spec's stated order.
pub fn build(state: SharedState) -> Router {
    let max_body = state.config.max_request_bytes as usize;
    let cors = cors_layer(&state);

    let routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/api/config", get(config::public_config))
        .route("/ingest", post(ingest::ingest))
        .route("/ingest/media", post(ingest::ingest_media))
        .route("/ingest/json", post(ingest::ingest_json))
        .route("/files/search", get(files::search))
        .route("/files/metadata", get(files::metadata))
        .route("/files/metadata/batch", post(files::batch_metadata))
        .route("/files/download", get(files::download))
        .route("/files/stream", get(files::stream))
        .route("/files/rename", patch(files::rename))
        .route("/files/batch", delete(files::batch_delete))
        .route("/files/copy/batch", post(files::batch_copy))
        .route("/files/duplicates/scan", get(duplicates::scan).post(duplicates::scan))
        .route("/files/duplicates/verify", post(duplicates::verify))
        .route("/files/duplicates/merge", post(duplicates::merge))
        .route("/files/duplicates/statistics", get(duplicates::statistics))
        .route("/files/:hash", get(files::get_by_hash).delete(files::delete))
        .route("/files/:hash/move", patch(files::move_category))
        .route("/files/:hash/metadata", patch(files::edit_metadata))
        .route("/files/:hash/restore", post(files::restore))
        .route("/files/:hash/copy", post(files::copy))
        .route("/files/:id/versions", get(versions::list).post(versions::upload))
        .route("/files/:id/versions/current", get(versions::current))
        .route("/files/:id/versions/diff", get(versions::diff))
        .route(
            "/files/:id/versions/:version",
            get(versions::get).delete(versions::delete_version),
        )
        .route("/files/:id/revert", post(versions::revert))
        .route("/files/:id/notes", get(notes::list).post(notes::add).delete(notes::clear))
        .route(
            "/files/:id/notes/:index",
            patch(notes::replace).delete(notes::remove),
        )
        .route("/routing-rules", get(routing_rules::list).post(routing_rules::add).patch(routing_rules::update).delete(routing_rules::remove))
        .route("/routing-rules/suggest", get(routing_rules::suggest))
        .route("/collections", get(collections::list))
        .route("/collections/:category_type/stats", get(collections::stats))
        .route("/statistics", get(statistics::statistics));

    routes
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), size_limit_middleware))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(tower_http::set_header::SetResponseHeaderLayer::overriding(
            axum::http::header::HeaderName::from_static("x-powered-by"),
            axum::http::HeaderValue::from_static("rhinobox"),
        ))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(state.clone(), ip_filter_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CatchPanicLayer::new())
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}
