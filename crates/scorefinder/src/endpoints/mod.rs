use axum::Router;
use axum::routing::{get, post};
use scorefinder_service::metric;
use scorefinder_service::service::ScoreService;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod cache;
mod competitions;
mod error;
mod history;
mod metrics;
mod search;
mod suggestions;

pub use error::{ResponseContext, ResponseError};
use metrics::MetricsLayer;

use cache::invalidate;
use competitions::fetch_competitions;
use history::fetch_competition_history;
use search::fetch_data;
use suggestions::{fetch_competitors, fetch_judges, fetch_styles};

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: ScoreService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(TraceLayer::new_for_http())
        .layer(MetricsLayer);

    Router::new()
        .route("/fetchCompetitors", get(fetch_competitors))
        .route("/fetchCompetitions", get(fetch_competitions))
        .route("/fetchStyles", get(fetch_styles))
        .route("/fetchJudges", get(fetch_judges))
        .route("/fetchData", get(fetch_data))
        .route("/fetchCompetitionHistory", get(fetch_competition_history))
        .route("/cache/invalidate", post(invalidate))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
        // the browser app is served from another origin
        .layer(CorsLayer::permissive())
}
