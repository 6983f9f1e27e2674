//! Status service.

use actix_web::{HttpResponse, Responder};
use commons::metrics::RegistryWrapper;
use runbox::store::JobStore;

/// Common prefix for gateway metrics.
static GATEWAY_METRICS_PREFIX: &str = "execgw";

lazy_static! {
    /// Metrics registry.
    pub static ref PROM_REGISTRY: prometheus::Registry =
        prometheus::Registry::new_custom(Some(GATEWAY_METRICS_PREFIX.to_string()), None)
            .expect("could not create metrics registry");
}

/// Expose metrics (Prometheus textual format).
pub async fn serve_metrics(
    app_data: actix_web::web::Data<RegistryWrapper>,
) -> impl Responder {
    match commons::metrics::serve(app_data).await {
        Ok(resp) => resp,
        Err(err) => {
            error!("could not serve metrics: {}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Expose liveness status.
///
/// Status:
///  * Live (200 code): the process is up and serving.
pub async fn serve_liveness() -> HttpResponse {
    HttpResponse::Ok().finish()
}

/// Expose readiness status.
///
/// Status:
///  * Ready (200 code): the store answers and the analyzers load.
///  * Not Ready (500 code): everything else.
pub async fn serve_readiness(
    app_data: actix_web::web::Data<crate::AppState>,
) -> HttpResponse {
    // A miss is fine; reachability is what is probed here.
    let store_answers = matches!(
        app_data.store.get("readiness-probe").await,
        Ok(_) | Err(runbox::store::StoreError::NotFound)
    );
    let analyzers_load =
        runbox::validate::validate_language(runbox::Language::Python, "pass").accepted;
    if store_answers && analyzers_load {
        HttpResponse::Ok().finish()
    } else {
        HttpResponse::InternalServerError().finish()
    }
}
