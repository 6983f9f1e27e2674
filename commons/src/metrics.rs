//! Metrics service.

use crate::Fallible;
use actix_web::HttpResponse;
use prometheus::{self, Registry};

/// For types that store a static Registry reference
pub trait HasRegistry {
    /// Get the static registry reference
    fn registry(&self) -> &'static Registry;
}

/// Minimally wraps a Registry for implementing `HasRegistry`.
pub struct RegistryWrapper(pub &'static Registry);

impl HasRegistry for RegistryWrapper {
    fn registry(&self) -> &'static Registry {
        self.0
    }
}

/// Serve metrics requests (Prometheus textual format).
pub async fn serve<T>(app_data: actix_web::web::Data<T>) -> Fallible<HttpResponse>
where
    T: 'static + HasRegistry,
{
    use prometheus::Encoder;

    let metrics = app_data.registry().gather();
    let content = {
        let tenc = prometheus::TextEncoder::new();
        let mut buf = vec![];
        tenc.encode(&metrics, &mut buf).and(Ok(buf))?
    };

    Ok(HttpResponse::Ok().body(content))
}

/// Create a custom Prometheus registry.
pub fn new_registry(prefix: Option<String>) -> Fallible<Registry> {
    Registry::new_custom(prefix.clone(), None).map_err(|e| {
        anyhow::anyhow!(
            "could not create a custom registry with prefix {:?}: {}",
            prefix,
            e.to_string()
        )
    })
}
