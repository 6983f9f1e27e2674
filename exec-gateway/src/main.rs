// Copyright 2025 The runbox authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[macro_use]
extern crate log;

use actix_web::{middleware::Logger, web, App, HttpServer};
use commons::metrics::RegistryWrapper;
use commons::prelude_errors::*;
use exec_gateway::{config, jobs, metrics, sessions, status, AppState};

#[actix_web::main]
async fn main() -> Fallible<()> {
    let settings = config::AppSettings::assemble()?;

    env_logger::Builder::from_default_env()
        .filter(Some(module_path!()), settings.verbosity)
        .filter(Some("runbox"), settings.verbosity)
        .init();
    debug!("application settings:\n{:#?}", &settings);

    metrics::register_metrics(&status::PROM_REGISTRY)?;

    let service_addr = (settings.address, settings.port);
    let status_addr = (settings.status_address, settings.status_port);
    let prefix = settings.path_prefix.trim_matches('/').to_string();
    let jobs_path = route_path(&prefix, "v1/jobs");
    let ws_path = route_path(&prefix, "ws/execute");

    let state = web::Data::new(AppState::new(settings)?);

    // Status service.
    let registry = web::Data::new(RegistryWrapper(&status::PROM_REGISTRY));
    let status_state = state.clone();
    let status_server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(status_state.clone())
            .app_data(registry.clone())
            .route("/liveness", web::get().to(status::serve_liveness))
            .route("/metrics", web::get().to(status::serve_metrics))
            .route("/readiness", web::get().to(status::serve_readiness))
    })
    .bind(status_addr)?
    .run();

    // Main service.
    let main_state = state.clone();
    let main_server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(main_state.clone())
            .route(&jobs_path, web::post().to(jobs::create_job))
            .route(&ws_path, web::get().to(sessions::ws_execute))
    })
    .bind(service_addr)?
    .run();

    futures::future::try_join(main_server, status_server).await?;
    Ok(())
}

fn route_path(prefix: &str, suffix: &str) -> String {
    if prefix.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("/{}/{}", prefix, suffix)
    }
}
