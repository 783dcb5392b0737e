use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Result;

use crate::routes;
use crate::state::AppState;

/// The host process: HTTP surface, `/events` WebSocket, local uploads
/// mount, and the background scheduler.
pub struct HostServer {
    state: AppState,
}

impl HostServer {
    pub fn new(state: AppState) -> Self {
        HostServer { state }
    }

    pub async fn start(&self) -> Result<()> {
        let state = self.state.clone();
        let host = state.config.host.clone();
        let port = state.config.port;

        // Local-fallback artifact URIs are served straight off disk.
        let uploads_dir = PathBuf::from(&state.config.data_dir).join("uploads");
        std::fs::create_dir_all(&uploads_dir)?;

        let scheduler = Arc::clone(&state.scheduler);
        let scheduler_handle = scheduler.spawn();

        tracing::info!("relay host listening on {host}:{port}");
        HttpServer::new(move || {
            App::new()
                .wrap(Logger::default())
                .wrap(Cors::permissive())
                .app_data(web::Data::new(state.clone()))
                .configure(routes::configure)
                .service(actix_files::Files::new("/uploads", uploads_dir.clone()))
        })
        .bind((host.as_str(), port))?
        .run()
        .await?;

        self.state.scheduler.shutdown_token().cancel();
        let _ = scheduler_handle.await;
        Ok(())
    }
}
