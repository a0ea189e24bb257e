//! # HTTP Control Surface
//!
//! JSON endpoints over the session and job controller, for a browser UI or
//! scripts.
//!
//! ## Usage
//!
//! ```bash
//! vinci serve --listen 0.0.0.0:8080 --engine-dir ./cura-engine
//! ```
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/api/ports` | list serial ports |
//! | POST | `/api/connect` | connect `{"port": "..."}` |
//! | POST | `/api/disconnect` | disconnect |
//! | GET | `/api/status` | snapshot, session state, job progress |
//! | POST | `/api/control/:action` | home, load, unload, pause, resume, cancel |
//! | POST | `/api/print` | multipart upload + print |
//! | GET | `/api/job` | job progress |

mod handlers;
mod state;

pub use state::{JobStatus, ServerConfig};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::VinciError;
use state::AppState;

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Build the router. Split from [`serve`] so it can be driven without a socket.
pub fn router(config: ServerConfig) -> Router {
    routes(Arc::new(AppState::new(config)))
}

fn routes(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ports", get(handlers::printer::ports))
        .route("/api/connect", post(handlers::printer::connect))
        .route("/api/disconnect", post(handlers::printer::disconnect))
        .route("/api/status", get(handlers::printer::status))
        .route("/api/control/:action", post(handlers::printer::control))
        .route(
            "/api/print",
            post(handlers::job::print).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/job", get(handlers::job::status))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the HTTP server.
///
/// ## Example
///
/// ```no_run
/// use vinci::config::{SessionConfig, SlicerConfig};
/// use vinci::server::{serve, ServerConfig};
///
/// # async fn example() -> Result<(), vinci::error::VinciError> {
/// let config = ServerConfig {
///     listen_addr: "0.0.0.0:8080".to_string(),
///     upload_dir: "uploads".into(),
///     session: SessionConfig::default(),
///     slicer: SlicerConfig::default(),
/// };
///
/// serve(config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn serve(config: ServerConfig) -> Result<(), VinciError> {
    let listen_addr = config.listen_addr.clone();
    info!(
        listen = %listen_addr,
        upload_dir = %config.upload_dir.display(),
        engine_dir = %config.slicer.engine_dir.display(),
        "vinci HTTP server starting"
    );
    let app = router(config);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("open http://{listen_addr}/api/status to check the printer");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, SlicerConfig};
    use crate::session::Session;
    use crate::transport::SimulatedPrinter;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn config() -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            upload_dir: std::env::temp_dir(),
            session: SessionConfig::default(),
            slicer: SlicerConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_status_without_printer() {
        let response = router(config())
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_control_without_printer_conflicts() {
        let response = router(config())
            .oneshot(
                Request::post("/api/control/home")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_print_while_job_active_stores_nothing() {
        let upload_dir = std::env::temp_dir().join(format!("vinci-busy-{}", uuid::Uuid::new_v4()));
        let state = Arc::new(AppState::new(ServerConfig {
            upload_dir: upload_dir.clone(),
            ..config()
        }));
        let (printer, _handle) = SimulatedPrinter::with_model("dv1MX0A000");
        let session = Session::open(Box::new(printer), SessionConfig::default()).unwrap();
        *state.session.write().await = Some(Arc::new(session));
        assert!(state.begin_job("first.gcode").is_some());

        let boundary = "vinci-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"first.gcode\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             G28\n\r\n\
             --{boundary}--\r\n"
        );
        let response = routes(state.clone())
            .oneshot(
                Request::post("/api/print")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(!upload_dir.exists());
        assert!(state.job().active);
        assert_eq!(state.job().filename.as_deref(), Some("first.gcode"));
    }
}
