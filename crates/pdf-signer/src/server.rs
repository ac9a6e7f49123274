pub mod request_id;
pub mod upload;

use std::any::Any;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{
        HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::ServiceConfig;
use crate::error::SigningServiceError;
use crate::events::{RequestId, SigningEvents, TracingEvents};
use crate::signing::{
    PdfSignerFactory, RetryingSigner, SignedDocument, SignerFactory, SigningContext,
};
use crate::validate::PDF_MEDIA_TYPE;
use crate::workspace::Workspace;

use self::request_id::assign_request_id;
use self::upload::SigningForm;

pub const HEALTH_PATH: &str = "/healthz";
pub const SIGN_PDF_PATH: &str = "/sign-pdf";
pub const SIGNED_FILENAME: &str = "signed.pdf";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub signers: Arc<dyn SignerFactory>,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_signers(config, Arc::new(PdfSignerFactory))
    }

    pub fn with_signers(config: ServiceConfig, signers: Arc<dyn SignerFactory>) -> Self {
        Self {
            config: Arc::new(config),
            signers,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_content_length;

    Router::new()
        .route(HEALTH_PATH, get(healthz))
        .route(SIGN_PDF_PATH, post(sign_pdf))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(assign_request_id))
        .with_state(state)
}

pub async fn run(host: String, port: u16, config: ServiceConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;

    tracing::info!(
        address = %listener.local_addr()?,
        tsa_url = %config.tsa_url,
        max_attempts = config.retry.max_attempts,
        "pdf signer listening"
    );

    axum::serve(listener, router(AppState::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("pdf signer stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn sign_pdf(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    form: Result<SigningForm, SigningServiceError>,
) -> Result<Response, SigningServiceError> {
    let events = TracingEvents::new(request_id);
    events.request_started(SIGN_PDF_PATH);

    let outcome = sign_upload(&state, form, &events).await;
    match &outcome {
        Err(error) if error.is_client_error() => events.request_rejected(&error.to_string()),
        // Exhaustion has already been reported by the retry loop.
        Err(SigningServiceError::SigningExhausted(_)) | Ok(_) => {}
        Err(error) => tracing::error!(%request_id, error = %error, "signing request failed"),
    }
    outcome
}

async fn sign_upload(
    state: &AppState,
    form: Result<SigningForm, SigningServiceError>,
    events: &dyn SigningEvents,
) -> Result<Response, SigningServiceError> {
    let config = &state.config;
    let request = form?.into_request()?;
    let context = SigningContext::build(&request.certificate, &request.passphrase, &config.tsa_url)?;

    let workspace = Workspace::create(&request.document)
        .await
        .context("creating the signing workspace")?;

    let signer = RetryingSigner::new(state.signers.signer(context), config.retry.clone());
    let signed = signer
        .sign(workspace.source_path(), workspace.signed_path(), events)
        .await?;

    Ok(deliver(workspace, &signed).await?)
}

/// Streams the signed document from the workspace; the workspace lives until
/// the body has been fully sent.
async fn deliver(workspace: Workspace, signed: &SignedDocument) -> Result<Response> {
    let file = tokio::fs::File::open(&signed.path)
        .await
        .context("opening the signed document")?;
    let length = signed.len;

    let stream = ReaderStream::new(file).map(move |chunk| {
        let _workspace = &workspace;
        chunk
    });

    let disposition = format!("attachment; filename=\"{SIGNED_FILENAME}\"");
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(PDF_MEDIA_TYPE)),
            (CONTENT_DISPOSITION, HeaderValue::from_str(&disposition)?),
            (CONTENT_LENGTH, HeaderValue::from(length)),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "handler panicked");

    SigningServiceError::Unexpected(anyhow!("internal server error")).into_response()
}
