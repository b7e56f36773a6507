use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::TryStreamExt;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{parse_size, ServerArgs, SizeParseError};
use crate::naming::normalize_extension;
use crate::retention::Sweeper;
use crate::{PING_ROUTE, UPLOAD_FIELD, UPLOAD_ROUTE};

/// Collector configuration, fixed at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub storage_dir: PathBuf,
    /// Retention cap in bytes
    pub max_size: u64,
    pub port: u16,
    /// Chunk extension subject to retention
    pub extension: String,
}

impl ServerConfig {
    pub fn from_args(args: &ServerArgs) -> Result<Self, SizeParseError> {
        Ok(Self {
            storage_dir: args.storage_dir.clone(),
            max_size: parse_size(&args.max_size)?,
            port: args.port,
            extension: normalize_extension(&args.file_ext).to_string(),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

#[derive(Clone)]
struct AppState {
    storage_dir: Arc<PathBuf>,
    sweeper: Arc<Sweeper>,
}

/// Routes of the collector: `GET /ping` and `POST /video-stream`
pub fn router(config: &ServerConfig) -> Router {
    let state = AppState {
        storage_dir: Arc::new(config.storage_dir.clone()),
        sweeper: Arc::new(Sweeper::new(
            config.storage_dir.clone(),
            config.max_size,
            &config.extension,
        )),
    };

    Router::new()
        .route(PING_ROUTE, get(ping))
        .route(UPLOAD_ROUTE, post(receive_chunk))
        // chunks are arbitrarily large media files
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> io::Result<()> {
    info!(
        "Listening on {} for storage-dir={}, max-size={}",
        listener.local_addr()?,
        config.storage_dir.display(),
        config.max_size
    );

    axum::serve(listener, router(config))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn ping() -> &'static str {
    info!("GET {}", PING_ROUTE);
    "pong"
}

async fn receive_chunk(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let span = info_span!("upload", request_id = %Uuid::new_v4());
    async move {
        info!("POST {}", UPLOAD_ROUTE);

        let stored = match multipart {
            Ok(multipart) => store_upload(&state.storage_dir, multipart).await,
            Err(rejection) => Err(ReceiveError::Malformed(rejection.body_text())),
        };

        let path = match stored {
            Ok(path) => path,
            Err(e) => {
                error!("Could not obtain file for upload: {}", e);
                return e.into_response();
            }
        };

        let sweeper = Arc::clone(&state.sweeper);
        match tokio::task::spawn_blocking(move || sweeper.sweep()).await {
            Ok(Ok(report)) => debug!(?report, "Sweep after {}", path.display()),
            Ok(Err(e)) => error!("Sweep failed: {}", e),
            Err(e) => error!("Sweep task failed: {}", e),
        }

        StatusCode::CREATED.into_response()
    }
    .instrument(span)
    .await
}

#[derive(Debug, thiserror::Error)]
enum ReceiveError {
    #[error("malformed multipart request: {0}")]
    Malformed(String),

    #[error("no '{}' field in request", UPLOAD_FIELD)]
    MissingField,

    #[error("'{}' field has no file name", UPLOAD_FIELD)]
    MissingFileName,

    #[error("file name {0:?} is not a plain file name")]
    UnsafeFileName(String),

    #[error("could not store {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IntoResponse for ReceiveError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self.to_string())).into_response()
    }
}

/// Find the upload field and stream it into the storage root
async fn store_upload(storage_dir: &Path, mut multipart: Multipart) -> Result<PathBuf, ReceiveError> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ReceiveError::Malformed(e.body_text()))?
            .ok_or(ReceiveError::MissingField)?;

        if field.name() != Some(UPLOAD_FIELD) {
            debug!("Skipping field {:?}", field.name());
            continue;
        }

        let file_name = field
            .file_name()
            .ok_or(ReceiveError::MissingFileName)?
            .to_string();
        let leaf = confined_file_name(&file_name)
            .ok_or_else(|| ReceiveError::UnsafeFileName(file_name.clone()))?;

        let path = storage_dir.join(leaf);
        info!("store data to {}", path.display());
        return match persist(field, &path).await {
            Ok(bytes) => {
                debug!("Stored {} bytes in {}", bytes, path.display());
                Ok(path)
            }
            Err(source) => Err(ReceiveError::Persist { path, source }),
        };
    }
}

async fn persist(field: Field<'_>, path: &Path) -> io::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let reader = StreamReader::new(field.map_err(io::Error::other));
    tokio::pin!(reader);

    match tokio::io::copy(&mut reader, &mut file).await {
        Ok(bytes) => {
            file.sync_all().await?;
            Ok(bytes)
        }
        Err(e) => {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(path).await {
                debug!("Could not remove partial {}: {}", path.display(), remove_err);
            }
            Err(e)
        }
    }
}

/// Accept only a single normal path component, so uploads stay inside the
/// storage root
fn confined_file_name(submitted: &str) -> Option<&str> {
    if submitted.is_empty() || submitted.contains(['/', '\\', '\0']) {
        return None;
    }
    let mut components = Path::new(submitted).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(submitted),
        _ => None,
    }
}
