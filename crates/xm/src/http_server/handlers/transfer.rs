use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use common::crypto::CHUNK_SIZE;
use common::handshake::{CLIENT_KEY_FIELD, SERVER_KEY_FIELD};
use common::transfer::{TransferError, TransferService, TransferStatus};

pub async fn root_handler(
    State(service): State<TransferService>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, TransferHandlerError> {
    transfer(service, method, headers, "/").await
}

pub async fn handler(
    State(service): State<TransferService>,
    method: Method,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Response, TransferHandlerError> {
    transfer(service, method, headers, &path).await
}

async fn transfer(
    service: TransferService,
    method: Method,
    headers: HeaderMap,
    path: &str,
) -> Result<Response, TransferHandlerError> {
    if method != Method::POST {
        return Err(TransferHandlerError::Method(method));
    }

    let client_key = headers
        .get(CLIENT_KEY_FIELD)
        .and_then(|value| value.to_str().ok());
    let mut ctx = service.handshake(client_key)?;
    let resource = service.resolve(&mut ctx, path).await?;

    let server_key = ctx
        .key_field()
        .map(str::to_owned)
        .ok_or(TransferError::InvalidState(ctx.state()))?;
    let content_length = service
        .codec()
        .config()
        .encoded_len(resource.size())
        .ok_or(TransferHandlerError::Oversized(resource.size()))?;

    // the frame is produced on a separate task and served from the read half
    let (mut writer, reader) = tokio::io::duplex(CHUNK_SIZE);
    let peer = ctx.peer();
    tokio::spawn(async move {
        if let Err(e) = service.stream(ctx, resource, &mut writer).await {
            tracing::error!(key = %peer, error = %e, "transfer aborted");
        }
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(SERVER_KEY_FIELD, server_key)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, content_length)
        .body(Body::from_stream(ReaderStream::with_capacity(
            reader, CHUNK_SIZE,
        )))?;
    Ok(response)
}

fn status_code(status: TransferStatus) -> StatusCode {
    match status {
        TransferStatus::NoContent => StatusCode::NO_CONTENT,
        TransferStatus::BadRequest => StatusCode::BAD_REQUEST,
        TransferStatus::Unauthorized => StatusCode::UNAUTHORIZED,
        TransferStatus::NotFound => StatusCode::NOT_FOUND,
        TransferStatus::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferHandlerError {
    #[error("method {0} is not a transfer request")]
    Method(Method),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("resource of {0} bytes does not fit a frame")]
    Oversized(u64),
    #[error("failed to build response: {0}")]
    Response(#[from] http::Error),
}

impl TransferHandlerError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransferHandlerError::Method(_) => StatusCode::BAD_REQUEST,
            TransferHandlerError::Transfer(e) => status_code(e.status()),
            TransferHandlerError::Oversized(_) | TransferHandlerError::Response(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for TransferHandlerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }

        if status.is_server_error() {
            tracing::error!(error = %self, "transfer failed");
        } else {
            tracing::debug!(error = %self, "transfer refused");
        }
        // failures never carry internal detail
        (status, status.canonical_reason().unwrap_or("error")).into_response()
    }
}
