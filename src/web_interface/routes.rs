use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error};
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{Annotated, ApiError, BinView, NewBinResponse, SocketView};
use crate::error_handling::types::WebError;
use crate::identifier::BinId;
use crate::storage::storage_trait::BinStorage;

/// Builds the inspection view of `raw_id` as seen at `now`.
pub fn inspect_bin(storage: &dyn BinStorage, raw_id: &str, now: DateTime<Utc>) -> Result<BinView, WebError> {
    let id = BinId::parse(raw_id).ok_or(WebError::NotFound)?;

    let requests = storage
        .load_http_events(&id)?
        .into_iter()
        .map(|capture| {
            let at = capture.time;
            Annotated::new(capture, at, now)
        })
        .collect();
    let sockets = storage
        .load_socket_connections(&id)?
        .into_iter()
        .map(|connection| SocketView::new(connection, now))
        .collect();

    Ok(BinView {
        bin_id: id,
        new_id: BinId::generate(),
        requests,
        sockets,
    })
}

pub fn delete_bin(storage: &dyn BinStorage, raw_id: &str) -> Result<(), WebError> {
    let id = BinId::parse(raw_id).ok_or(WebError::NotFound)?;
    storage.delete_bin(&id)?;
    debug!("[{}] deleted on request", id);
    Ok(())
}

pub fn new_bin() -> NewBinResponse {
    NewBinResponse {
        id: BinId::generate(),
    }
}

pub fn landing_page(id: &BinId) -> String {
    format!(
        r#"<html><head><title>PostBin</title></head>
<body><h1>PostBin is running</h1>
<p>Send any request to <code>/{id}</code> on the capture port, or open a WebSocket there.</p>
<p>See <a href="/inspect/{id}">/inspect/{id}</a> for what it received.</p></body></html>"#,
        id = id
    )
}

pub fn error_reply(err: WebError) -> reply::Response {
    let status = match err {
        WebError::NotFound => StatusCode::NOT_FOUND,
        WebError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reply::with_status(
        reply::json(&ApiError {
            message: err.to_string(),
        }),
        status,
    )
    .into_response()
}

/// GET /
pub fn landing_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .map(|| reply::html(landing_page(&BinId::generate())))
}

/// GET /new
pub fn new_bin_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("new")
        .and(warp::get())
        .map(|| reply::json(&new_bin()))
}

/// GET /inspect/:id
pub fn inspect_route(
    storage: Arc<dyn BinStorage>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("inspect" / String)
        .and(warp::get())
        .and_then(move |raw_id: String| {
            let storage = storage.clone();
            async move {
                let view = tokio::task::spawn_blocking(move || {
                    inspect_bin(storage.as_ref(), &raw_id, Utc::now())
                })
                .await
                .unwrap_or_else(|e| {
                    error!("Inspection task failed: {}", e);
                    Err(WebError::Internal)
                });

                let res = match view {
                    Ok(view) => reply::with_status(reply::json(&view), StatusCode::OK).into_response(),
                    Err(e) => error_reply(e),
                };
                Ok::<_, Rejection>(res)
            }
        })
}

/// DELETE /inspect/:id
pub fn delete_route(
    storage: Arc<dyn BinStorage>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("inspect" / String)
        .and(warp::delete())
        .and_then(move |raw_id: String| {
            let storage = storage.clone();
            async move {
                let deleted = tokio::task::spawn_blocking(move || delete_bin(storage.as_ref(), &raw_id))
                    .await
                    .unwrap_or_else(|e| {
                        error!("Delete task failed: {}", e);
                        Err(WebError::Internal)
                    });

                let res = match deleted {
                    Ok(()) => reply::with_status(reply(), StatusCode::NO_CONTENT).into_response(),
                    Err(e) => error_reply(e),
                };
                Ok::<_, Rejection>(res)
            }
        })
}

/// Turns unmatched routes into JSON errors.
pub async fn handle_rejection(err: Rejection) -> Result<reply::Response, Infallible> {
    if err.is_not_found() {
        return Ok(error_reply(WebError::NotFound));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(reply::with_status(
            reply::json(&ApiError {
                message: "Method not allowed".to_string(),
            }),
            StatusCode::METHOD_NOT_ALLOWED,
        )
        .into_response());
    }
    debug!("Unhandled rejection: {:?}", err);
    Ok(reply::with_status(
        reply::json(&ApiError {
            message: "Bad request".to_string(),
        }),
        StatusCode::BAD_REQUEST,
    )
    .into_response())
}

/// Every inspection route, with JSON errors for everything else.
pub fn routes(
    storage: Arc<dyn BinStorage>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    landing_route()
        .or(new_bin_route())
        .or(inspect_route(storage.clone()))
        .or(delete_route(storage))
        .recover(handle_rejection)
}
