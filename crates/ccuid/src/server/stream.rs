//! Session change stream endpoint.
//!
//! `GET /sessions` streams newline-delimited change records: a replay of
//! everything after `?from=<seq>` (default 0), then the live tail. A
//! subscriber that lags beyond the live buffer is disconnected and must
//! re-subscribe - its idempotent materialization absorbs the repeat.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::channel::mpsc as futures_mpsc;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use ccui_protocol::ChangeRecord;

use super::AppState;

/// Query parameters of the stream endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Resume point: deliver records with `seq > from`
    #[serde(default)]
    pub from: Option<u64>,
}

/// `GET /sessions`
pub async fn sessions_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let from = query.from.unwrap_or(0);

    let subscription = match state.publisher.subscribe_from(from).await {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(error = %err, "Stream subscription failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let (tx, rx) = futures_mpsc::unbounded::<Result<Bytes, Infallible>>();

    tokio::spawn(async move {
        let mut delivered = from;

        for record in subscription.replay {
            delivered = record.seq;
            if send_record(&tx, &record).is_err() {
                return;
            }
        }

        let mut live = subscription.live;
        loop {
            match live.recv().await {
                Ok(record) => {
                    // The replay/live split is gap-free by construction;
                    // the guard only drops a duplicate boundary record.
                    if record.seq <= delivered {
                        continue;
                    }
                    delivered = record.seq;
                    if send_record(&tx, &record).is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Stream subscriber lagged, disconnecting");
                    return;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return;
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(rx))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn send_record(
    tx: &futures_mpsc::UnboundedSender<Result<Bytes, Infallible>>,
    record: &ChangeRecord,
) -> Result<(), ()> {
    let Ok(mut json) = serde_json::to_string(record) else {
        return Ok(());
    };
    json.push('\n');
    tx.unbounded_send(Ok(Bytes::from(json))).map_err(|_| ())
}
