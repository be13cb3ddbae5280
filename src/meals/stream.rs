use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    meals::{
        events::MealChange,
        repo_types::MealFilter,
        services::{list_summaries, MAX_PAGE},
    },
    state::AppState,
};

type SseItem = Result<Event, axum::Error>;

/// GET /meals/stream: full list snapshot on connect and after every change.
#[instrument(skip(state))]
pub async fn stream_meals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Sse<ReceiverStream<SseItem>> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(forward_snapshots(state, user_id, tx));
    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Runs until the client goes away, the hub shuts down or a query fails.
async fn forward_snapshots(state: AppState, user_id: Uuid, tx: mpsc::Sender<SseItem>) {
    // Subscribe before the first query so no change slips between the two.
    let mut changes = state.events.subscribe();
    let filter = MealFilter {
        limit: MAX_PAGE,
        ..Default::default()
    };
    debug!(%user_id, subscribers = state.events.subscriber_count(), "meal stream opened");

    loop {
        match list_summaries(&state, user_id, &filter).await {
            Ok(meals) => {
                if tx.send(Event::default().event("meals").json_data(&meals)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), %user_id, "meal stream query failed");
                let _ = tx
                    .send(Ok(Event::default().event("error").data("Failed to load meals")))
                    .await;
                break;
            }
        }

        if !wait_for_change(&mut changes, &tx, user_id).await {
            break;
        }
    }

    debug!(%user_id, "meal stream closed");
}

/// True when a fresh snapshot is due, false when the stream should end.
async fn wait_for_change(
    changes: &mut broadcast::Receiver<MealChange>,
    tx: &mpsc::Sender<SseItem>,
    user_id: Uuid,
) -> bool {
    loop {
        tokio::select! {
            _ = tx.closed() => return false,
            msg = changes.recv() => match msg {
                Ok(change) if change.user_id == user_id => return true,
                Ok(_) => continue,
                // Missed some changes; one snapshot covers all of them.
                Err(RecvError::Lagged(_)) => return true,
                Err(RecvError::Closed) => return false,
            },
        }
    }
}
