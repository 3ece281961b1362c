// Server-sent event streaming of chart scenes
use crate::application::shutdown::Shutdown;
use crate::domain::render::Scene;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::StreamExt;
use futures::stream::Stream;
use tokio::sync::watch;

/// Current scene first, then one frame per change. Intermediate scenes are
/// skipped when the reader lags; it always catches up to the latest.
///
/// Ends when the scene sender goes away or on shutdown, whichever is first.
pub fn scene_frames(
    mut rx: watch::Receiver<Scene>,
    mut shutdown: Shutdown,
) -> impl Stream<Item = Scene> + Send + 'static {
    async_stream::stream! {
        let first = rx.borrow_and_update().clone();
        yield first;
        loop {
            let next = tokio::select! {
                changed = rx.changed() => match changed {
                    Ok(()) => Some(rx.borrow_and_update().clone()),
                    Err(_) => None,
                },
                _ = shutdown.wait() => None,
            };
            match next {
                Some(scene) => yield scene,
                None => break,
            }
        }
    }
}

/// Wrap the scene frames as an SSE response.
pub fn sse_from_watch(rx: watch::Receiver<Scene>, shutdown: Shutdown) -> impl IntoResponse {
    let events = scene_frames(rx, shutdown)
        .map(|scene| Event::default().event("scene").json_data(&scene));
    Sse::new(events).keep_alive(KeepAlive::default())
}
