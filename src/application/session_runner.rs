// Session actor - single task owning the chart session
use crate::application::session::{ChartSession, SessionStatus};
use crate::application::shutdown::Shutdown;
use crate::application::transport::TransportError;
use crate::domain::channel::Channel;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
#[error("chart session is no longer running")]
pub struct SessionGone;

#[derive(Debug)]
pub enum SessionCommand {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Restart(oneshot::Sender<()>),
    ToggleChannel(Channel, oneshot::Sender<bool>),
    Resize { width: f64, height: f64 },
    ClearCache(oneshot::Sender<()>),
    Status(oneshot::Sender<SessionStatus>),
    Publish(Bytes, oneshot::Sender<Result<(), TransportError>>),
}

/// Cheap handle for talking to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionGone> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| SessionGone)?;
        rx.await.map_err(|_| SessionGone)
    }

    pub async fn start(&self) -> Result<(), SessionGone> {
        self.request(SessionCommand::Start).await
    }

    pub async fn stop(&self) -> Result<(), SessionGone> {
        self.request(SessionCommand::Stop).await
    }

    pub async fn restart(&self) -> Result<(), SessionGone> {
        self.request(SessionCommand::Restart).await
    }

    pub async fn toggle_channel(&self, channel: Channel) -> Result<bool, SessionGone> {
        self.request(|reply| SessionCommand::ToggleChannel(channel, reply))
            .await
    }

    /// Fire and forget; the task coalesces bursts.
    pub async fn resize(&self, width: f64, height: f64) -> Result<(), SessionGone> {
        self.tx
            .send(SessionCommand::Resize { width, height })
            .await
            .map_err(|_| SessionGone)
    }

    pub async fn clear_cache(&self) -> Result<(), SessionGone> {
        self.request(SessionCommand::ClearCache).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionGone> {
        self.request(SessionCommand::Status).await
    }

    pub async fn publish(&self, payload: Bytes) -> Result<Result<(), TransportError>, SessionGone> {
        self.request(|reply| SessionCommand::Publish(payload, reply))
            .await
    }
}

pub fn channel() -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    (SessionHandle { tx }, rx)
}

/// Drive the session until shutdown or until every handle is dropped, then
/// tear it down.
///
/// Ticks, subscriber events, commands and the resize debounce are all
/// serialised through this one task, so the session never sees concurrent
/// mutation.
pub async fn run(
    mut session: ChartSession,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut shutdown: Shutdown,
    tick_interval: Duration,
    resize_debounce: Duration,
) {
    let mut ticks = tokio::time::interval(tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let debounce = tokio::time::sleep(resize_debounce);
    tokio::pin!(debounce);
    let mut pending_resize: Option<(f64, f64)> = None;

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Session task shutting down");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    SessionCommand::Resize { width, height } => {
                        pending_resize = Some((width, height));
                        debounce.as_mut().reset(Instant::now() + resize_debounce);
                    }
                    command => {
                        if matches!(command, SessionCommand::Stop(_)) {
                            pending_resize = None;
                        }
                        handle_command(&mut session, command).await;
                    }
                }
            }
            _ = ticks.tick(), if session.is_running() => {
                session.tick();
            }
            event = session.next_event(), if session.is_listening() => {
                if let Some(event) = event {
                    session.handle_subscriber_event(event).await;
                }
            }
            _ = &mut debounce, if pending_resize.is_some() => {
                if let Some((width, height)) = pending_resize.take() {
                    session.resize(width, height);
                }
            }
        }
    }
    // Requests still queued get SessionGone once the receiver drops.

    session.teardown().await;
}

async fn handle_command(session: &mut ChartSession, command: SessionCommand) {
    match command {
        SessionCommand::Start(reply) => {
            session.start().await;
            let _ = reply.send(());
        }
        SessionCommand::Restart(reply) => {
            session.restart().await;
            let _ = reply.send(());
        }
        SessionCommand::ToggleChannel(channel, reply) => {
            let _ = reply.send(session.toggle_channel(channel));
        }
        SessionCommand::ClearCache(reply) => {
            session.clear_cache().await;
            let _ = reply.send(());
        }
        SessionCommand::Status(reply) => {
            let _ = reply.send(session.status());
        }
        SessionCommand::Publish(payload, reply) => {
            let _ = reply.send(session.publish(payload).await);
        }
        SessionCommand::Stop(reply) => {
            session.stop().await;
            let _ = reply.send(());
        }
        SessionCommand::Resize { width, height } => session.resize(width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::SystemClock;
    use crate::application::current_values::{CurrentValueMirror, CurrentValues};
    use crate::application::persistence::{DEFAULT_CACHE_KEY, DEFAULT_MAX_AGE_MS, PersistenceGateway};
    use crate::application::renderer::Renderer;
    use crate::application::shutdown::{self, ShutdownTrigger};
    use crate::application::subscriber::StreamSubscriber;
    use crate::domain::render::{Redraw, RedrawScope};
    use crate::infrastructure::config::RunSettings;
    use crate::infrastructure::file_store::MemoryStore;
    use crate::infrastructure::local_broker::LocalBroker;
    use std::sync::{Arc, Mutex};

    const TOPIC: &str = "chromatography/detector/detector_1/signal";

    #[derive(Clone, Default)]
    struct RecordingRenderer(Arc<Mutex<Vec<Redraw>>>);

    impl Renderer for RecordingRenderer {
        fn redraw(&mut self, redraw: Redraw) {
            self.0.lock().unwrap().push(redraw);
        }
    }

    struct Running {
        handle: SessionHandle,
        trigger: ShutdownTrigger,
        task: tokio::task::JoinHandle<()>,
    }

    fn session(broker: &LocalBroker, renderer: RecordingRenderer) -> ChartSession {
        let clock = Arc::new(SystemClock);
        let persistence = PersistenceGateway::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            DEFAULT_CACHE_KEY,
            DEFAULT_MAX_AGE_MS,
        );
        ChartSession::new(
            RunSettings::default(),
            TOPIC,
            clock,
            persistence,
            StreamSubscriber::new(Arc::new(broker.transport()), 5),
            Box::new(renderer),
            CurrentValueMirror::new(CurrentValues::default()),
        )
        .unwrap()
    }

    fn spawn(broker: &LocalBroker, renderer: RecordingRenderer) -> Running {
        let (handle, commands) = channel();
        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(run(
            session(broker, renderer),
            commands,
            shutdown,
            Duration::from_secs(3600),
            Duration::from_millis(150),
        ));
        Running {
            handle,
            trigger,
            task,
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_runner_future_is_send() {
        let (_handle, commands) = channel();
        let (_trigger, shutdown) = shutdown::channel();
        let runner = run(
            session(&LocalBroker::new(), RecordingRenderer::default()),
            commands,
            shutdown,
            Duration::from_secs(1),
            Duration::from_millis(150),
        );
        assert_send(&runner);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_burst_is_coalesced() {
        let broker = LocalBroker::new();
        let renderer = RecordingRenderer::default();
        let Running { handle, trigger: _trigger, .. } = spawn(&broker, renderer.clone());
        handle.start().await.unwrap();

        for width in [600.0, 700.0, 900.0] {
            handle.resize(width, 400.0).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Round trip so the task has drained everything before we look.
        handle.status().await.unwrap();

        let resizes: Vec<f64> = renderer
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.scope == RedrawScope::Full)
            .skip(1)
            .map(|r| r.axes.layout.container_width)
            .collect();
        assert_eq!(resizes, vec![900.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_resize() {
        let broker = LocalBroker::new();
        let renderer = RecordingRenderer::default();
        let Running { handle, trigger: _trigger, .. } = spawn(&broker, renderer.clone());
        handle.start().await.unwrap();

        handle.resize(1000.0, 400.0).await.unwrap();
        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.status().await.unwrap();

        let full = renderer
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.scope == RedrawScope::Full)
            .count();
        assert_eq!(full, 1);
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_handles_tears_down() {
        let broker = LocalBroker::new();
        let Running { handle, trigger: _trigger, task } =
            spawn(&broker, RecordingRenderer::default());
        handle.start().await.unwrap();
        assert_eq!(broker.client_count(), 1);

        drop(handle);
        task.await.unwrap();

        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_while_handles_live() {
        let broker = LocalBroker::new();
        let Running { handle, trigger, task } = spawn(&broker, RecordingRenderer::default());
        handle.start().await.unwrap();
        assert_eq!(broker.client_count(), 1);

        trigger.trigger();
        task.await.unwrap();

        assert_eq!(broker.client_count(), 0);
        assert!(handle.status().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_session_over_broker() {
        let broker = LocalBroker::new();
        let Running { handle, trigger: _trigger, .. } = spawn(&broker, RecordingRenderer::default());
        handle.start().await.unwrap();

        let published = handle
            .publish(Bytes::from_static(b"[0.42, 0.31]"))
            .await
            .unwrap();
        assert!(published.is_ok());

        let mut accepted = false;
        for _ in 0..50 {
            let status = handle.status().await.unwrap();
            if status.last_update_ms > 0 {
                accepted = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(accepted);
    }
}
