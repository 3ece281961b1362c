// Application state for HTTP handlers
use crate::application::current_values::CurrentValueMirror;
use crate::application::session_runner::SessionHandle;
use crate::application::shutdown::Shutdown;
use crate::domain::render::Scene;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub scene: watch::Receiver<Scene>,
    pub current_values: CurrentValueMirror,
    pub shutdown: Shutdown,
}
