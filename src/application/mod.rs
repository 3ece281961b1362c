// Application layer - Session orchestration and the seams it drives
pub mod clock;
pub mod current_values;
pub mod persistence;
pub mod renderer;
pub mod session;
pub mod session_runner;
pub mod shutdown;
pub mod snapshot_store;
pub mod subscriber;
pub mod transport;
