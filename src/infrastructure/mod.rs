// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod detector_simulator;
pub mod file_store;
pub mod local_broker;
pub mod mqtt_transport;
pub mod scene_stream;
pub mod watch_renderer;
