// Presentation layer - HTTP surface over the chart session
pub mod app_state;
pub mod handlers;
