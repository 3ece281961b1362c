// Domain layer - Chart data model, independent of transport and storage
pub mod buffer;
pub mod channel;
pub mod payload;
pub mod range;
pub mod render;
pub mod snapshot;
