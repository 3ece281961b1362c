// Drawing layer seam
use crate::domain::render::Redraw;

/// Receives redraw instructions; path generation and screen updates are its
/// business.
pub trait Renderer: Send + Sync {
    fn redraw(&mut self, redraw: Redraw);
}
