// Renderer that folds redraws into a shared scene
use crate::application::renderer::Renderer;
use crate::domain::render::{Redraw, Scene};
use tokio::sync::watch;

/// Keeps the latest [`Scene`] in a watch channel so HTTP readers can poll it
/// or follow it as a stream.
pub struct WatchRenderer {
    tx: watch::Sender<Scene>,
}

impl WatchRenderer {
    pub fn new() -> (Self, watch::Receiver<Scene>) {
        let (tx, rx) = watch::channel(Scene::default());
        (Self { tx }, rx)
    }
}

impl Renderer for WatchRenderer {
    fn redraw(&mut self, redraw: Redraw) {
        let scope = redraw.scope;
        // send_modify updates even with no receivers left.
        self.tx.send_modify(|scene| scene.apply(redraw));
        tracing::trace!(?scope, "Scene updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::channel::Channel;
    use crate::domain::range::Range;
    use crate::domain::render::{Axes, PlotLayout, RedrawScope, SeriesPath};

    fn redraw(scope: RedrawScope, paths: Vec<SeriesPath>) -> Redraw {
        Redraw {
            scope,
            paths,
            axes: Axes {
                time: Range::new(0.0, 30.0),
                signal: Range::new(0.0, 1.0),
                ratio: Range::new(0.0, 100.0),
                ratio_ticks: 8,
                layout: PlotLayout::default(),
            },
            channels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_receivers_see_each_redraw() {
        let (mut renderer, mut rx) = WatchRenderer::new();

        renderer.redraw(redraw(
            RedrawScope::Full,
            vec![SeriesPath::from_samples(Channel::RatioA, &[])],
        ));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().redraws, 1);

        renderer.redraw(redraw(RedrawScope::Signal, Vec::new()));
        rx.changed().await.unwrap();
        let scene = rx.borrow_and_update();
        assert_eq!(scene.redraws, 2);
        assert!(scene.series.contains_key(&Channel::RatioA));
    }
}
