// Render boundary: what the engine hands to the drawing layer
use super::channel::{Channel, Sample};
use super::range::Range;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

const MARGIN_TOP: f64 = 20.0;
const MARGIN_RIGHT: f64 = 80.0;
const MARGIN_BOTTOM: f64 = 40.0;
const MARGIN_LEFT: f64 = 60.0;
pub const DEFAULT_CONTAINER_WIDTH: f64 = 800.0;
pub const DEFAULT_CONTAINER_HEIGHT: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub time: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPath {
    pub channel: Channel,
    pub opacity: f64,
    pub points: Vec<Point>,
}

impl SeriesPath {
    /// Points for one channel; slots without a value are skipped.
    pub fn from_samples(channel: Channel, samples: &[Sample]) -> Self {
        let points = samples
            .iter()
            .filter_map(|s| {
                s.value(channel).map(|value| Point {
                    time: s.time,
                    value,
                })
            })
            .collect();
        Self {
            channel,
            opacity: channel.visible_opacity(),
            points,
        }
    }
}

/// Pixel extent of the plot area inside the host container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotLayout {
    pub container_width: f64,
    pub container_height: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for PlotLayout {
    fn default() -> Self {
        Self::from_container(DEFAULT_CONTAINER_WIDTH, DEFAULT_CONTAINER_HEIGHT)
    }
}

impl PlotLayout {
    pub fn from_container(container_width: f64, container_height: f64) -> Self {
        Self {
            container_width,
            container_height,
            width: (container_width - MARGIN_LEFT - MARGIN_RIGHT).max(0.0),
            height: (container_height - MARGIN_TOP - MARGIN_BOTTOM).max(0.0),
        }
    }
}

/// Linear map from a data domain onto a pixel range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearScale {
    pub domain: Range,
    pub range: (f64, f64),
}

impl LinearScale {
    pub fn map(&self, value: f64) -> f64 {
        let span = self.domain.span();
        if span == 0.0 {
            return self.range.0;
        }
        let t = (value - self.domain.min) / span;
        self.range.0 + t * (self.range.1 - self.range.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Axes {
    pub time: Range,
    pub signal: Range,
    pub ratio: Range,
    pub ratio_ticks: usize,
    pub layout: PlotLayout,
}

/// The three pixel-space scales for one layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scales {
    pub x: LinearScale,
    pub signal: LinearScale,
    pub ratio: LinearScale,
}

impl Scales {
    /// Left axis for signal lines, right axis for ratio lines.
    pub fn y_for(&self, channel: Channel) -> &LinearScale {
        if channel.is_signal() {
            &self.signal
        } else {
            &self.ratio
        }
    }

    /// SVG path data for a series, `M x,y L x,y ...` in plot pixels.
    pub fn outline(&self, path: &SeriesPath) -> String {
        let y = self.y_for(path.channel);
        let mut d = String::with_capacity(path.points.len() * 16);
        for (i, point) in path.points.iter().enumerate() {
            let command = if i == 0 { 'M' } else { 'L' };
            let _ = write!(d, "{}{:.2},{:.2}", command, self.x.map(point.time), y.map(point.value));
        }
        d
    }
}

impl Axes {
    pub fn scales(&self) -> Scales {
        Scales {
            x: self.x_scale(),
            signal: self.signal_scale(),
            ratio: self.ratio_scale(),
        }
    }

    pub fn x_scale(&self) -> LinearScale {
        LinearScale {
            domain: self.time,
            range: (0.0, self.layout.width),
        }
    }

    /// Left axis; y grows downwards in screen space.
    pub fn signal_scale(&self) -> LinearScale {
        LinearScale {
            domain: self.signal,
            range: (self.layout.height, 0.0),
        }
    }

    pub fn ratio_scale(&self) -> LinearScale {
        LinearScale {
            domain: self.ratio,
            range: (self.layout.height, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedrawScope {
    /// Signal lines up to the current slot.
    Signal,
    /// Everything, e.g. after a resize or resume.
    Full,
    /// Opacity change only.
    Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelState {
    pub channel: Channel,
    pub visible: bool,
    pub opacity: f64,
}

/// One instruction to the drawing layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redraw {
    pub scope: RedrawScope,
    pub paths: Vec<SeriesPath>,
    pub axes: Axes,
    pub channels: Vec<ChannelState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelVisibility {
    flags: BTreeMap<Channel, bool>,
}

impl Default for ChannelVisibility {
    fn default() -> Self {
        Self {
            flags: Channel::ALL
                .into_iter()
                .map(|c| (c, c.visible_by_default()))
                .collect(),
        }
    }
}

impl ChannelVisibility {
    pub fn is_visible(&self, channel: Channel) -> bool {
        self.flags.get(&channel).copied().unwrap_or(false)
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&mut self, channel: Channel) -> bool {
        let flag = self.flags.entry(channel).or_insert(false);
        *flag = !*flag;
        *flag
    }

    pub fn state(&self, channel: Channel) -> ChannelState {
        let visible = self.is_visible(channel);
        ChannelState {
            channel,
            visible,
            opacity: if visible { channel.visible_opacity() } else { 0.0 },
        }
    }

    pub fn states(&self) -> Vec<ChannelState> {
        Channel::ALL.into_iter().map(|c| self.state(c)).collect()
    }
}

/// Accumulated drawing state, as a drawing layer would hold it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scene {
    pub axes: Option<Axes>,
    pub scales: Option<Scales>,
    pub series: BTreeMap<Channel, SeriesPath>,
    /// SVG path data per series, projected through `scales`.
    pub outlines: BTreeMap<Channel, String>,
    pub channels: BTreeMap<Channel, ChannelState>,
    pub redraws: u64,
}

impl Scene {
    pub fn apply(&mut self, redraw: Redraw) {
        let scales = redraw.axes.scales();
        let remap = self.scales != Some(scales);
        self.axes = Some(redraw.axes);
        self.scales = Some(scales);
        for state in redraw.channels {
            self.channels.insert(state.channel, state);
        }
        for path in redraw.paths {
            self.outlines.insert(path.channel, scales.outline(&path));
            self.series.insert(path.channel, path);
        }
        if remap {
            for (channel, path) in &self.series {
                self.outlines.insert(*channel, scales.outline(path));
            }
        }
        for (channel, path) in self.series.iter_mut() {
            if let Some(state) = self.channels.get(channel) {
                path.opacity = state.opacity;
            }
        }
        self.redraws += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::channel::{RatioValues, SignalValues};

    fn axes(layout: PlotLayout) -> Axes {
        Axes {
            time: Range::new(0.0, 30.0),
            signal: Range::new(0.0, 2.0),
            ratio: Range::new(0.0, 100.0),
            ratio_ticks: 8,
            layout,
        }
    }

    #[test]
    fn test_layout_subtracts_margins() {
        let layout = PlotLayout::default();
        assert_eq!(layout.width, 660.0);
        assert_eq!(layout.height, 240.0);

        let tiny = PlotLayout::from_container(50.0, 10.0);
        assert_eq!((tiny.width, tiny.height), (0.0, 0.0));
    }

    #[test]
    fn test_scales_map_domains_to_pixels() {
        let axes = axes(PlotLayout::default());
        assert_eq!(axes.x_scale().map(15.0), 330.0);
        assert_eq!(axes.signal_scale().map(0.0), 240.0);
        assert_eq!(axes.signal_scale().map(2.0), 0.0);
        assert_eq!(axes.ratio_scale().map(50.0), 120.0);
    }

    #[test]
    fn test_series_path_skips_missing_values() {
        let samples = [
            Sample {
                time: 0.0,
                signal_channels: SignalValues::new(1.0, 2.0),
                ratio_channels: RatioValues::default(),
            },
            Sample {
                time: 0.1,
                signal_channels: SignalValues {
                    primary: None,
                    secondary: Some(3.0),
                },
                ratio_channels: RatioValues::default(),
            },
        ];

        let path = SeriesPath::from_samples(Channel::Primary, &samples);
        assert_eq!(path.points, vec![Point { time: 0.0, value: 1.0 }]);
        assert_eq!(SeriesPath::from_samples(Channel::Secondary, &samples).points.len(), 2);
    }

    #[test]
    fn test_visibility_defaults_and_toggle() {
        let mut visibility = ChannelVisibility::default();
        assert!(visibility.is_visible(Channel::Primary));
        assert!(!visibility.is_visible(Channel::RatioC));

        assert!(!visibility.toggle(Channel::RatioA));
        assert_eq!(visibility.state(Channel::RatioA).opacity, 0.0);
        assert!(visibility.toggle(Channel::RatioA));
        assert_eq!(visibility.state(Channel::RatioA).opacity, 0.8);
    }

    #[test]
    fn test_scene_applies_opacity_to_existing_paths() {
        let mut scene = Scene::default();
        let axes = axes(PlotLayout::default());
        let mut visibility = ChannelVisibility::default();

        scene.apply(Redraw {
            scope: RedrawScope::Full,
            paths: vec![SeriesPath {
                channel: Channel::RatioA,
                opacity: 0.8,
                points: vec![],
            }],
            axes,
            channels: visibility.states(),
        });
        visibility.toggle(Channel::RatioA);
        scene.apply(Redraw {
            scope: RedrawScope::Visibility,
            paths: vec![],
            axes,
            channels: vec![visibility.state(Channel::RatioA)],
        });

        assert_eq!(scene.series[&Channel::RatioA].opacity, 0.0);
        assert_eq!(scene.redraws, 2);
    }

    #[test]
    fn test_new_layout_remaps_existing_outlines() {
        let mut scene = Scene::default();
        let ratio = SeriesPath {
            channel: Channel::RatioA,
            opacity: 0.8,
            points: vec![Point { time: 0.0, value: 0.0 }, Point { time: 15.0, value: 50.0 }],
        };
        let signal = SeriesPath {
            channel: Channel::Primary,
            opacity: 1.0,
            points: vec![Point { time: 15.0, value: 1.0 }],
        };

        scene.apply(Redraw {
            scope: RedrawScope::Full,
            paths: vec![ratio, signal],
            axes: axes(PlotLayout::default()),
            channels: Vec::new(),
        });
        assert_eq!(scene.outlines[&Channel::RatioA], "M0.00,240.00L330.00,120.00");
        assert_eq!(scene.outlines[&Channel::Primary], "M330.00,120.00");

        // A resize carries no ratio path, but the stored one is reprojected.
        scene.apply(Redraw {
            scope: RedrawScope::Full,
            paths: Vec::new(),
            axes: axes(PlotLayout::from_container(1200.0, 500.0)),
            channels: Vec::new(),
        });
        assert_eq!(scene.scales.unwrap().x.range, (0.0, 1060.0));
        assert_eq!(scene.outlines[&Channel::RatioA], "M0.00,440.00L530.00,220.00");
    }
}
