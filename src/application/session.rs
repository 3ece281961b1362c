// Chart session - run lifecycle, update cycle and redraw decisions
use crate::application::clock::Clock;
use crate::application::current_values::CurrentValueMirror;
use crate::application::persistence::PersistenceGateway;
use crate::application::renderer::Renderer;
use crate::application::subscriber::{StreamSubscriber, SubscriberEvent, SubscriptionState};
use crate::application::transport::TransportError;
use crate::domain::buffer::{BufferError, TimeSeriesBuffer};
use crate::domain::channel::Channel;
use crate::domain::payload::{Payload, SignalReading};
use crate::domain::range::{Range, RangeTracker, ratio_tick_count, should_recompute};
use crate::domain::render::{
    Axes, ChannelState, ChannelVisibility, PlotLayout, Redraw, RedrawScope, SeriesPath,
};
use crate::domain::snapshot::PersistedSnapshot;
use crate::infrastructure::config::RunSettings;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid run layout: {0}")]
    Layout(#[from] BufferError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    Idle,
    Running,
    Stopped { at_ms: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub run: RunState,
    pub run_complete: bool,
    pub elapsed_minutes: f64,
    pub running_time: String,
    pub current_slot: Option<usize>,
    pub slot_count: usize,
    pub run_duration_minutes: f64,
    pub resolution_minutes: f64,
    pub session_start_ms: i64,
    pub last_update_ms: i64,
    pub signal_range: Range,
    pub ratio_range: Range,
    pub ratio_ticks: usize,
    pub subscription: SubscriptionState,
    pub channels: Vec<ChannelState>,
}

/// Everything the chart needs for one run. Built fresh per session; nothing
/// lives in statics.
pub struct ChartSession {
    run: RunSettings,
    topic: String,
    clock: Arc<dyn Clock>,
    persistence: PersistenceGateway,
    subscriber: StreamSubscriber,
    renderer: Box<dyn Renderer>,
    mirror: CurrentValueMirror,
    blank: TimeSeriesBuffer,
    buffer: TimeSeriesBuffer,
    ranges: RangeTracker,
    visibility: ChannelVisibility,
    layout: PlotLayout,
    session_start_ms: i64,
    last_update_ms: i64,
    state: RunState,
    run_complete: bool,
}

impl ChartSession {
    pub fn new(
        run: RunSettings,
        topic: impl Into<String>,
        clock: Arc<dyn Clock>,
        persistence: PersistenceGateway,
        subscriber: StreamSubscriber,
        renderer: Box<dyn Renderer>,
        mirror: CurrentValueMirror,
    ) -> Result<Self, SessionError> {
        let blank = TimeSeriesBuffer::allocate(
            run.duration_minutes,
            run.resolution_minutes,
            run.initial_ratios,
            run.default_signal,
        )?;

        Ok(Self {
            run,
            topic: topic.into(),
            clock,
            persistence,
            subscriber,
            renderer,
            mirror,
            buffer: blank.clone(),
            blank,
            ranges: RangeTracker::default(),
            visibility: ChannelVisibility::default(),
            layout: PlotLayout::default(),
            session_start_ms: 0,
            last_update_ms: 0,
            state: RunState::Idle,
            run_complete: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Whether subscriber events are worth waiting on.
    pub fn is_listening(&self) -> bool {
        self.subscriber.is_attached()
    }

    #[cfg(test)]
    pub fn buffer(&self) -> &TimeSeriesBuffer {
        &self.buffer
    }

    #[cfg(test)]
    pub fn ranges(&self) -> &RangeTracker {
        &self.ranges
    }

    #[cfg(test)]
    pub fn subscription(&self) -> SubscriptionState {
        self.subscriber.state()
    }

    /// Messages can only arrive while the signal topic is actually subscribed.
    fn receiving(&self) -> bool {
        self.subscriber.is_connected() && self.subscriber.is_subscribed_to(&self.topic)
    }

    pub fn elapsed_ms(&self) -> i64 {
        match self.state {
            RunState::Idle => 0,
            RunState::Running => self.clock.now_ms() - self.session_start_ms,
            RunState::Stopped { at_ms } => at_ms - self.session_start_ms,
        }
    }

    /// Slot for "now", if the run is still within its duration.
    fn current_slot(&self) -> Option<usize> {
        let elapsed = self.elapsed_ms();
        if elapsed > self.buffer.run_duration_ms() {
            return None;
        }
        self.buffer
            .slot_at(elapsed)
            .filter(|slot| self.buffer.contains_slot(*slot))
    }

    /// Resume from a persisted snapshot when one is valid, otherwise begin a
    /// fresh run; then open the subscription.
    pub async fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let resumed = match self.persistence.load().await {
            Some(snapshot) => self.resume(snapshot),
            None => false,
        };
        if !resumed {
            self.start_fresh();
        }

        self.state = RunState::Running;
        self.run_complete = false;
        let redraw = self.full_redraw();
        self.renderer.redraw(redraw);
        tracing::info!(resumed, slots = self.buffer.slot_count(), "Chart session started");

        self.open_subscription().await;
    }

    fn resume(&mut self, snapshot: PersistedSnapshot) -> bool {
        let samples = snapshot.samples.len();
        match TimeSeriesBuffer::from_samples(
            snapshot.samples,
            self.run.duration_minutes,
            self.run.resolution_minutes,
        ) {
            Ok(buffer) if buffer.is_empty() => {
                tracing::warn!("Snapshot holds no samples, starting fresh");
                false
            }
            Ok(buffer) => {
                self.buffer = buffer;
                self.session_start_ms = snapshot.session_start_ms;
                self.last_update_ms = snapshot.last_update_ms;
                self.ranges = RangeTracker::new(snapshot.signal_range, snapshot.ratio_range);
                tracing::info!(samples, "Restored chart data from snapshot");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot does not fit run layout, starting fresh");
                false
            }
        }
    }

    fn start_fresh(&mut self) {
        self.buffer = self.blank.clone();
        self.session_start_ms = self.clock.now_ms();
        self.last_update_ms = 0;
        self.ranges = RangeTracker::default();
        self.ranges.update(self.buffer.all());
    }

    async fn open_subscription(&mut self) {
        if self.subscriber.connect().await.is_err() {
            tracing::warn!("Signal transport unavailable, charting local values");
            return;
        }
        if let Err(e) = self.subscriber.subscribe(&self.topic).await {
            tracing::warn!(topic = %self.topic, error = %e, "Signal subscription failed");
        }
    }

    /// One step of the update cycle. Returns whether a redraw was issued.
    pub fn tick(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let elapsed_ms = self.elapsed_ms();
        if elapsed_ms < 0 {
            tracing::debug!(elapsed_ms, "Clock is behind the run start, waiting");
            return false;
        }
        let Some(slot) = self.current_slot() else {
            if !self.run_complete {
                self.run_complete = true;
                tracing::info!(minutes = self.run.duration_minutes, "Run duration reached");
            }
            return false;
        };

        if !self.receiving() {
            if let Some(reading) = self.mirror.fallback_reading() {
                if self.buffer.write_signals(slot, reading.primary, reading.secondary) {
                    self.mirror.set(reading);
                }
            }
        }

        if should_recompute(slot) {
            self.ranges.update(self.buffer.slice_up_to(slot));
        }

        let redraw = self.signal_redraw(slot);
        self.renderer.redraw(redraw);
        true
    }

    /// Route a decoded message. Anything but a well-formed reading on the
    /// signal topic is dropped with a single log line.
    pub async fn handle_message(&mut self, topic: &str, payload: &Payload) -> bool {
        if topic != self.topic {
            tracing::debug!(topic, "Ignoring message for foreign topic");
            return false;
        }
        match SignalReading::try_from(payload) {
            Ok(reading) => self.handle_inbound_sample(reading).await,
            Err(e) => {
                tracing::warn!(topic, error = %e, "Dropping malformed signal payload");
                false
            }
        }
    }

    /// Write a reading into the slot for "now". Returns whether it landed.
    pub async fn handle_inbound_sample(&mut self, reading: SignalReading) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(slot) = self.current_slot() else {
            return false;
        };
        if !self
            .buffer
            .write_signals(slot, reading.primary, reading.secondary)
        {
            return false;
        }

        self.mirror.set(reading);
        self.last_update_ms = self.clock.now_ms();
        if should_recompute(slot) {
            self.ranges.update(self.buffer.slice_up_to(slot));
        }
        self.persist().await;

        tracing::debug!(
            slot,
            primary = reading.primary,
            secondary = reading.secondary,
            "Signal sample accepted"
        );
        true
    }

    pub async fn handle_subscriber_event(&mut self, event: SubscriberEvent) {
        match event {
            SubscriberEvent::Message { topic, payload } => {
                self.handle_message(&topic, &payload).await;
            }
            SubscriberEvent::ReconnectLimitExceeded { .. } => {
                self.subscriber.terminate().await;
            }
            SubscriberEvent::Reconnecting { .. }
            | SubscriberEvent::Reconnected
            | SubscriberEvent::Disconnected => {}
        }
    }

    pub async fn next_event(&mut self) -> Option<SubscriberEvent> {
        self.subscriber.recv().await
    }

    /// Visibility only; buffered data is left alone.
    pub fn toggle_channel(&mut self, channel: Channel) -> bool {
        let visible = self.visibility.toggle(channel);
        let paths = if visible {
            vec![self.path_for(channel)]
        } else {
            Vec::new()
        };

        let redraw = Redraw {
            scope: RedrawScope::Visibility,
            paths,
            axes: self.axes(),
            channels: vec![self.visibility.state(channel)],
        };
        self.renderer.redraw(redraw);
        tracing::info!(%channel, visible, "Toggled chart channel");
        visible
    }

    /// New pixel extents, same data domains.
    pub fn resize(&mut self, container_width: f64, container_height: f64) {
        self.layout = PlotLayout::from_container(container_width, container_height);
        let redraw = self.full_redraw();
        self.renderer.redraw(redraw);
        tracing::debug!(container_width, container_height, "Chart resized");
    }

    /// Freeze the clock, persist, then close the subscription.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.state = RunState::Stopped {
            at_ms: self.clock.now_ms(),
        };
        self.persist().await;
        self.subscriber.close().await;
        tracing::info!(elapsed_ms = self.elapsed_ms(), "Chart session stopped");
    }

    pub async fn restart(&mut self) {
        self.stop().await;
        self.start().await;
    }

    /// Session end: keep what we have and release the connection.
    pub async fn teardown(&mut self) {
        if self.is_running() {
            self.state = RunState::Stopped {
                at_ms: self.clock.now_ms(),
            };
            self.persist().await;
        }
        self.subscriber.close().await;
        tracing::info!("Chart session torn down");
    }

    pub async fn clear_cache(&self) {
        self.persistence.clear().await;
        tracing::info!("Chart snapshot cleared");
    }

    /// Push a raw payload onto the signal topic over the session's connection.
    pub async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        self.subscriber.publish(&self.topic, payload).await
    }

    pub fn status(&self) -> SessionStatus {
        let elapsed_ms = self.elapsed_ms().max(0);
        let ratio_range = self.ranges.ratio();
        SessionStatus {
            run: self.state,
            run_complete: self.run_complete,
            elapsed_minutes: elapsed_ms as f64 / 60_000.0,
            running_time: format_running_time(elapsed_ms),
            current_slot: self.current_slot(),
            slot_count: self.buffer.slot_count(),
            run_duration_minutes: self.buffer.run_duration(),
            resolution_minutes: self.buffer.resolution(),
            session_start_ms: self.session_start_ms,
            last_update_ms: self.last_update_ms,
            signal_range: self.ranges.signal(),
            ratio_range,
            ratio_ticks: ratio_tick_count(&ratio_range),
            subscription: self.subscriber.state(),
            channels: self.visibility.states(),
        }
    }

    async fn persist(&self) {
        let snapshot = PersistedSnapshot {
            samples: self.buffer.all().to_vec(),
            session_start_ms: self.session_start_ms,
            last_update_ms: self.last_update_ms,
            signal_range: self.ranges.signal(),
            ratio_range: self.ranges.ratio(),
            saved_at_ms: self.clock.now_ms(),
        };
        self.persistence.save(&snapshot).await;
    }

    fn axes(&self) -> Axes {
        let ratio = self.ranges.ratio();
        Axes {
            time: Range::new(0.0, self.buffer.run_duration()),
            signal: self.ranges.signal(),
            ratio,
            ratio_ticks: ratio_tick_count(&ratio),
            layout: self.layout,
        }
    }

    /// Signal lines stop at "now"; ratio lines span the whole run.
    fn path_for(&self, channel: Channel) -> SeriesPath {
        if channel.is_signal() {
            let slot = self.current_slot().unwrap_or(self.buffer.slot_count().saturating_sub(1));
            SeriesPath::from_samples(channel, self.buffer.slice_up_to(slot))
        } else {
            SeriesPath::from_samples(channel, self.buffer.all())
        }
    }

    fn signal_redraw(&self, slot: usize) -> Redraw {
        let window = self.buffer.slice_up_to(slot);
        Redraw {
            scope: RedrawScope::Signal,
            paths: Channel::SIGNALS
                .into_iter()
                .filter(|c| self.visibility.is_visible(*c))
                .map(|c| SeriesPath::from_samples(c, window))
                .collect(),
            axes: self.axes(),
            channels: Channel::SIGNALS
                .into_iter()
                .map(|c| self.visibility.state(c))
                .collect(),
        }
    }

    fn full_redraw(&self) -> Redraw {
        Redraw {
            scope: RedrawScope::Full,
            paths: Channel::ALL
                .into_iter()
                .filter(|c| self.visibility.is_visible(*c))
                .map(|c| self.path_for(c))
                .collect(),
            axes: self.axes(),
            channels: self.visibility.states(),
        }
    }
}

fn format_running_time(elapsed_ms: i64) -> String {
    let minutes = elapsed_ms / 60_000;
    let seconds = (elapsed_ms % 60_000) / 1000;
    format!("{}:{:02}", minutes, seconds)
}
