// Mock UV detector publishing two-channel readings
use crate::application::transport::Transport;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

struct Peak {
    center_s: f64,
    height: f64,
    width_s: f64,
}

impl Peak {
    const fn new(center_min: f64, height: f64, width_s: f64) -> Self {
        Self {
            center_s: center_min * 60.0,
            height,
            width_s,
        }
    }

    fn at(&self, t: f64) -> f64 {
        self.height * (-(t - self.center_s).powi(2) / (2.0 * self.width_s.powi(2))).exp()
    }
}

const PRIMARY_PEAKS: [Peak; 3] = [
    Peak::new(4.0, 20.0, 60.0),
    Peak::new(7.0, 50.0, 150.0),
    Peak::new(12.0, 30.0, 120.0),
];

const SECONDARY_PEAKS: [Peak; 3] = [
    Peak::new(2.0, 20.0, 60.0),
    Peak::new(12.0, 50.0, 150.0),
    Peak::new(30.0, 30.0, 120.0),
];

/// Synthetic chromatogram. Each call to [`DetectorSimulator::next_reading`]
/// is one second of run time.
#[derive(Debug, Default)]
pub struct DetectorSimulator {
    elapsed_s: u64,
}

impl DetectorSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_reading(&mut self) -> [f64; 2] {
        self.elapsed_s += 1;
        let t = self.elapsed_s as f64;
        let baseline = 1.0 + 0.0005 * t;
        let primary = baseline + PRIMARY_PEAKS.iter().map(|p| p.at(t)).sum::<f64>();
        let secondary = baseline + SECONDARY_PEAKS.iter().map(|p| p.at(t)).sum::<f64>();
        [round5(primary), round5(secondary)]
    }
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Publish one reading per interval until the task is dropped. A lost
/// connection is retried on the next tick; readings in between are skipped.
pub async fn run(transport: Arc<dyn Transport>, topic: String, interval: Duration) {
    let mut simulator = DetectorSimulator::new();
    let mut ticks = tokio::time::interval(interval);
    let mut connected = false;

    loop {
        ticks.tick().await;
        let reading = simulator.next_reading();
        if !connected {
            match transport.connect().await {
                // Nothing here reads connection events.
                Ok(_events) => connected = true,
                Err(e) => {
                    tracing::debug!(error = %e, "Simulator transport unavailable");
                    continue;
                }
            }
        }

        let payload = match serde_json::to_vec(&reading) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode simulated reading");
                continue;
            }
        };

        match transport.publish(&topic, payload).await {
            Ok(()) => tracing::trace!(?reading, "Simulated reading published"),
            Err(e) => {
                tracing::debug!(error = %e, "Simulated reading not published");
                transport.disconnect().await;
                connected = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::TransportEvent;
    use crate::infrastructure::local_broker::LocalBroker;

    #[test]
    fn test_first_reading_sits_on_peak_tails() {
        let mut sim = DetectorSimulator::new();
        let [primary, secondary] = sim.next_reading();

        assert!((primary - 2.0184).abs() < 1e-9, "primary = {primary}");
        assert!((secondary - 3.79907).abs() < 1e-9, "secondary = {secondary}");
    }

    #[test]
    fn test_primary_peaks_at_seven_minutes() {
        let mut sim = DetectorSimulator::new();
        let readings: Vec<[f64; 2]> = (0..900).map(|_| sim.next_reading()).collect();

        let apex = readings[420 - 1][0];
        assert!(apex > 50.0, "apex = {apex}");
        assert!(readings[60][0] < apex);
        assert_eq!(round5(apex), apex);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_reach_subscribers_and_survive_an_outage() {
        let broker = LocalBroker::new();
        let listener = broker.transport();
        let mut events = listener.connect().await.unwrap();
        listener.subscribe("lab/signal").await.unwrap();

        let simulator = tokio::spawn(run(
            Arc::new(broker.transport()),
            "lab/signal".to_string(),
            Duration::from_secs(1),
        ));

        let (topic, payload) = match events.recv().await.unwrap() {
            TransportEvent::Message { topic, payload } => (topic, payload),
            other => panic!("expected a message, got {other:?}"),
        };
        assert_eq!(topic, "lab/signal");
        let reading: [f64; 2] = serde_json::from_slice(&payload).unwrap();
        assert_eq!(reading, [2.0184, 3.79907]);

        broker.set_online(false);
        assert_eq!(events.recv().await, Some(TransportEvent::Offline));
        tokio::time::sleep(Duration::from_secs(3)).await;
        broker.set_online(true);

        let next = loop {
            match events.recv().await.unwrap() {
                TransportEvent::Message { payload, .. } => break payload,
                _ => continue,
            }
        };
        let reading: [f64; 2] = serde_json::from_slice(&next).unwrap();
        assert!(reading[0] > 1.0);
        simulator.abort();
    }
}
