//! Outbound telemetry publishing.
//!
//! The publish sink is fire-and-forget: QoS 0, no retain, no delivery
//! acknowledgment required by the caller. Publish failures are logged at
//! the publisher layer and never propagate, block, or retry.

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::location::LocationSample;
use crate::protocol::reassembler::CompletedFrame;

/// A fire-and-forget message publisher identified by topic name.
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Publish one payload to a topic, at-most-once.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// MQTT publish sink backed by rumqttc.
pub struct MqttSink {
    client: AsyncClient,
    driver: tokio::task::JoinHandle<()>,
}

impl MqttSink {
    /// Connect to a broker given a `mqtt://host:port` URL.
    ///
    /// The connection is lazy: rumqttc establishes and re-establishes the
    /// link from its event loop, which is spawned here and stops when the
    /// sink is dropped.
    pub fn connect(broker_url: &str, client_id: &str) -> Result<Self> {
        let (host, port) = parse_broker_url(broker_url)?;

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 16);

        let driver = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => trace!("MQTT event: {:?}", event),
                    Err(rumqttc::ConnectionError::RequestsDone) => {
                        // The client half is gone; nothing left to drive.
                        debug!("MQTT client dropped, stopping event loop");
                        break;
                    }
                    Err(e) => {
                        // rumqttc reconnects on the next poll; back off so a
                        // dead broker does not spin the loop.
                        warn!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        debug!("MQTT sink connected to {}", broker_url);

        Ok(Self { client, driver })
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl PublishSink for MqttSink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| Error::Publish {
                reason: e.to_string(),
            })
    }
}

/// Parse `mqtt://host:port` into a host and port pair.
fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| Error::Publish {
                reason: format!("invalid broker port in {url}"),
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), 1883)),
    }
}

/// The GPS coordinate record published for each location sample. Altitude
/// is dropped on the wire; field order is latitude, longitude, timestamp.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GpsCoordinate {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Fix time as milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl From<&LocationSample> for GpsCoordinate {
    fn from(sample: &LocationSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp: sample.timestamp,
        }
    }
}

/// Translates completed frames and location samples into outbound publishes
/// on their fixed topics.
pub struct TelemetryPublisher {
    sink: std::sync::Arc<dyn PublishSink>,
    frame_topic: String,
    gps_topic: String,
}

impl TelemetryPublisher {
    /// Create a publisher over a sink and a pair of topics.
    pub fn new(
        sink: std::sync::Arc<dyn PublishSink>,
        frame_topic: impl Into<String>,
        gps_topic: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            frame_topic: frame_topic.into(),
            gps_topic: gps_topic.into(),
        }
    }

    /// Publish one reassembled frame as raw bytes, no added framing.
    /// Failures are logged, never surfaced.
    pub async fn publish_frame(&self, frame: &CompletedFrame) {
        if let Err(e) = self.sink.publish(&self.frame_topic, frame.payload()).await {
            warn!("Failed to publish frame to {}: {}", self.frame_topic, e);
        } else {
            trace!(
                "Published {} byte frame to {}",
                frame.len(),
                self.frame_topic
            );
        }
    }

    /// Publish one GPS sample as a JSON coordinate record. Failures are
    /// logged, never surfaced.
    pub async fn publish_location(&self, sample: &LocationSample) {
        let coordinate = GpsCoordinate::from(sample);
        let payload = match serde_json::to_vec(&coordinate) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode GPS coordinate: {}", e);
                return;
            }
        };

        if let Err(e) = self.sink.publish(&self.gps_topic, &payload).await {
            warn!("Failed to publish location to {}: {}", self.gps_topic, e);
        } else {
            trace!("Published location to {}", self.gps_topic);
        }
    }

    /// The topic frames are published to.
    pub fn frame_topic(&self) -> &str {
        &self.frame_topic
    }

    /// The topic GPS samples are published to.
    pub fn gps_topic(&self) -> &str {
        &self.gps_topic
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Records every publish for assertion; optionally fails them all.
    pub struct RecordingSink {
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn count_for(&self, topic: &str) -> usize {
            self.published
                .lock()
                .iter()
                .filter(|(t, _)| t == topic)
                .count()
        }
    }

    #[async_trait]
    impl PublishSink for RecordingSink {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::Publish {
                    reason: "sink configured to fail".into(),
                });
            }
            self.published
                .lock()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;
    use crate::protocol::reassembler::FrameReassembler;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn frame(bytes: &[u8]) -> CompletedFrame {
        let mut reassembler = FrameReassembler::default();
        let mut terminated = bytes.to_vec();
        terminated.extend_from_slice(b"end");
        reassembler.push(&terminated).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_dropping_sink_stops_event_loop_driver() {
        // Unroutable loopback port: the event loop cycles through connection
        // errors, which must not keep the driver alive past the sink.
        let sink = MqttSink::connect("mqtt://127.0.0.1:18830", "drop-test").unwrap();
        let driver = sink.driver.abort_handle();

        drop(sink);

        for _ in 0..50 {
            if driver.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(driver.is_finished());
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://test.mosquitto.org:8080").unwrap(),
            ("test.mosquitto.org".to_string(), 8080)
        );
        assert_eq!(
            parse_broker_url("broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert!(parse_broker_url("mqtt://host:notaport").is_err());
    }

    #[tokio::test]
    async fn test_frame_published_raw() {
        let sink = Arc::new(RecordingSink::new());
        let publisher = TelemetryPublisher::new(sink.clone(), "frames", "gps");

        publisher.publish_frame(&frame(&[0x01, 0x02, 0xff])).await;

        let published = sink.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "frames");
        assert_eq!(published[0].1, vec![0x01, 0x02, 0xff]);
    }

    #[tokio::test]
    async fn test_location_published_as_json() {
        let sink = Arc::new(RecordingSink::new());
        let publisher = TelemetryPublisher::new(sink.clone(), "frames", "gps");

        let sample = LocationSample {
            latitude: 45.5,
            longitude: -73.6,
            altitude: 35.0,
            timestamp: 1_700_000_000_000,
        };
        publisher.publish_location(&sample).await;

        let published = sink.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "gps");

        let value: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(value["latitude"], 45.5);
        assert_eq!(value["longitude"], -73.6);
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        // Altitude is not part of the wire record.
        assert!(value.get("altitude").is_none());
    }

    #[tokio::test]
    async fn test_publish_failures_are_absorbed() {
        let sink = Arc::new(RecordingSink::failing());
        let publisher = TelemetryPublisher::new(sink.clone(), "frames", "gps");

        // Neither call returns an error nor panics.
        publisher.publish_frame(&frame(b"data")).await;
        publisher
            .publish_location(&LocationSample::now(0.0, 0.0, 0.0))
            .await;

        assert_eq!(sink.published.lock().len(), 0);
    }
}
