//! Telemetry sink and topic layout.
//!
//! A [`Sink`] is any publish-only transport (USB serial on the dongle, a
//! recording mock in tests).  [`Publisher`] owns it and knows the topic
//! tree:
//!
//! ```text
//! <prefix>/gateway/status              online | offline   (retained)
//! <prefix>/<NODE:08X>/text
//! <prefix>/<NODE:08X>/position/latitude
//! <prefix>/<NODE:08X>/position/longitude
//! <prefix>/<NODE:08X>/position/altitude
//! <prefix>/<NODE:08X>/telemetry/battery_level
//! <prefix>/<NODE:08X>/telemetry/voltage
//! <prefix>/<NODE:08X>/telemetry/temperature
//! <prefix>/<NODE:08X>/telemetry/humidity
//! <prefix>/<NODE:08X>/nodeinfo/long_name    (retained)
//! <prefix>/<NODE:08X>/nodeinfo/hw_model     (retained)
//! ```

use crate::codec::{Position, Telemetry, User};
use core::fmt::Write;
use heapless::String;

pub const TOPIC_STATUS: &str = "gateway/status";
pub const TOPIC_TEXT: &str = "text";
pub const TOPIC_POSITION_LAT: &str = "position/latitude";
pub const TOPIC_POSITION_LON: &str = "position/longitude";
pub const TOPIC_POSITION_ALT: &str = "position/altitude";
pub const TOPIC_TEL_BATTERY: &str = "telemetry/battery_level";
pub const TOPIC_TEL_VOLTAGE: &str = "telemetry/voltage";
pub const TOPIC_TEL_TEMP: &str = "telemetry/temperature";
pub const TOPIC_TEL_HUMIDITY: &str = "telemetry/humidity";
pub const TOPIC_NODEINFO_NAME: &str = "nodeinfo/long_name";
pub const TOPIC_NODEINFO_HW: &str = "nodeinfo/hw_model";

/// Full topic buffer: 32-byte prefix + `/XXXXXXXX/` + longest suffix.
pub type Topic = String<80>;

/// Rendered scalar value.
type Value = String<24>;

/// Publish-only telemetry transport.
pub trait Sink {
    /// Whether publishes would currently reach anyone.
    fn is_connected(&self) -> bool;

    /// Fire-and-forget publish.
    fn publish(&mut self, topic: &str, payload: &str, retain: bool);
}

/// Topic-aware front end for a [`Sink`].
///
/// Every publish is silently dropped while the sink reports not connected.
pub struct Publisher<S: Sink> {
    sink: S,
    prefix: String<32>,
}

impl<S: Sink> Publisher<S> {
    pub fn new(sink: S, prefix: &str) -> Self {
        let mut p = String::new();
        for c in prefix.trim_end_matches('/').chars() {
            if p.push(c).is_err() {
                break;
            }
        }
        Self { sink, prefix: p }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Gateway liveness, retained so late subscribers see the last state.
    pub fn set_availability(&mut self, online: bool) {
        let payload = if online { "online" } else { "offline" };
        info!("availability: {}", payload);
        if let Some(topic) = self.topic(None, TOPIC_STATUS) {
            self.send(&topic, payload, true);
        }
    }

    pub fn publish_text(&mut self, node: u32, text: &str) {
        if let Some(topic) = self.topic(Some(node), TOPIC_TEXT) {
            self.send(&topic, text, false);
        }
    }

    pub fn publish_position(&mut self, node: u32, pos: &Position) {
        self.publish_value(node, TOPIC_POSITION_LAT, fixed_point(pos.latitude_i, 7), false);
        self.publish_value(node, TOPIC_POSITION_LON, fixed_point(pos.longitude_i, 7), false);
        self.publish_value(node, TOPIC_POSITION_ALT, fmt_int(pos.altitude), false);
    }

    /// Node identity, retained.
    pub fn publish_user(&mut self, node: u32, user: &User) {
        if !user.long_name.is_empty() {
            if let Some(topic) = self.topic(Some(node), TOPIC_NODEINFO_NAME) {
                self.send(&topic, &user.long_name, true);
            }
        }
        self.publish_value(node, TOPIC_NODEINFO_HW, fmt_int(user.hw_model as i32), true);
    }

    /// Publishes only the metrics present in the report.
    pub fn publish_telemetry(&mut self, node: u32, t: &Telemetry) {
        if let Some(dev) = &t.device {
            if let Some(level) = dev.battery_level {
                self.publish_value(node, TOPIC_TEL_BATTERY, fmt_int(level as i32), false);
            }
            if let Some(v) = dev.voltage {
                self.publish_value(node, TOPIC_TEL_VOLTAGE, fmt_float(v), false);
            }
        }
        if let Some(env) = &t.environment {
            if let Some(v) = env.temperature {
                self.publish_value(node, TOPIC_TEL_TEMP, fmt_float(v), false);
            }
            if let Some(v) = env.relative_humidity {
                self.publish_value(node, TOPIC_TEL_HUMIDITY, fmt_float(v), false);
            }
        }
    }

    fn publish_value(&mut self, node: u32, suffix: &str, value: Value, retain: bool) {
        if let Some(topic) = self.topic(Some(node), suffix) {
            self.send(&topic, &value, retain);
        }
    }

    fn send(&mut self, topic: &str, payload: &str, retain: bool) {
        if !self.sink.is_connected() {
            trace!("sink offline, dropping {}", topic);
            return;
        }
        self.sink.publish(topic, payload, retain);
    }

    fn topic(&self, node: Option<u32>, suffix: &str) -> Option<Topic> {
        let mut t = Topic::new();
        let res = match node {
            Some(num) => write!(t, "{}/{:08X}/{}", self.prefix, num, suffix),
            None => write!(t, "{}/{}", self.prefix, suffix),
        };
        match res {
            Ok(()) => Some(t),
            Err(_) => {
                warn!("topic too long for suffix {}", suffix);
                None
            }
        }
    }
}

/// Render a fixed-point integer with `decimals` implied decimal places,
/// exactly (no float rounding): `fixed_point(-1224194150, 7)` is
/// `"-122.4194150"`.
pub fn fixed_point(value: i32, decimals: u32) -> Value {
    let scale = 10u64.pow(decimals);
    let abs = u64::from(value.unsigned_abs());
    let mut out = Value::new();
    let sign = if value < 0 { "-" } else { "" };
    let _ = write!(
        out,
        "{}{}.{:0width$}",
        sign,
        abs / scale,
        abs % scale,
        width = decimals as usize
    );
    out
}

fn fmt_int(value: i32) -> Value {
    let mut out = Value::new();
    let _ = write!(out, "{}", value);
    out
}

fn fmt_float(value: f32) -> Value {
    let mut out = Value::new();
    let _ = write!(out, "{:.2}", value);
    out
}
