//! Prometheus text exposition format.
//!
//! Renders the latest sample of each instance against a fixed catalog. Every
//! catalog entry gets its `# HELP` and `# TYPE` lines exactly once per
//! document, followed by one line per instance that has a value. Availability
//! (`minecraft_up`) is always present.

use crate::instance::Instance;
use crate::metrics::MetricSample;
use crate::metrics::game_stats::{MS_PER_TICK, STARTUP_SECONDS};
use std::fmt::Write;

/// Content type of the rendered document.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prefix of every metric name.
pub const METRIC_PREFIX: &str = "minecraft_";

/// World label attached to world-scoped gauges. Per-world figures are not
/// collected; server-wide values are reported for the main world.
pub const DEFAULT_WORLD: &str = "overworld";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

/// Catalog entry. `name` excludes [`METRIC_PREFIX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
}

const fn gauge(name: &'static str, help: &'static str) -> MetricDef {
    MetricDef {
        name,
        help,
        kind: MetricKind::Gauge,
    }
}

const fn counter(name: &'static str, help: &'static str) -> MetricDef {
    MetricDef {
        name,
        help,
        kind: MetricKind::Counter,
    }
}

/// Every metric the encoder can emit, in output order.
pub const CATALOG: &[MetricDef] = &[
    gauge("up", "Whether the server container is running (1) or not (0)."),
    gauge("players_online", "Players currently online."),
    gauge("players_max", "Maximum number of players."),
    gauge("tps", "Ticks per second over the last minute."),
    gauge("ms_per_tick", "Mean time per tick in milliseconds."),
    gauge("cpu_usage_percent", "Container CPU usage in percent of host CPU time."),
    gauge("memory_used_bytes", "Container memory usage in bytes."),
    gauge("memory_limit_bytes", "Container memory limit in bytes."),
    gauge("game_memory_used_bytes", "Heap usage reported by the server in bytes."),
    counter("network_receive_bytes_total", "Bytes received by the container."),
    counter("network_transmit_bytes_total", "Bytes sent by the container."),
    counter("disk_read_bytes_total", "Bytes read from block devices."),
    counter("disk_write_bytes_total", "Bytes written to block devices."),
    gauge("startup_seconds", "Duration of the last server startup in seconds."),
    gauge("world_tps", "Ticks per second of a world."),
    gauge("world_ms_per_tick", "Mean time per tick of a world in milliseconds."),
];

/// Labels shared by every line of one instance. Empty values are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceLabels {
    pub server_id: String,
    pub server_name: String,
    pub server_type: String,
    pub version: String,
}

impl InstanceLabels {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            ..Default::default()
        }
    }

    fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("server_id", self.server_id.as_str()),
            ("server_name", self.server_name.as_str()),
            ("server_type", self.server_type.as_str()),
            ("version", self.version.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect()
    }
}

impl From<&Instance> for InstanceLabels {
    fn from(instance: &Instance) -> Self {
        Self {
            server_id: instance.id.clone(),
            server_name: instance.name.clone(),
            server_type: instance.server_type.clone(),
            version: instance.version.clone(),
        }
    }
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// One sample line: `name{labels} value [timestamp_ms]`.
pub fn format_line(name: &str, labels: &[(&str, &str)], value: f64, timestamp_ms: Option<i64>) -> String {
    let mut line = String::from(name);
    if !labels.is_empty() {
        line.push('{');
        for (i, (key, value)) in labels.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            let _ = write!(line, "{}=\"{}\"", key, escape_label_value(value));
        }
        line.push('}');
    }
    let _ = write!(line, " {}", format_value(value));
    if let Some(ts) = timestamp_ms {
        let _ = write!(line, " {}", ts);
    }
    line
}

/// Values of one catalog entry for one instance, with any extra labels.
fn values(def: &MetricDef, sample: Option<&MetricSample>) -> Vec<(Option<(&'static str, &'static str)>, f64)> {
    if def.name == "up" {
        let up = sample.is_some_and(|s| s.up);
        return vec![(None, if up { 1.0 } else { 0.0 })];
    }

    let Some(sample) = sample.filter(|s| s.up) else {
        return Vec::new();
    };

    let world = Some(("world", DEFAULT_WORLD));
    let value = match def.name {
        "players_online" => sample.players.map(f64::from),
        "players_max" => sample.max_players.map(f64::from),
        "tps" => sample.tps,
        "ms_per_tick" => sample.extensions.get(MS_PER_TICK).copied(),
        "cpu_usage_percent" => Some(sample.cpu_percent),
        "memory_used_bytes" => Some(sample.memory_used_bytes as f64),
        "memory_limit_bytes" => Some(sample.memory_limit_bytes as f64),
        "game_memory_used_bytes" => sample.game_memory_bytes.map(|b| b as f64),
        "network_receive_bytes_total" => Some(sample.network_rx_bytes as f64),
        "network_transmit_bytes_total" => Some(sample.network_tx_bytes as f64),
        "disk_read_bytes_total" => Some(sample.block_read_bytes as f64),
        "disk_write_bytes_total" => Some(sample.block_write_bytes as f64),
        "startup_seconds" => sample.extensions.get(STARTUP_SECONDS).copied(),
        "world_tps" => return sample.tps.map(|v| (world, v)).into_iter().collect(),
        "world_ms_per_tick" => {
            return sample
                .extensions
                .get(MS_PER_TICK)
                .map(|v| (world, *v))
                .into_iter()
                .collect();
        }
        _ => None,
    };
    value.map(|v| (None, v)).into_iter().collect()
}

/// Renders samples in the text exposition format.
#[derive(Debug, Clone, Default)]
pub struct ExpositionEncoder {
    include_timestamps: bool,
}

impl ExpositionEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the sample timestamp (ms since epoch) to every line.
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.include_timestamps = enabled;
        self
    }

    /// Document for a single instance.
    pub fn render(&self, labels: &InstanceLabels, sample: Option<&MetricSample>) -> String {
        self.render_all(&[(labels.clone(), sample.cloned())])
    }

    /// Document for several instances; `# HELP`/`# TYPE` appear once per metric.
    pub fn render_all(&self, instances: &[(InstanceLabels, Option<MetricSample>)]) -> String {
        let mut out = String::new();

        for def in CATALOG {
            let name = format!("{}{}", METRIC_PREFIX, def.name);
            let _ = writeln!(out, "# HELP {} {}", name, def.help);
            let _ = writeln!(out, "# TYPE {} {}", name, def.kind);

            for (labels, sample) in instances {
                let timestamp = if self.include_timestamps {
                    sample.as_ref().map(|s| s.timestamp.timestamp_millis())
                } else {
                    None
                };

                for (extra, value) in values(def, sample.as_ref()) {
                    let mut pairs = labels.pairs();
                    pairs.extend(extra);
                    out.push_str(&format_line(&name, &pairs, value, timestamp));
                    out.push('\n');
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SampleSource;
    use chrono::{TimeZone, Utc};

    fn sample() -> MetricSample {
        let mut sample = MetricSample::down("abc123", Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        sample.up = true;
        sample.tps = Some(19.8);
        sample.players = Some(3);
        sample.max_players = Some(20);
        sample.memory_used_bytes = 1_073_741_824;
        sample.source = SampleSource::Console;
        sample
    }

    #[test]
    fn test_tps_line() {
        let out = ExpositionEncoder::new().render(&InstanceLabels::new("abc123"), Some(&sample()));
        assert!(out.lines().any(|l| l == r#"minecraft_tps{server_id="abc123"} 19.8"#));
        assert_eq!(
            format_line("minecraft_tps", &[("server_id", "abc123")], 19.8, None),
            r#"minecraft_tps{server_id="abc123"} 19.8"#
        );
    }

    #[test]
    fn test_help_and_type_once() {
        let out = ExpositionEncoder::new().render_all(&[
            (InstanceLabels::new("a"), Some(sample())),
            (InstanceLabels::new("b"), Some(sample())),
        ]);
        assert_eq!(out.matches("# HELP minecraft_tps ").count(), 1);
        assert_eq!(out.matches("# TYPE minecraft_tps gauge").count(), 1);
        assert_eq!(out.matches("\nminecraft_tps{").count(), 2);
        assert!(out.contains("# TYPE minecraft_network_receive_bytes_total counter"));
    }

    #[test]
    fn test_missing_values_omitted_but_up_always_present() {
        let out = ExpositionEncoder::new().render(&InstanceLabels::new("abc123"), None);
        assert!(out.contains(r#"minecraft_up{server_id="abc123"} 0"#));
        assert!(!out.contains("minecraft_tps{"));

        let mut quiet = sample();
        quiet.tps = None;
        let out = ExpositionEncoder::new().render(&InstanceLabels::new("abc123"), Some(&quiet));
        assert!(out.contains(r#"minecraft_up{server_id="abc123"} 1"#));
        assert!(!out.contains("minecraft_tps{"));
        assert!(!out.contains("minecraft_world_tps{"));
    }

    #[test]
    fn test_full_label_set_and_world() {
        let labels = InstanceLabels {
            server_id: "abc123".to_string(),
            server_name: "My \"Best\" Server".to_string(),
            server_type: "paper".to_string(),
            version: "1.20.4".to_string(),
        };
        let out = ExpositionEncoder::new().render(&labels, Some(&sample()));
        assert!(out.contains(
            r#"minecraft_players_online{server_id="abc123",server_name="My \"Best\" Server",server_type="paper",version="1.20.4"} 3"#
        ));
        assert!(out.contains(r#"version="1.20.4",world="overworld"} 19.8"#));
    }

    #[test]
    fn test_timestamps() {
        let out = ExpositionEncoder::new()
            .with_timestamps(true)
            .render(&InstanceLabels::new("abc123"), Some(&sample()));
        assert!(out.contains(r#"minecraft_tps{server_id="abc123"} 19.8 1700000000000"#));
    }

    #[test]
    fn test_special_values() {
        assert_eq!(format_line("m", &[], f64::NAN, None), "m NaN");
        assert_eq!(format_line("m", &[], f64::INFINITY, None), "m +Inf");
        assert_eq!(format_line("m", &[], 1_073_741_824.0, None), "m 1073741824");
    }
}
