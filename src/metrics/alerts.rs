//! Threshold alerts over metric samples.
//!
//! Each rule fires at most once per cooldown for a given instance. The clock
//! is passed in by the caller so evaluation is deterministic.

use crate::metrics::MetricSample;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighMemory,
    HighCpu,
    LowTps,
    ServerDown,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::HighMemory => write!(f, "high memory"),
            AlertKind::HighCpu => write!(f, "high cpu"),
            AlertKind::LowTps => write!(f, "low tps"),
            AlertKind::ServerDown => write!(f, "server down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

impl Comparison {
    fn exceeded(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => value > threshold,
            Comparison::Below => value < threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Above => ">",
            Comparison::Below => "<",
        }
    }
}

/// Sample value a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    MemoryPercent,
    CpuPercent,
    Tps,
    /// 1 when the server is up, 0 otherwise
    Up,
}

impl AlertMetric {
    /// Value of this metric in `sample`, if the sample has one.
    ///
    /// Resource and game figures only count while the server is up.
    pub fn value(self, sample: &MetricSample) -> Option<f64> {
        match self {
            AlertMetric::Up => Some(if sample.up { 1.0 } else { 0.0 }),
            _ if !sample.up => None,
            AlertMetric::MemoryPercent => sample.memory_percent(),
            AlertMetric::CpuPercent => Some(sample.cpu_percent),
            AlertMetric::Tps => sample.tps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub kind: AlertKind,
    pub metric: AlertMetric,
    pub comparison: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(with = "cooldown_secs")]
    pub cooldown: Duration,
}

mod cooldown_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl AlertRule {
    /// Built-in rules.
    pub fn defaults() -> Vec<AlertRule> {
        vec![
            AlertRule {
                kind: AlertKind::HighMemory,
                metric: AlertMetric::MemoryPercent,
                comparison: Comparison::Above,
                threshold: 90.0,
                severity: Severity::Warning,
                cooldown: Duration::from_secs(300),
            },
            AlertRule {
                kind: AlertKind::HighCpu,
                metric: AlertMetric::CpuPercent,
                comparison: Comparison::Above,
                threshold: 90.0,
                severity: Severity::Warning,
                cooldown: Duration::from_secs(300),
            },
            AlertRule {
                kind: AlertKind::LowTps,
                metric: AlertMetric::Tps,
                comparison: Comparison::Below,
                threshold: 15.0,
                severity: Severity::Critical,
                cooldown: Duration::from_secs(300),
            },
            AlertRule {
                kind: AlertKind::ServerDown,
                metric: AlertMetric::Up,
                comparison: Comparison::Below,
                threshold: 1.0,
                severity: Severity::Critical,
                cooldown: Duration::from_secs(60),
            },
        ]
    }
}

/// A fired alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub instance_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Resolved alerts kept per instance before the oldest are dropped.
pub const DEFAULT_RESOLVED_HISTORY: usize = 50;

/// Applies rules to samples and keeps alert history in memory.
///
/// Active alerts are kept until resolved. Resolved ones are capped per
/// instance at `resolved_history`, oldest resolution first out.
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    last_triggered: DashMap<(String, AlertKind), DateTime<Utc>>,
    alerts: DashMap<String, Alert>,
    resolved_history: usize,
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new(AlertRule::defaults())
    }
}

impl AlertEvaluator {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            last_triggered: DashMap::new(),
            alerts: DashMap::new(),
            resolved_history: DEFAULT_RESOLVED_HISTORY,
        }
    }

    /// Keep at most `limit` resolved alerts per instance (never fewer than one).
    pub fn with_resolved_history(mut self, limit: usize) -> Self {
        self.resolved_history = limit.max(1);
        self
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Check `sample` against every rule and return the alerts that fired.
    pub fn evaluate(&self, sample: &MetricSample, now: DateTime<Utc>) -> Vec<Alert> {
        let mut fired = Vec::new();

        for rule in &self.rules {
            let Some(value) = rule.metric.value(sample) else {
                continue;
            };
            if !rule.comparison.exceeded(value, rule.threshold) {
                continue;
            }

            let key = (sample.instance_id.clone(), rule.kind);
            if let Some(last) = self.last_triggered.get(&key) {
                // a clock that went backwards counts as inside the cooldown
                let cooling = now
                    .signed_duration_since(*last)
                    .to_std()
                    .map_or(true, |since| since < rule.cooldown);
                if cooling {
                    debug!(
                        "Alert {} for {} suppressed by cooldown",
                        rule.kind, sample.instance_id
                    );
                    continue;
                }
            }

            let alert = Alert {
                id: uuid::Uuid::new_v4().to_string(),
                instance_id: sample.instance_id.clone(),
                kind: rule.kind,
                severity: rule.severity,
                message: format!(
                    "{} on {}: {:.1} {} {}",
                    rule.kind,
                    sample.instance_id,
                    value,
                    rule.comparison.symbol(),
                    rule.threshold
                ),
                value,
                threshold: rule.threshold,
                triggered_at: now,
                resolved_at: None,
                active: true,
            };

            info!("Alert fired: {}", alert.message);
            self.last_triggered.insert(key, now);
            self.alerts.insert(alert.id.clone(), alert.clone());
            fired.push(alert);
        }

        fired
    }

    /// Mark an alert resolved. Resolving twice keeps the first resolution time.
    ///
    /// Returns `None` for unknown ids.
    pub fn resolve(&self, alert_id: &str, now: DateTime<Utc>) -> Option<Alert> {
        let resolved = {
            let mut alert = self.alerts.get_mut(alert_id)?;
            if alert.active {
                alert.active = false;
                alert.resolved_at = Some(now);
            }
            alert.clone()
        };
        self.prune_resolved(&resolved.instance_id, alert_id);
        Some(resolved)
    }

    fn prune_resolved(&self, instance_id: &str, keep: &str) {
        let mut resolved: Vec<(DateTime<Utc>, String)> = self
            .alerts
            .iter()
            .filter(|entry| !entry.active && entry.instance_id == instance_id && entry.id != keep)
            .map(|entry| (entry.resolved_at.unwrap_or(entry.triggered_at), entry.id.clone()))
            .collect();

        // `keep` takes one of the slots
        let room = self.resolved_history - 1;
        if resolved.len() <= room {
            return;
        }
        resolved.sort();
        let excess = resolved.len() - room;
        for (_, id) in resolved.into_iter().take(excess) {
            self.alerts.remove(&id);
        }
        debug!("Pruned {} resolved alerts of {}", excess, instance_id);
    }

    /// Every retained alert of an instance, active or not, oldest first.
    pub fn history(&self, instance_id: &str) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|entry| entry.instance_id == instance_id)
            .map(|entry| entry.clone())
            .collect();
        alerts.sort_by_key(|alert| alert.triggered_at);
        alerts
    }

    /// Unresolved alerts of an instance, oldest first.
    pub fn active_alerts(&self, instance_id: &str) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|entry| entry.active && entry.instance_id == instance_id)
            .map(|entry| entry.clone())
            .collect();
        alerts.sort_by_key(|alert| alert.triggered_at);
        alerts
    }

    /// Forget history of a removed instance.
    pub fn forget(&self, instance_id: &str) {
        self.alerts.retain(|_, alert| alert.instance_id != instance_id);
        self.last_triggered.retain(|(id, _), _| id != instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn busy_sample(at: DateTime<Utc>) -> MetricSample {
        let mut sample = MetricSample::down("abc123", at);
        sample.up = true;
        sample.memory_used_bytes = 95;
        sample.memory_limit_bytes = 100;
        sample.tps = Some(19.5);
        sample
    }

    fn memory_only() -> AlertEvaluator {
        AlertEvaluator::new(
            AlertRule::defaults()
                .into_iter()
                .filter(|rule| rule.kind == AlertKind::HighMemory)
                .collect(),
        )
    }

    #[test]
    fn test_cooldown_suppresses_then_expires() {
        let evaluator = memory_only();
        let t0 = Utc::now();

        assert_eq!(evaluator.evaluate(&busy_sample(t0), t0).len(), 1);

        let t1 = t0 + ChronoDuration::seconds(120);
        assert!(evaluator.evaluate(&busy_sample(t1), t1).is_empty());

        let t2 = t0 + ChronoDuration::seconds(301);
        assert_eq!(evaluator.evaluate(&busy_sample(t2), t2).len(), 1);

        assert_eq!(evaluator.active_alerts("abc123").len(), 2);
    }

    #[test]
    fn test_resolved_history_is_capped() {
        let evaluator = memory_only().with_resolved_history(2);
        let t0 = Utc::now();

        let mut fired = Vec::new();
        for i in 0..4 {
            let at = t0 + ChronoDuration::seconds(301 * i);
            fired.extend(evaluator.evaluate(&busy_sample(at), at));
        }
        assert_eq!(fired.len(), 4);

        for (i, alert) in fired.iter().enumerate() {
            let at = t0 + ChronoDuration::seconds(2000 + i as i64);
            assert!(evaluator.resolve(&alert.id, at).is_some());
        }

        let history = evaluator.history("abc123");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, fired[2].id);
        assert_eq!(history[1].id, fired[3].id);
        assert!(evaluator.resolve(&fired[0].id, t0).is_none());
    }

    #[test]
    fn test_active_alerts_survive_pruning() {
        let evaluator = memory_only().with_resolved_history(1);
        let t0 = Utc::now();
        let first = evaluator.evaluate(&busy_sample(t0), t0).remove(0);
        let t1 = t0 + ChronoDuration::seconds(301);
        let second = evaluator.evaluate(&busy_sample(t1), t1).remove(0);

        evaluator.resolve(&first.id, t1);
        let active = evaluator.active_alerts("abc123");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_eq!(evaluator.history("abc123").len(), 2);
    }

    #[test]
    fn test_cooldown_is_per_instance() {
        let evaluator = memory_only();
        let now = Utc::now();

        let mut other = busy_sample(now);
        other.instance_id = "def456".to_string();

        assert_eq!(evaluator.evaluate(&busy_sample(now), now).len(), 1);
        assert_eq!(evaluator.evaluate(&other, now).len(), 1);
    }

    #[test]
    fn test_server_down_and_low_tps() {
        let evaluator = AlertEvaluator::default();
        let now = Utc::now();

        let fired = evaluator.evaluate(&MetricSample::down("abc123", now), now);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AlertKind::ServerDown);
        assert_eq!(fired[0].severity, Severity::Critical);

        let mut laggy = busy_sample(now);
        laggy.memory_used_bytes = 10;
        laggy.tps = Some(12.0);
        let fired = evaluator.evaluate(&laggy, now);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AlertKind::LowTps);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let evaluator = memory_only();
        let t0 = Utc::now();
        let alert = evaluator.evaluate(&busy_sample(t0), t0).remove(0);

        let t1 = t0 + ChronoDuration::seconds(10);
        let resolved = evaluator.resolve(&alert.id, t1).unwrap();
        assert!(!resolved.active);
        assert_eq!(resolved.resolved_at, Some(t1));

        let again = evaluator
            .resolve(&alert.id, t1 + ChronoDuration::seconds(5))
            .unwrap();
        assert_eq!(again.resolved_at, Some(t1));
        assert!(evaluator.active_alerts("abc123").is_empty());
        assert!(evaluator.resolve("missing", t1).is_none());
    }

    #[test]
    fn test_rules_roundtrip_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Rules {
            rules: Vec<AlertRule>,
        }
        let text = toml::to_string(&Rules {
            rules: AlertRule::defaults(),
        })
        .unwrap();
        assert!(text.contains("cooldown = 300"));
        let parsed: Rules = toml::from_str(&text).unwrap();
        assert_eq!(parsed.rules, AlertRule::defaults());
    }
}
