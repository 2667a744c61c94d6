//! Resource-Adjustment Policy: a pure, deterministic
//! function from a resource-classified TaskInstance failure to the next
//! attempt's compute-resource request.
//!
//! Determinism matters beyond testability here: a cold-resumed
//! WorkflowRun must reconstruct the exact retry ladder a hot run would
//! have produced, since nothing records the intermediate resource values
//! except the Task row itself.

use serde_json::{json, Value};

/// Why a TaskInstance's resource request was insufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    MemoryExceeded,
    RuntimeExceeded,
    Other,
}

/// How to scale resources on retry. Custom scaling callables are a
/// client-side feature; the core only ever sees the materialized
/// `{attempt -> resources}` table a callable was reduced to before
/// submission.
#[derive(Debug, Clone)]
pub enum ScalingRule {
    /// Multiply the exceeded dimension by this factor each retry.
    Multiplier(f64),
    /// Explicit resource sets consumed positionally by `attempt_index`.
    Sequence(Vec<Value>),
}

impl Default for ScalingRule {
    fn default() -> Self {
        // "Default scaling: multiply the exceeded dimension
        // by 1.5".
        Self::Multiplier(1.5)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resources {
    pub memory_bytes: i64,
    pub runtime_sec: i64,
    pub cores: i32,
}

impl Resources {
    pub fn from_json(value: &Value) -> Self {
        Self {
            memory_bytes: value
                .get("memory")
                .and_then(Value::as_str)
                .map(parse_memory)
                .unwrap_or(0),
            runtime_sec: value
                .get("runtime_sec")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            cores: value
                .get("cores")
                .and_then(Value::as_i64)
                .unwrap_or(1) as i32,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "memory": format!("{}G", self.memory_bytes / GIB),
            "runtime_sec": self.runtime_sec,
            "cores": self.cores,
        })
    }

    fn scale(&self, class: FailureClass, factor: f64) -> Self {
        match class {
            FailureClass::MemoryExceeded => Self {
                memory_bytes: ((self.memory_bytes as f64) * factor).ceil() as i64,
                ..*self
            },
            FailureClass::RuntimeExceeded => Self {
                runtime_sec: ((self.runtime_sec as f64) * factor).ceil() as i64,
                ..*self
            },
            FailureClass::Other => self.clone(),
        }
    }
}

const GIB: i64 = 1024 * 1024 * 1024;

/// Parse a memory specification. `"G"` is read as binary GiB, not decimal
/// GB, so `"G"` and `"GiB"` suffixes parse identically.
fn parse_memory(spec: &str) -> i64 {
    let spec = spec.trim();
    let (digits, unit) = spec.split_at(
        spec.find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(spec.len()),
    );
    let amount: f64 = digits.parse().unwrap_or(0.0);
    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => GIB,
        "T" | "TB" | "TIB" => 1024 * GIB,
        _ => 1,
    };
    (amount * multiplier as f64) as i64
}

/// One entry of a Task's `fallback_queues` list: a queue name plus the
/// resource ceiling it enforces.
#[derive(Debug, Clone)]
pub struct QueueLimit {
    pub name: String,
    pub max_memory_bytes: i64,
    pub max_runtime_sec: i64,
}

impl QueueLimit {
    pub fn from_json(value: &Value) -> Option<Self> {
        let name = value.get("queue").and_then(Value::as_str)?.to_owned();
        let max_memory_bytes = value
            .get("max_memory")
            .and_then(Value::as_str)
            .map(parse_memory)
            .unwrap_or(i64::MAX);
        let max_runtime_sec = value
            .get("max_runtime_sec")
            .and_then(Value::as_i64)
            .unwrap_or(i64::MAX);
        Some(Self { name, max_memory_bytes, max_runtime_sec })
    }

    fn fits(&self, r: &Resources) -> bool {
        r.memory_bytes <= self.max_memory_bytes && r.runtime_sec <= self.max_runtime_sec
    }
}

/// Outcome of applying the policy once.
#[derive(Debug, Clone)]
pub enum Adjustment {
    /// Fits within `queue`; use these resources for the next attempt.
    Retry { resources: Value, queue: String },
    /// No remaining fallback queue fits the scaled resources — the Task
    /// becomes fatal with `no_fit`.
    Exhausted,
}

/// Compute the next attempt's resources.
///
/// `current_queue_index` is the position of the queue the failed attempt
/// ran in, within `fallback_queues` (or `None` if it ran in the Task's
/// original, unlisted queue — treated as index `-1`, so the first
/// fallback queue is tried next).
pub fn next_resources(
    current: &Value,
    failure_class: FailureClass,
    scaling_rule: &ScalingRule,
    fallback_queues: &[QueueLimit],
    attempt_index: usize,
    current_queue_index: Option<usize>,
) -> Adjustment {
    let current_resources = Resources::from_json(current);

    let scaled = match scaling_rule {
        ScalingRule::Multiplier(factor) => current_resources.scale(failure_class, *factor),
        ScalingRule::Sequence(seq) => seq
            .get(attempt_index)
            .map(Resources::from_json)
            .unwrap_or_else(|| current_resources.scale(failure_class, 1.5)),
    };

    let start = current_queue_index.map(|i| i + 1).unwrap_or(0);
    for queue in &fallback_queues[start.min(fallback_queues.len())..] {
        if queue.fits(&scaled) {
            return Adjustment::Retry { resources: scaled.to_json(), queue: queue.name.clone() };
        }
    }

    Adjustment::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_suffix_g_and_gib_parse_identically() {
        assert_eq!(parse_memory("4G"), parse_memory("4GiB"));
        assert_eq!(parse_memory("4G"), 4 * GIB);
    }

    #[test]
    fn default_scaling_multiplies_exceeded_dimension_by_one_point_five() {
        let current = json!({ "memory": "4G", "runtime_sec": 3600, "cores": 2 });
        let queues = vec![QueueLimit { name: "long.q".into(), max_memory_bytes: i64::MAX, max_runtime_sec: i64::MAX }];
        let result = next_resources(&current, FailureClass::MemoryExceeded, &ScalingRule::default(), &queues, 1, None);
        match result {
            Adjustment::Retry { resources, .. } => {
                let r = Resources::from_json(&resources);
                assert_eq!(r.memory_bytes, (4.0 * GIB as f64 * 1.5) as i64);
                assert_eq!(r.runtime_sec, 3600);
            }
            Adjustment::Exhausted => panic!("expected a fit"),
        }
    }

    #[test]
    fn other_failure_class_repeats_current_resources() {
        let current = json!({ "memory": "4G", "runtime_sec": 3600, "cores": 2 });
        let queues = vec![QueueLimit { name: "q".into(), max_memory_bytes: i64::MAX, max_runtime_sec: i64::MAX }];
        let result = next_resources(&current, FailureClass::Other, &ScalingRule::default(), &queues, 1, None);
        match result {
            Adjustment::Retry { resources, .. } => {
                assert_eq!(Resources::from_json(&resources), Resources::from_json(&current));
            }
            Adjustment::Exhausted => panic!("expected a fit"),
        }
    }

    #[test]
    fn exhausting_every_fallback_queue_yields_no_fit() {
        let current = json!({ "memory": "4G", "runtime_sec": 3600, "cores": 1 });
        // No fallback queues at all: empty list is "no further queue fits".
        let queues: Vec<QueueLimit> = vec![];
        let result = next_resources(&current, FailureClass::RuntimeExceeded, &ScalingRule::default(), &queues, 1, None);
        assert!(matches!(result, Adjustment::Exhausted));
    }

    #[test]
    fn scaled_resources_exceeding_every_queue_limit_is_no_fit() {
        let current = json!({ "memory": "4G", "runtime_sec": 3600, "cores": 1 });
        let queues = vec![QueueLimit { name: "short.q".into(), max_memory_bytes: 5 * GIB, max_runtime_sec: i64::MAX }];
        // 4G * 1.5 = 6G, exceeds the 5G ceiling on the only fallback queue.
        let result = next_resources(&current, FailureClass::MemoryExceeded, &ScalingRule::default(), &queues, 1, None);
        assert!(matches!(result, Adjustment::Exhausted));
    }

    #[test]
    fn sequence_scaling_is_consumed_positionally_by_attempt() {
        let current = json!({ "memory": "1G", "runtime_sec": 60, "cores": 1 });
        let seq = ScalingRule::Sequence(vec![
            json!({ "memory": "2G", "runtime_sec": 60, "cores": 1 }),
            json!({ "memory": "4G", "runtime_sec": 60, "cores": 1 }),
        ]);
        let queues = vec![QueueLimit { name: "q".into(), max_memory_bytes: i64::MAX, max_runtime_sec: i64::MAX }];
        let result = next_resources(&current, FailureClass::MemoryExceeded, &seq, &queues, 1, None);
        match result {
            Adjustment::Retry { resources, .. } => {
                assert_eq!(Resources::from_json(&resources).memory_bytes, 4 * GIB);
            }
            Adjustment::Exhausted => panic!("expected a fit"),
        }
    }
}
