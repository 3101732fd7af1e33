//! Dynamic topic config allow-list
//!
//! Every declared config key must be listed here with a [`ValueRule`].
//! Values are normalized before diffing so that `7d` and `604800000`
//! compare equal against what the cluster reports.
//!
//! | Rule | Keys |
//! |------|------|
//! | duration | `retention.ms`, `segment.ms`, `delete.retention.ms`, ... |
//! | long | `retention.bytes`, `local.retention.bytes`, `flush.messages` |
//! | int | `max.message.bytes`, `segment.bytes`, `min.insync.replicas`, ... |
//! | ratio | `min.cleanable.dirty.ratio` |
//! | bool | `preallocate`, `unclean.leader.election.enable`, ... |
//! | enum | `cleanup.policy`, `compression.type`, `message.timestamp.type` |

use std::collections::BTreeMap;

/// Cleanup policy values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    Delete,
    Compact,
    CompactDelete,
}

impl std::fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupPolicy::Delete => write!(f, "delete"),
            CleanupPolicy::Compact => write!(f, "compact"),
            CleanupPolicy::CompactDelete => write!(f, "compact,delete"),
        }
    }
}

impl std::str::FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match normalized.to_lowercase().as_str() {
            "delete" => Ok(CleanupPolicy::Delete),
            "compact" => Ok(CleanupPolicy::Compact),
            "compact,delete" | "delete,compact" => Ok(CleanupPolicy::CompactDelete),
            _ => Err(format!("Invalid cleanup policy: {}", s)),
        }
    }
}

/// Compression type values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Uncompressed,
    Producer,
    Lz4,
    Zstd,
    Snappy,
    Gzip,
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionType::Uncompressed => write!(f, "uncompressed"),
            CompressionType::Producer => write!(f, "producer"),
            CompressionType::Lz4 => write!(f, "lz4"),
            CompressionType::Zstd => write!(f, "zstd"),
            CompressionType::Snappy => write!(f, "snappy"),
            CompressionType::Gzip => write!(f, "gzip"),
        }
    }
}

impl std::str::FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uncompressed" => Ok(CompressionType::Uncompressed),
            "producer" => Ok(CompressionType::Producer),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            "snappy" => Ok(CompressionType::Snappy),
            "gzip" => Ok(CompressionType::Gzip),
            _ => Err(format!("Invalid compression type: {}", s)),
        }
    }
}

/// Message timestamp type values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampType {
    CreateTime,
    LogAppendTime,
}

impl std::fmt::Display for TimestampType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimestampType::CreateTime => write!(f, "CreateTime"),
            TimestampType::LogAppendTime => write!(f, "LogAppendTime"),
        }
    }
}

impl std::str::FromStr for TimestampType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CreateTime" => Ok(TimestampType::CreateTime),
            "LogAppendTime" => Ok(TimestampType::LogAppendTime),
            _ => Err(format!("Invalid message timestamp type: {}", s)),
        }
    }
}

/// Value rule of an allow-listed config key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRule {
    /// Milliseconds, or a humanized duration such as `7d`
    Duration { min: i64 },
    Long { min: i64 },
    Int { min: i32 },
    /// Decimal in `[0, 1]`
    Ratio,
    Bool,
    CleanupPolicy,
    Compression,
    TimestampType,
}

impl std::fmt::Display for ValueRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueRule::Duration { min } => {
                write!(f, "duration in ms >= {} or <n>(ms|s|m|h|d)", min)
            }
            ValueRule::Long { min } => write!(f, "integer >= {}", min),
            ValueRule::Int { min } => write!(f, "32-bit integer >= {}", min),
            ValueRule::Ratio => write!(f, "decimal between 0 and 1"),
            ValueRule::Bool => write!(f, "true or false"),
            ValueRule::CleanupPolicy => write!(f, "delete, compact or compact,delete"),
            ValueRule::Compression => {
                write!(f, "uncompressed, zstd, lz4, snappy, gzip or producer")
            }
            ValueRule::TimestampType => write!(f, "CreateTime or LogAppendTime"),
        }
    }
}

impl std::str::FromStr for ValueRule {
    type Err = String;

    /// Look up the rule for a config key
    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let rule = match key {
            "retention.ms" => ValueRule::Duration { min: -1 },
            "local.retention.ms" => ValueRule::Duration { min: -2 },
            "segment.ms" | "max.compaction.lag.ms" => ValueRule::Duration { min: 1 },
            "segment.jitter.ms"
            | "delete.retention.ms"
            | "file.delete.delay.ms"
            | "flush.ms"
            | "min.compaction.lag.ms"
            | "message.timestamp.difference.max.ms" => ValueRule::Duration { min: 0 },
            "retention.bytes" => ValueRule::Long { min: -1 },
            "local.retention.bytes" => ValueRule::Long { min: -2 },
            "flush.messages" => ValueRule::Long { min: 1 },
            "max.message.bytes" | "index.interval.bytes" => ValueRule::Int { min: 0 },
            "segment.bytes" => ValueRule::Int { min: 14 },
            "segment.index.bytes" => ValueRule::Int { min: 4 },
            "min.insync.replicas" => ValueRule::Int { min: 1 },
            "min.cleanable.dirty.ratio" => ValueRule::Ratio,
            "preallocate"
            | "unclean.leader.election.enable"
            | "message.downconversion.enable"
            | "remote.storage.enable" => ValueRule::Bool,
            "cleanup.policy" => ValueRule::CleanupPolicy,
            "compression.type" => ValueRule::Compression,
            "message.timestamp.type" => ValueRule::TimestampType,
            _ => return Err(format!("Unknown dynamic topic config: {}", key)),
        };
        Ok(rule)
    }
}

impl ValueRule {
    /// Check a value and return its normalized form
    pub fn normalize(&self, value: &str) -> Result<String, String> {
        let value = value.trim();
        match *self {
            ValueRule::Duration { min } => {
                let ms = parse_duration_ms(value)
                    .ok_or_else(|| format!("'{}' is not a duration", value))?;
                check_min(ms, min)?;
                Ok(ms.to_string())
            }
            ValueRule::Long { min } => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| format!("'{}' is not an integer", value))?;
                check_min(n, min)?;
                Ok(n.to_string())
            }
            ValueRule::Int { min } => {
                let n: i32 = value
                    .parse()
                    .map_err(|_| format!("'{}' is not a 32-bit integer", value))?;
                check_min(i64::from(n), i64::from(min))?;
                Ok(n.to_string())
            }
            ValueRule::Ratio => {
                let r: f64 = value
                    .parse()
                    .map_err(|_| format!("'{}' is not a decimal", value))?;
                if !(0.0..=1.0).contains(&r) {
                    return Err(format!("{} is outside [0, 1]", r));
                }
                Ok(r.to_string())
            }
            ValueRule::Bool => match value.to_lowercase().as_str() {
                "true" => Ok("true".to_string()),
                "false" => Ok("false".to_string()),
                _ => Err(format!("'{}' is not a boolean", value)),
            },
            ValueRule::CleanupPolicy => Ok(value.parse::<CleanupPolicy>()?.to_string()),
            ValueRule::Compression => Ok(value.parse::<CompressionType>()?.to_string()),
            ValueRule::TimestampType => Ok(value.parse::<TimestampType>()?.to_string()),
        }
    }
}

fn check_min(value: i64, min: i64) -> Result<(), String> {
    if value < min {
        Err(format!("{} is below the minimum of {}", value, min))
    } else {
        Ok(())
    }
}

/// Parse `604800000`, `500ms`, `30s`, `15m`, `12h` or `7d` into milliseconds
pub fn parse_duration_ms(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(ms) = value.parse::<i64>() {
        return Some(ms);
    }

    let (digits, multiplier) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60 * 1_000)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 60 * 60 * 1_000)
    } else if let Some(n) = value.strip_suffix('d') {
        (n, 24 * 60 * 60 * 1_000)
    } else {
        return None;
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()?.checked_mul(multiplier)
}

/// Validate one declared entry and return its normalized value
pub fn validate_entry(key: &str, value: &str) -> Result<String, String> {
    let rule: ValueRule = key.parse()?;
    rule.normalize(value)
        .map_err(|e| format!("{}: {} (expected {})", key, e, rule))
}

/// Normalized value for diffing; values that fail their rule are kept verbatim
pub fn normalize_value(key: &str, value: &str) -> String {
    key.parse::<ValueRule>()
        .and_then(|rule| rule.normalize(value))
        .unwrap_or_else(|_| value.trim().to_string())
}

/// Normalize a whole config map
pub fn normalize_config(config: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    config
        .iter()
        .map(|(k, v)| (k.clone(), normalize_value(k, v)))
        .collect()
}
