use crate::error::{MonitorError, Result};

/// Parse a Kubernetes CPU quantity ("250m", "2", "0.5") into cores.
pub fn parse_cpu(q: &str) -> Result<f64> {
    let q = q.trim();
    let value = match q.strip_suffix('m') {
        Some(millis) => millis.parse::<f64>().map(|m| m / 1000.0),
        None => q.parse::<f64>(),
    };
    value
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MonitorError::Quantity {
            kind: "cpu",
            input: q.to_string(),
        })
}

/// Parse a CPU figure reported by metrics.k8s.io into cores.
///
/// metrics-server reports usage in nanocores ("137410546n") or microcores
/// ("250000u"); anything else goes through [`parse_cpu`].
pub fn parse_usage_cpu(q: &str) -> Result<f64> {
    let q = q.trim();
    let scaled = if let Some(nanos) = q.strip_suffix('n') {
        Some((nanos, 1e9))
    } else {
        q.strip_suffix('u').map(|micros| (micros, 1e6))
    };
    match scaled {
        Some((digits, per_core)) => digits
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v / per_core)
            .ok_or_else(|| MonitorError::Quantity {
                kind: "cpu",
                input: q.to_string(),
            }),
        None => parse_cpu(q),
    }
}

/// Parse a Kubernetes memory quantity ("1Gi", "512Mi", "2M", "1024") into bytes.
pub fn parse_memory(q: &str) -> Result<f64> {
    let q = q.trim();

    // Binary suffixes are case-sensitive, decimal ones accept both cases.
    // Order matters: "Mi" must be tried before "M"/"m".
    const BINARY_UNITS: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ];
    const DECIMAL_UNITS: &[(char, f64)] = &[
        ('k', 1e3),
        ('m', 1e6),
        ('g', 1e9),
        ('t', 1e12),
        ('p', 1e15),
    ];

    let invalid = || MonitorError::Quantity {
        kind: "memory",
        input: q.to_string(),
    };

    let number = |s: &str| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(invalid)
    };

    for (suf, mul) in BINARY_UNITS {
        if let Some(stripped) = q.strip_suffix(suf) {
            return number(stripped).map(|v| v * mul);
        }
    }
    if let Some(last) = q.chars().last() {
        let lower = last.to_ascii_lowercase();
        if let Some((_, mul)) = DECIMAL_UNITS.iter().find(|(c, _)| *c == lower) {
            let stripped = &q[..q.len() - last.len_utf8()];
            return number(stripped).map(|v| v * mul);
        }
    }
    number(q)
}

/// `usage / capacity * 100`, or 0 when capacity is not positive.
pub fn percent_of(usage: f64, capacity: f64) -> f64 {
    if capacity > 0.0 {
        usage / capacity * 100.0
    } else {
        0.0
    }
}
