//! Translation of user-facing resource limits into runtime units.

/// CPU scheduling period in microseconds.
pub const CPU_PERIOD: i64 = 100_000;

/// Invalid resource limit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error("Invalid memory limit: {0:?}")]
    InvalidMemory(String),

    #[error("Invalid CPU limit: {0}")]
    InvalidCpu(f64),
}

/// Parse a memory string ("2G", "512M", "1.5g", "1024KB", "1073741824") into bytes.
///
/// Units are binary (K = 1024). A bare number is taken as bytes.
pub fn parse_memory_bytes(value: &str) -> Result<i64, ResourceError> {
    let invalid = || ResourceError::InvalidMemory(value.to_string());

    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    let without_b = match upper.strip_suffix('B') {
        Some(rest) if !rest.is_empty() => rest,
        _ => upper.as_str(),
    };

    let (number, multiplier) = match without_b.chars().last() {
        Some('K') => (&without_b[..without_b.len() - 1], 1u64 << 10),
        Some('M') => (&without_b[..without_b.len() - 1], 1u64 << 20),
        Some('G') => (&without_b[..without_b.len() - 1], 1u64 << 30),
        Some('T') => (&without_b[..without_b.len() - 1], 1u64 << 40),
        Some(_) => (without_b, 1),
        None => return Err(invalid()),
    };

    let number: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !number.is_finite() || number <= 0.0 {
        return Err(invalid());
    }

    let bytes = (number * multiplier as f64).round();
    if bytes < 1.0 || bytes > i64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as i64)
}

/// CPU quota for `cores` cores against [`CPU_PERIOD`].
pub fn parse_cpu_quota(cores: f64) -> Result<i64, ResourceError> {
    if !cores.is_finite() || cores <= 0.0 {
        return Err(ResourceError::InvalidCpu(cores));
    }
    Ok((cores * CPU_PERIOD as f64).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory_bytes("2G"), Ok(2_147_483_648));
        assert_eq!(parse_memory_bytes("512M"), Ok(536_870_912));
        assert_eq!(parse_memory_bytes("1024k"), Ok(1_048_576));
        assert_eq!(parse_memory_bytes("1GB"), Ok(1_073_741_824));
        assert_eq!(parse_memory_bytes("1.5G"), Ok(1_610_612_736));
        assert_eq!(parse_memory_bytes("4096"), Ok(4096));
    }

    #[test]
    fn test_parse_memory_rejects_garbage() {
        for value in ["", "G", "abc", "-1G", "0", "2X"] {
            assert!(parse_memory_bytes(value).is_err(), "{value} should fail");
        }
    }

    #[test]
    fn test_cpu_quota() {
        assert_eq!(parse_cpu_quota(1.5), Ok(150_000));
        assert_eq!(parse_cpu_quota(0.25), Ok(25_000));
        assert!(parse_cpu_quota(0.0).is_err());
    }
}
