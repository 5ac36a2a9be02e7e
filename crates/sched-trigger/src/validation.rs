//! Field validation for Targets and Schedules: URLs (with SSRF-aware
//! checks), timezones, and cron expressions.

/// Validate a URL for safety: must be absolute http(s) and must not target
/// private/internal networks.
///
/// Blocks:
/// - Non-http(s) schemes (file://, ftp://, etc.)
/// - Loopback addresses (127.0.0.0/8, ::1)
/// - Private networks (10/8, 172.16/12, 192.168/16)
/// - Link-local addresses (169.254/16 — includes cloud metadata endpoints)
/// - Known metadata hostnames (metadata.google.internal)
/// - Userinfo in URLs (http://evil@internal tricks)
pub fn validate_url(url: &str) -> Result<(), String> {
    use std::net::{Ipv4Addr, Ipv6Addr};

    let lower = url.to_ascii_lowercase();

    let after_scheme = if let Some(r) = lower.strip_prefix("https://") {
        r
    } else if let Some(r) = lower.strip_prefix("http://") {
        r
    } else {
        return Err("URL must use http or https scheme".into());
    };

    let after_userinfo = match after_scheme.split_once('@') {
        Some((_, rest)) => rest,
        None => after_scheme,
    };

    let authority = after_userinfo.split('/').next().unwrap_or("");

    let host = if authority.starts_with('[') {
        authority.split(']').next().unwrap_or("").trim_start_matches('[')
    } else {
        authority.split(':').next().unwrap_or("")
    };

    if host.is_empty() {
        return Err("URL has empty host".into());
    }

    if host == "localhost" || host.ends_with(".localhost") || host == "metadata.google.internal" {
        return Err(format!("URL must not target internal host: {host}"));
    }

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        if ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified() || ip.is_broadcast() {
            return Err(format!("URL must not target private/internal IP: {ip}"));
        }
    }

    if let Ok(ip) = host.parse::<Ipv6Addr>() {
        if ip.is_loopback() || ip.is_unspecified() {
            return Err(format!("URL must not target private/internal IPv6: {ip}"));
        }
        let segs = ip.segments();
        if segs[..6] == [0, 0, 0, 0, 0, 0xffff] {
            let mapped = Ipv4Addr::new((segs[6] >> 8) as u8, segs[6] as u8, (segs[7] >> 8) as u8, segs[7] as u8);
            if mapped.is_loopback() || mapped.is_private() || mapped.is_link_local() || mapped.is_unspecified() {
                return Err(format!("URL must not target private/internal IP: {mapped}"));
            }
        }
    }

    Ok(())
}

/// Validate an IANA timezone string.
pub fn validate_timezone(tz: &str) -> Result<(), String> {
    if tz.parse::<chrono_tz::Tz>().is_err() {
        Err(format!("invalid timezone: '{tz}' — use IANA names like 'Asia/Kolkata' or 'UTC'"))
    } else {
        Ok(())
    }
}

/// Validate a 5-field cron expression.
pub fn validate_cron(cron: &str) -> Result<(), String> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields (minute hour dom month dow), got {}", fields.len()));
    }
    let names = ["minute", "hour", "day-of-month", "month", "day-of-week"];
    let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

    for (i, field) in fields.iter().enumerate() {
        validate_cron_field(field, names[i], ranges[i].0, ranges[i].1)?;
    }
    Ok(())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<(), String> {
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().map_err(|_| format!("{name}: invalid step '*/{step}' — expected a number"))?;
        if n == 0 || n > max {
            return Err(format!("{name}: step {n} out of range 1..={max}"));
        }
        return Ok(());
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: u32 = start_s.parse().map_err(|_| format!("{name}: invalid range start '{start_s}'"))?;
            let end: u32 = end_s.parse().map_err(|_| format!("{name}: invalid range end '{end_s}'"))?;
            if start < min || start > max || end < min || end > max {
                return Err(format!("{name}: range {start}-{end} out of bounds {min}..={max}"));
            }
            if start > end {
                return Err(format!("{name}: range start {start} > end {end}"));
            }
        } else {
            let n: u32 = part.parse().map_err(|_| format!("{name}: invalid value '{part}'"))?;
            if n < min || n > max {
                return Err(format!("{name}: value {n} out of range {min}..={max}"));
            }
        }
    }
    Ok(())
}

/// Validate the type-tag/field pairing invariant: exactly one of
/// `interval_seconds` / `cron_expression` is set, matching `schedule_type`;
/// at most one of `duration_seconds` / `max_runs` is set.
pub fn validate_schedule_fields(
    schedule_type: sched_domain::ScheduleType,
    interval_seconds: Option<u32>,
    cron_expression: Option<&str>,
    duration_seconds: Option<u64>,
    max_runs: Option<u64>,
) -> Result<(), String> {
    use sched_domain::ScheduleType;

    match schedule_type {
        ScheduleType::Interval => {
            if interval_seconds.is_none() {
                return Err("interval_seconds is required when schedule_type=interval".into());
            }
            if cron_expression.is_some() {
                return Err("cron_expression must not be set when schedule_type=interval".into());
            }
            if interval_seconds == Some(0) {
                return Err("interval_seconds must be positive".into());
            }
        }
        ScheduleType::Cron => {
            if cron_expression.is_none() {
                return Err("cron_expression is required when schedule_type=cron".into());
            }
            if interval_seconds.is_some() {
                return Err("interval_seconds must not be set when schedule_type=cron".into());
            }
            if let Some(cron) = cron_expression {
                validate_cron(cron)?;
            }
        }
    }

    if duration_seconds.is_some() && max_runs.is_some() {
        return Err("at most one of duration_seconds / max_runs may be set".into());
    }
    if duration_seconds == Some(0) {
        return Err("duration_seconds must be positive".into());
    }
    if max_runs == Some(0) {
        return Err("max_runs must be positive".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_domain::ScheduleType;

    #[test]
    fn validate_cron_accepts_valid() {
        assert!(validate_cron("0 * * * *").is_ok());
        assert!(validate_cron("*/5 9-17 * * 1-5").is_ok());
    }

    #[test]
    fn validate_cron_rejects_invalid() {
        assert!(validate_cron("* * *").is_err());
        assert!(validate_cron("60 * * * *").is_err());
        assert!(validate_cron("*/0 * * * *").is_err());
    }

    #[test]
    fn validate_url_accepts_valid() {
        assert!(validate_url("https://example.com/hook").is_ok());
        assert!(validate_url("https://8.8.8.8/dns").is_ok());
    }

    #[test]
    fn validate_url_rejects_private_and_loopback() {
        assert!(validate_url("http://127.0.0.1").is_err());
        assert!(validate_url("http://10.0.0.1").is_err());
        assert!(validate_url("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(validate_url("http://[::1]").is_err());
        assert!(validate_url("http://localhost:3000").is_err());
        assert!(validate_url("ftp://example.com").is_err());
    }

    #[test]
    fn validate_timezone_rejects_invalid() {
        assert!(validate_timezone("Not/Real").is_err());
        assert!(validate_timezone("Asia/Kolkata").is_ok());
    }

    #[test]
    fn schedule_fields_interval_requires_interval_seconds() {
        let err = validate_schedule_fields(ScheduleType::Interval, None, None, None, None);
        assert!(err.is_err(), "interval schedule without interval_seconds must be rejected");
    }

    #[test]
    fn schedule_fields_cron_requires_cron_expression() {
        let err = validate_schedule_fields(ScheduleType::Cron, None, None, None, None);
        assert!(err.is_err());
    }

    #[test]
    fn schedule_fields_rejects_both_window_kinds() {
        let err = validate_schedule_fields(ScheduleType::Interval, Some(10), None, Some(60), Some(5));
        assert!(err.is_err());
    }

    #[test]
    fn schedule_fields_accepts_valid_interval() {
        assert!(validate_schedule_fields(ScheduleType::Interval, Some(10), None, Some(60), None).is_ok());
    }

    #[test]
    fn schedule_fields_accepts_valid_cron() {
        assert!(validate_schedule_fields(ScheduleType::Cron, None, Some("*/5 * * * *"), None, Some(5)).is_ok());
    }

    #[test]
    fn schedule_fields_rejects_mismatched_tag() {
        assert!(validate_schedule_fields(ScheduleType::Interval, Some(10), Some("* * * * *"), None, None).is_err());
        assert!(validate_schedule_fields(ScheduleType::Cron, Some(10), Some("* * * * *"), None, None).is_err());
    }
}
