/// Parses `90d`, `12h`, `15m`, `30s`, `2w` or a bare number of seconds.
pub fn parse_duration_like(value: &str) -> Result<i64, String> {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Ok(seconds);
    }

    let (number_part, unit) = if let Some(stripped) = trimmed.strip_suffix("min") {
        (stripped, "min")
    } else if let Some(stripped) = trimmed.strip_suffix("day") {
        (stripped, "day")
    } else if let Some(stripped) = trimmed.strip_suffix("week") {
        (stripped, "week")
    } else {
        let split = trimmed
            .char_indices()
            .last()
            .map(|(idx, _)| idx)
            .unwrap_or_default();
        trimmed.split_at(split)
    };

    let multiplier = match unit {
        "s" => 1,
        "m" | "min" => 60,
        "h" => 3_600,
        "d" | "day" => 86_400,
        "w" | "week" => 604_800,
        _ => return Err(format!("unsupported duration unit: {unit}")),
    };
    let number: i64 = number_part
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {value}"))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("duration overflows: {value}"))
}

pub fn parse_timestamp_seconds(raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("timestamp cannot be empty".to_string());
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(v);
    }
    let dt = chrono::DateTime::parse_from_rfc3339(trimmed)
        .map_err(|err| format!("invalid timestamp (expected epoch seconds or RFC3339): {err}"))?;
    Ok(dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::{parse_duration_like, parse_timestamp_seconds};

    #[test]
    fn parses_duration_labels() {
        assert_eq!(parse_duration_like("90d").unwrap(), 90 * 86_400);
        assert_eq!(parse_duration_like("12h").unwrap(), 43_200);
        assert_eq!(parse_duration_like("15min").unwrap(), 900);
        assert_eq!(parse_duration_like("3600").unwrap(), 3_600);
        assert!(parse_duration_like("5y").is_err());
        assert!(parse_duration_like("").is_err());
    }

    #[test]
    fn rejects_non_ascii_units() {
        let err = parse_duration_like("90д").unwrap_err();
        assert!(err.contains("unsupported duration unit"), "{err}");
        assert!(parse_duration_like("д").is_err());
    }

    #[test]
    fn parses_epoch_and_rfc3339() {
        assert_eq!(parse_timestamp_seconds("1700000000").unwrap(), 1_700_000_000);
        assert_eq!(
            parse_timestamp_seconds("2024-01-01T00:00:00Z").unwrap(),
            1_704_067_200
        );
        assert!(parse_timestamp_seconds("yesterday").is_err());
    }
}
