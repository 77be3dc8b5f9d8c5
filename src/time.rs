const SECONDS_PER_UNIT: [(char, i64); 7] = [
    ('s', 1),
    ('m', 60),
    ('h', 3_600),
    ('d', 86_400),
    ('w', 604_800),
    ('M', 2_592_000),
    ('y', 31_536_000),
];

/// Parses an interval such as `5m` or `2h` into whole seconds.
///
/// Accepted units are `s`, `m`, `h`, `d`, `w`, `M` (30 days) and `y`
/// (365 days). The numeric part must be a non-negative integer.
pub fn parse_interval_seconds(interval: &str) -> Result<i64, String> {
    let trimmed = interval.trim();
    let Some(unit) = trimmed.chars().last() else {
        return Err("Invalid interval string format: empty".to_string());
    };
    let digits = &trimmed[..trimmed.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid interval string format: {interval}"));
    }

    let multiplier = SECONDS_PER_UNIT
        .iter()
        .find(|(candidate, _)| *candidate == unit)
        .map(|(_, seconds)| *seconds)
        .ok_or_else(|| format!("Invalid interval string format: {interval}"))?;

    let size: i64 = digits
        .parse()
        .map_err(|_| format!("Invalid interval string format: {interval}"))?;
    size.checked_mul(multiplier)
        .ok_or_else(|| format!("interval too large: {interval}"))
}
