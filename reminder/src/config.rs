//! Scheduler settings and lead-time parsing (`"24h,1h"`, units `d`, `h`, `m`).

use std::time::Duration as StdDuration;

use chrono::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderConfig {
    /// Longest first, no duplicates, all positive.
    lead_times: Vec<Duration>,
    pub tick_interval: StdDuration,
    pub delivery_timeout: StdDuration,
}

impl ReminderConfig {
    /// Sorts lead times longest first and drops duplicates and non-positive values.
    pub fn new(
        lead_times: Vec<Duration>,
        tick_interval: StdDuration,
        delivery_timeout: StdDuration,
    ) -> Self {
        let mut lead_times: Vec<Duration> = lead_times
            .into_iter()
            .filter(|d| *d > Duration::zero())
            .collect();
        lead_times.sort_by(|a, b| b.cmp(a));
        lead_times.dedup();
        Self {
            lead_times,
            tick_interval,
            delivery_timeout,
        }
    }

    pub fn lead_times(&self) -> &[Duration] {
        &self.lead_times
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self::new(
            vec![Duration::hours(24), Duration::hours(1)],
            StdDuration::from_secs(60),
            StdDuration::from_secs(5),
        )
    }
}

/// Longest accepted lead time.
pub const MAX_LEAD_DAYS: i64 = 366;

/// Parses a comma-separated list such as `24h,1h` or `2d,90m`.
pub fn parse_lead_times(raw: &str) -> Result<Vec<Duration>, String> {
    let mut leads = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let unit = part.chars().last().unwrap_or_default();
        let number = &part[..part.len() - unit.len_utf8()];
        let value: i64 = number
            .trim()
            .parse()
            .map_err(|_| format!("invalid lead time: {}", part))?;
        if value <= 0 {
            return Err(format!("lead time must be positive: {}", part));
        }
        let lead = match unit {
            'd' => Duration::try_days(value),
            'h' => Duration::try_hours(value),
            'm' => Duration::try_minutes(value),
            _ => return Err(format!("invalid lead time unit in {} (use d, h or m)", part)),
        };
        match lead {
            Some(lead) if lead <= Duration::days(MAX_LEAD_DAYS) => leads.push(lead),
            _ => {
                return Err(format!(
                    "lead time too long: {} (at most {}d)",
                    part, MAX_LEAD_DAYS
                ))
            }
        }
    }
    if leads.is_empty() {
        return Err("no lead times configured".to_string());
    }
    Ok(leads)
}

/// Short human form of a lead time: `90m`, `24h`, `3d`.
pub fn format_lead(lead: Duration) -> String {
    let minutes = lead.num_minutes();
    if minutes % 60 != 0 {
        format!("{}m", minutes)
    } else if minutes % (24 * 60) == 0 && minutes >= 48 * 60 {
        format!("{}d", minutes / (24 * 60))
    } else {
        format!("{}h", minutes / 60)
    }
}
