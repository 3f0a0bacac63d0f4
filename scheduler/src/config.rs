//! Scheduler configuration.

use crate::calendar::CalendarExpression;

/// Main scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Calendar expression for recurring settlement.
    pub schedule: String,
    /// Fire once immediately after arming.
    pub fire_on_start: bool,
    /// Log level.
    pub log_level: String,
    /// Emit logs as JSON.
    pub log_json: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule: "@hourly".to_string(),
            fire_on_start: false,
            log_level: "info".to_string(),
            log_json: true,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(schedule) = lookup("SETTLE_SCHEDULE") {
            config.schedule = schedule;
        }

        if let Some(flag) = lookup("SETTLE_FIRE_ON_START") {
            if let Some(flag) = parse_flag(&flag) {
                config.fire_on_start = flag;
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(flag) = lookup("SETTLE_LOG_JSON") {
            if let Some(flag) = parse_flag(&flag) {
                config.log_json = flag;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.schedule.trim().is_empty() {
            return Err("Schedule cannot be empty".to_string());
        }

        CalendarExpression::parse(&self.schedule)
            .map_err(|e| format!("Invalid schedule '{}': {}", self.schedule, e))?;

        if self.log_level.trim().is_empty() {
            return Err("Log level cannot be empty".to_string());
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.schedule, "@hourly");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = SchedulerConfig::default();
        config.schedule = String::new();
        assert!(config.validate().is_err());

        config.schedule = "0 0 31 2 *".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("SETTLE_SCHEDULE", "30 2 * * *"),
            ("SETTLE_FIRE_ON_START", "yes"),
            ("LOG_LEVEL", "debug"),
            ("SETTLE_LOG_JSON", "false"),
        ]));
        assert_eq!(config.schedule, "30 2 * * *");
        assert!(config.fire_on_start);
        assert_eq!(config.log_level, "debug");
        assert!(!config.log_json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unparseable_flag_keeps_default() {
        let config = SchedulerConfig::from_lookup(lookup(&[("SETTLE_LOG_JSON", "maybe")]));
        assert!(config.log_json);
    }
}
