use crate::{allocation_policy::SelectionRule, types::Priority};
use serde::{Deserialize, Serialize};

/// Days from allocation to the SLA deadline, per case priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlaDays {
    pub low: i64,
    pub medium: i64,
    pub high: i64,
}

impl SlaDays {
    pub fn for_priority(&self, priority: Priority) -> i64 {
        match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeskConfig {
    /// How long a writer waits on a locked database before the call fails
    /// with a retryable conflict.
    pub busy_timeout_ms: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub sla_days: SlaDays,
    /// Rule applied by `auto` allocation, and by `priority-based` for
    /// non-high-priority cases.
    pub auto_rule: SelectionRule,
    /// Number of agencies reported in a metrics snapshot.
    pub top_agencies: usize,
}

impl DeskConfig {
    /// Load from `<data_dir>/desk.json`.
    /// In tests, use DeskConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/desk.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: DeskConfig = serde_json::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            anyhow::bail!(
                "default_page_size {} must be within 1..={}",
                self.default_page_size,
                self.max_page_size
            );
        }
        for (label, days) in [
            ("low", self.sla_days.low),
            ("medium", self.sla_days.medium),
            ("high", self.sla_days.high),
        ] {
            if days <= 0 {
                anyhow::bail!("sla_days.{label} must be positive, got {days}");
            }
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            busy_timeout_ms: 2_000,
            default_page_size: 20,
            max_page_size: 100,
            sla_days: SlaDays {
                low: 60,
                medium: 30,
                high: 14,
            },
            auto_rule: SelectionRule::LeastLoaded,
            top_agencies: 5,
        }
    }
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self::default_test()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_parses() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");
        let config = DeskConfig::load(dir).unwrap();
        assert_eq!(config.default_page_size, 20);
        assert!(config.sla_days.high < config.sla_days.low);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let mut config = DeskConfig::default_test();
        config.default_page_size = 0;
        assert!(config.check().is_err());
    }
}
