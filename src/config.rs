use crate::core::{GridError, Result};
use serde::{Deserialize, Serialize};

/// Placement algorithm used to compute partition owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AffinityStrategy {
    /// Consistent hashing over a virtual-node ring.
    #[default]
    ConsistentHash,
    /// Highest-random-weight hashing.
    Rendezvous,
}

/// What to do when the membership view is too small for the configured backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientNodesPolicy {
    /// Assign `members - 1` backups and report the reduction.
    #[default]
    ReduceBackups,
    /// Refuse to compute an assignment.
    Fail,
}

/// Affinity core configuration
///
/// Immutable for the lifetime of a grid instance: the partition count in
/// particular must agree on every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    /// Number of partitions the keyspace is split into
    pub partition_count: u32,

    /// Number of backup copies per partition (0 means primary only)
    pub backups: u32,

    /// Placement algorithm
    pub strategy: AffinityStrategy,

    /// Ring points per member (consistent hashing only)
    pub virtual_nodes: u32,

    /// Number of assignment versions kept in history
    pub history_retention: usize,

    /// Behaviour when there are fewer members than `backups + 1`
    pub insufficient_nodes: InsufficientNodesPolicy,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            partition_count: 1024,
            backups: 0,
            strategy: AffinityStrategy::ConsistentHash,
            virtual_nodes: 128,
            history_retention: 10,
            insufficient_nodes: InsufficientNodesPolicy::ReduceBackups,
        }
    }
}

impl AffinityConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the partition count
    pub fn partition_count(mut self, partitions: u32) -> Self {
        self.partition_count = partitions;
        self
    }

    /// Set the backup count
    pub fn backups(mut self, backups: u32) -> Self {
        self.backups = backups;
        self
    }

    /// Set the placement strategy
    pub fn strategy(mut self, strategy: AffinityStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set ring points per member
    pub fn virtual_nodes(mut self, virtual_nodes: u32) -> Self {
        self.virtual_nodes = virtual_nodes;
        self
    }

    /// Set history retention
    pub fn history_retention(mut self, retention: usize) -> Self {
        self.history_retention = retention;
        self
    }

    /// Set the insufficient-nodes policy
    pub fn insufficient_nodes(mut self, policy: InsufficientNodesPolicy) -> Self {
        self.insufficient_nodes = policy;
        self
    }

    /// Parse from JSON; missing fields take their defaults
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = AffinityConfig::from_json(r#"{"partition_count": 256, "backups": 1}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GridError::InvalidConfiguration(e.to_string()))?;
        config.validate().map_err(GridError::InvalidConfiguration)?;
        Ok(config)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| GridError::InvalidConfiguration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.partition_count == 0 {
            return Err("partition_count must be > 0".to_string());
        }

        if self.virtual_nodes == 0 {
            return Err("virtual_nodes must be > 0".to_string());
        }

        if self.history_retention == 0 {
            return Err("history_retention must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AffinityConfig::default();
        assert_eq!(config.partition_count, 1024);
        assert_eq!(config.backups, 0);
        assert_eq!(config.history_retention, 10);
        assert_eq!(config.strategy, AffinityStrategy::ConsistentHash);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = AffinityConfig::new()
            .partition_count(64)
            .backups(2)
            .strategy(AffinityStrategy::Rendezvous)
            .insufficient_nodes(InsufficientNodesPolicy::Fail);

        assert_eq!(config.partition_count, 64);
        assert_eq!(config.backups, 2);
        assert_eq!(config.strategy, AffinityStrategy::Rendezvous);
        assert_eq!(config.insufficient_nodes, InsufficientNodesPolicy::Fail);
    }

    #[test]
    fn test_config_validation() {
        assert!(AffinityConfig::new().partition_count(0).validate().is_err());
        assert!(AffinityConfig::new().virtual_nodes(0).validate().is_err());
        assert!(AffinityConfig::new().history_retention(0).validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            AffinityConfig::from_json(r#"{"partition_count": 256, "strategy": "rendezvous"}"#)
                .unwrap();
        assert_eq!(config.partition_count, 256);
        assert_eq!(config.strategy, AffinityStrategy::Rendezvous);
        assert_eq!(config.virtual_nodes, 128);

        let round = AffinityConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(round, config);

        assert!(matches!(
            AffinityConfig::from_json(r#"{"partition_count": 0}"#),
            Err(GridError::InvalidConfiguration(_))
        ));
    }
}
