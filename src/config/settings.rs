use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

use crate::broker::events::EventKind;
use crate::broker::message::TopicSpec;
use crate::retry::RetryStrategy;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub kafka: KafkaSettings,
    pub hub: HubSettings,
    pub retry: RetrySettings,
    pub outbox: OutboxSettings,
    pub log_level: String,
}

/// Where the push hub listens. Upgrades are only accepted on `path`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub group_id: String,
    pub topics: Vec<String>,
    pub partitions: u32,
    pub replication_factor: u32,
    pub message_timeout_ms: u64,
}

impl KafkaSettings {
    pub fn topic_specs(&self) -> Vec<TopicSpec> {
        self.topics
            .iter()
            .map(|name| TopicSpec::new(name.clone(), self.partitions, self.replication_factor))
            .collect()
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

/// Connection management knobs for the broadcast registry.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HubSettings {
    pub send_queue_capacity: usize,
    pub ping_interval_secs: u64,
    pub liveness_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub write_timeout_secs: u64,
}

impl HubSettings {
    // Timers need a non-zero period; zero is rejected by `validate` and
    // clamped here for settings built in code.
    const MIN_PERIOD: Duration = Duration::from_secs(1);

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs).max(Self::MIN_PERIOD)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs).max(Self::MIN_PERIOD)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs).max(Self::MIN_PERIOD)
    }

    /// Rejects zero intervals and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("hub.ping_interval_secs", self.ping_interval_secs),
            ("hub.liveness_timeout_secs", self.liveness_timeout_secs),
            ("hub.sweep_interval_secs", self.sweep_interval_secs),
            ("hub.write_timeout_secs", self.write_timeout_secs),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Message(format!("{name} must be greater than zero"))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
    pub backoff: f64,
}

impl RetryPolicy {
    pub fn strategy(&self) -> RetryStrategy {
        RetryStrategy::new(
            self.attempts,
            Duration::from_millis(self.delay_ms),
            self.backoff,
        )
    }
}

/// Retry budgets for fetching, publishing and topic provisioning.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetrySettings {
    pub fetch: RetryPolicy,
    pub publish: RetryPolicy,
    pub provision: RetryPolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OutboxSettings {
    pub capacity: usize,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub kafka: Option<PartialKafkaSettings>,
    pub hub: Option<PartialHubSettings>,
    pub retry: Option<PartialRetrySettings>,
    pub outbox: Option<PartialOutboxSettings>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialKafkaSettings {
    pub brokers: Option<Vec<String>>,
    pub group_id: Option<String>,
    pub topics: Option<Vec<String>>,
    pub partitions: Option<u32>,
    pub replication_factor: Option<u32>,
    pub message_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHubSettings {
    pub send_queue_capacity: Option<usize>,
    pub ping_interval_secs: Option<u64>,
    pub liveness_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRetryPolicy {
    pub attempts: Option<u32>,
    pub delay_ms: Option<u64>,
    pub backoff: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRetrySettings {
    pub fetch: Option<PartialRetryPolicy>,
    pub publish: Option<PartialRetryPolicy>,
    pub provision: Option<PartialRetryPolicy>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialOutboxSettings {
    pub capacity: Option<usize>,
}

impl PartialSettings {
    /// Overlays the values that are present onto `default`.
    pub fn merge(self, default: Settings) -> Settings {
        Settings {
            server: self.server.unwrap_or_default().merge(default.server),
            kafka: self.kafka.unwrap_or_default().merge(default.kafka),
            hub: self.hub.unwrap_or_default().merge(default.hub),
            retry: self.retry.unwrap_or_default().merge(default.retry),
            outbox: self.outbox.unwrap_or_default().merge(default.outbox),
            log_level: self.log_level.unwrap_or(default.log_level),
        }
    }
}

impl PartialServerSettings {
    fn merge(self, default: ServerSettings) -> ServerSettings {
        ServerSettings {
            host: self.host.unwrap_or(default.host),
            port: self.port.unwrap_or(default.port),
            path: self.path.unwrap_or(default.path),
        }
    }
}

impl PartialKafkaSettings {
    fn merge(self, default: KafkaSettings) -> KafkaSettings {
        KafkaSettings {
            brokers: self.brokers.unwrap_or(default.brokers),
            group_id: self.group_id.unwrap_or(default.group_id),
            topics: self.topics.unwrap_or(default.topics),
            partitions: self.partitions.unwrap_or(default.partitions),
            replication_factor: self
                .replication_factor
                .unwrap_or(default.replication_factor),
            message_timeout_ms: self
                .message_timeout_ms
                .unwrap_or(default.message_timeout_ms),
        }
    }
}

impl PartialHubSettings {
    fn merge(self, default: HubSettings) -> HubSettings {
        HubSettings {
            send_queue_capacity: self
                .send_queue_capacity
                .unwrap_or(default.send_queue_capacity),
            ping_interval_secs: self
                .ping_interval_secs
                .unwrap_or(default.ping_interval_secs),
            liveness_timeout_secs: self
                .liveness_timeout_secs
                .unwrap_or(default.liveness_timeout_secs),
            sweep_interval_secs: self
                .sweep_interval_secs
                .unwrap_or(default.sweep_interval_secs),
            write_timeout_secs: self
                .write_timeout_secs
                .unwrap_or(default.write_timeout_secs),
        }
    }
}

impl PartialRetryPolicy {
    fn merge(self, default: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.unwrap_or(default.attempts),
            delay_ms: self.delay_ms.unwrap_or(default.delay_ms),
            backoff: self.backoff.unwrap_or(default.backoff),
        }
    }
}

impl PartialRetrySettings {
    fn merge(self, default: RetrySettings) -> RetrySettings {
        RetrySettings {
            fetch: self.fetch.unwrap_or_default().merge(default.fetch),
            publish: self.publish.unwrap_or_default().merge(default.publish),
            provision: self.provision.unwrap_or_default().merge(default.provision),
        }
    }
}

impl PartialOutboxSettings {
    fn merge(self, default: OutboxSettings) -> OutboxSettings {
        OutboxSettings {
            capacity: self.capacity.unwrap_or(default.capacity),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            ping_interval_secs: 54,
            liveness_timeout_secs: 70,
            sweep_interval_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 9095,
                path: "/ws".to_string(),
            },
            kafka: KafkaSettings {
                brokers: vec!["kafka:9094".to_string()],
                group_id: "notification-group".to_string(),
                topics: EventKind::all_topics(),
                partitions: 1,
                replication_factor: 1,
                message_timeout_ms: 5000,
            },
            hub: HubSettings::default(),
            retry: RetrySettings {
                fetch: RetryPolicy {
                    attempts: 5,
                    delay_ms: 1000,
                    backoff: 2.0,
                },
                publish: RetryPolicy {
                    attempts: 3,
                    delay_ms: 1000,
                    backoff: 3.0,
                },
                provision: RetryPolicy {
                    attempts: 3,
                    delay_ms: 1000,
                    backoff: 2.0,
                },
            },
            outbox: OutboxSettings { capacity: 1024 },
            log_level: "info".to_string(),
        }
    }
}
