use serde::{Deserialize, Serialize};

use crate::message::DeliveryMode;

/// Top-level configuration settings for the engine.
///
/// Includes settings for the broker, producer defaults and logging.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub producer: ProducerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the broker.
///
/// `auto_create_destinations` lets producers and consumers use a named queue or
/// topic without declaring it first.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub auto_create_destinations: bool,
}

/// Defaults applied to every new `MessageProducer`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProducerSettings {
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    pub time_to_live_ms: i64,
    pub delivery_delay_ms: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub producer: Option<PartialProducerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub auto_create_destinations: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialProducerSettings {
    pub delivery_mode: Option<DeliveryMode>,
    pub priority: Option<u8>,
    pub time_to_live_ms: Option<i64>,
    pub delivery_delay_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                auto_create_destinations: true,
            },
            producer: ProducerSettings {
                delivery_mode: DeliveryMode::Persistent,
                priority: 4,
                time_to_live_ms: 0,
                delivery_delay_ms: 0,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlay the values present in `self` on top of `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let broker = self.broker;
        let producer = self.producer;
        let logging = self.logging;

        Settings {
            broker: BrokerSettings {
                auto_create_destinations: broker
                    .as_ref()
                    .and_then(|b| b.auto_create_destinations)
                    .unwrap_or(default.broker.auto_create_destinations),
            },
            producer: ProducerSettings {
                delivery_mode: producer
                    .as_ref()
                    .and_then(|p| p.delivery_mode)
                    .unwrap_or(default.producer.delivery_mode),
                priority: producer
                    .as_ref()
                    .and_then(|p| p.priority)
                    .unwrap_or(default.producer.priority),
                time_to_live_ms: producer
                    .as_ref()
                    .and_then(|p| p.time_to_live_ms)
                    .unwrap_or(default.producer.time_to_live_ms),
                delivery_delay_ms: producer
                    .as_ref()
                    .and_then(|p| p.delivery_delay_ms)
                    .unwrap_or(default.producer.delivery_delay_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
