//! Configuration comes in two layers which are never mixed:
//!  - [SinkConfig] is the sink's own flat, immutable configuration (table, batching, durability).
//!  - [EngineConfig] is the upstream engine's opaque settings map. It is consulted once, at setup,
//!    for the message timeout and the store connection settings, and the tick frequency the sink
//!    needs is registered back into a copy of it.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::Result;
use crate::error::Error;
use crate::mapper::JsonFieldMapperConfig;
use crate::mutation::Durability;
use crate::store::{StoreSettings, StoreType};

const DEFAULT_BATCH_SIZE: usize = 15000;
const DEFAULT_STORE_CONFIG_KEY: &str = "rowsink.store";

/// End-to-end timeout of a record in the upstream engine, in seconds.
pub const ENGINE_MESSAGE_TIMEOUT_SECS: &str = "topology.message.timeout.secs";
/// Frequency at which the upstream engine delivers ticks to the sink, in seconds.
pub const ENGINE_TICK_FREQ_SECS: &str = "topology.tick.tuple.freq.secs";

const ENV_SINK_OBJECT: &str = "ROWSINK_SINK_OBJECT";
const ENV_ENGINE_OBJECT: &str = "ROWSINK_ENGINE_OBJECT";

/// Settings of the upstream engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineConfig {
    settings: HashMap<String, Value>,
}

impl From<HashMap<String, Value>> for EngineConfig {
    fn from(settings: HashMap<String, Value>) -> Self {
        Self { settings }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// The engine's message timeout. Engines hand out numbers as well as numeric strings.
    pub fn message_timeout_secs(&self) -> Result<Option<u64>> {
        self.get(ENGINE_MESSAGE_TIMEOUT_SECS)
            .map(|value| {
                parse_secs(value).ok_or_else(|| {
                    Error::Config(format!(
                        "{ENGINE_MESSAGE_TIMEOUT_SECS} is not a non-negative integer: {value}"
                    ))
                })
            })
            .transpose()
    }

    /// The tick frequency registered with the engine, if any.
    pub fn tick_freq_secs(&self) -> Option<u64> {
        self.get(ENGINE_TICK_FREQ_SECS).and_then(parse_secs)
    }

    /// Store connection settings stored under `key`.
    pub fn store_settings(&self, key: &str) -> Result<StoreSettings> {
        match self.get(key) {
            Some(Value::Object(map)) => Ok(map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            Some(other) => Err(Error::Config(format!(
                "store configuration under key {key:?} is not an object: {other}"
            ))),
            None => Err(Error::Config(format!(
                "store configuration not found using key {key:?}"
            ))),
        }
    }
}

fn parse_secs(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Immutable configuration of the sink, see [SinkConfigBuilder].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    table: String,
    durability: Durability,
    batch_size: usize,
    /// 0 means derive it from the engine's message timeout.
    flush_interval_secs: u64,
    store_config_key: String,
    store_type: StoreType,
    mapper: Option<JsonFieldMapperConfig>,
}

impl SinkConfig {
    pub fn builder(table: impl Into<String>) -> SinkConfigBuilder {
        SinkConfigBuilder::new(table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn flush_interval_secs(&self) -> u64 {
        self.flush_interval_secs
    }

    pub fn store_config_key(&self) -> &str {
        &self.store_config_key
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    pub fn mapper(&self) -> Option<&JsonFieldMapperConfig> {
        self.mapper.as_ref()
    }

    /// Resolves the parts of the configuration that depend on the engine. Happens once, before the
    /// sink processes anything.
    pub fn resolve(&self, engine: &EngineConfig) -> Result<ResolvedSinkConfig> {
        let mut flush_interval_secs = self.flush_interval_secs;
        if flush_interval_secs == 0 {
            if let Some(timeout) = engine.message_timeout_secs()? {
                // flush at least twice per timeout window so idle records never time out
                flush_interval_secs = timeout / 2;
                debug!(
                    flush_interval_secs,
                    "Setting flush interval based on {ENGINE_MESSAGE_TIMEOUT_SECS}"
                );
            }
        }
        if flush_interval_secs == 0 {
            return Err(Error::Config(format!(
                "flush interval is not set and cannot be derived from {ENGINE_MESSAGE_TIMEOUT_SECS}"
            )));
        }

        let store_settings = engine.store_settings(&self.store_config_key)?;

        info!(flush_interval_secs, "Enabling tick with interval");
        Ok(ResolvedSinkConfig {
            sink: self.clone(),
            flush_interval: Duration::from_secs(flush_interval_secs),
            store_settings,
        })
    }
}

/// Builds a validated [SinkConfig].
#[derive(Debug, Clone)]
pub struct SinkConfigBuilder {
    table: String,
    durability: Durability,
    batch_size: usize,
    flush_interval_secs: u64,
    store_config_key: String,
    store_type: StoreType,
    mapper: Option<JsonFieldMapperConfig>,
}

impl SinkConfigBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            durability: Durability::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_secs: 0,
            store_config_key: DEFAULT_STORE_CONFIG_KEY.to_string(),
            store_type: StoreType::default(),
            mapper: None,
        }
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn write_to_wal(self, write_to_wal: bool) -> Self {
        self.durability(Durability::from_write_to_wal(write_to_wal))
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn flush_interval_secs(mut self, flush_interval_secs: u64) -> Self {
        self.flush_interval_secs = flush_interval_secs;
        self
    }

    pub fn store_config_key(mut self, store_config_key: impl Into<String>) -> Self {
        self.store_config_key = store_config_key.into();
        self
    }

    pub fn store_type(mut self, store_type: StoreType) -> Self {
        self.store_type = store_type;
        self
    }

    pub fn mapper(mut self, mapper: JsonFieldMapperConfig) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn build(self) -> Result<SinkConfig> {
        if self.table.trim().is_empty() {
            return Err(Error::Config("table name is empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be greater than 0".to_string()));
        }
        if self.store_config_key.trim().is_empty() {
            return Err(Error::Config("store config key is empty".to_string()));
        }
        Ok(SinkConfig {
            table: self.table,
            durability: self.durability,
            batch_size: self.batch_size,
            flush_interval_secs: self.flush_interval_secs,
            store_config_key: self.store_config_key,
            store_type: self.store_type,
            mapper: self.mapper,
        })
    }
}

/// [SinkConfig] with everything derived from the engine filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSinkConfig {
    pub sink: SinkConfig,
    /// effective interval between ticks.
    pub flush_interval: Duration,
    pub store_settings: StoreSettings,
}

impl ResolvedSinkConfig {
    /// The engine settings this sink should be run with, a copy of `engine` with the tick frequency
    /// registered.
    pub fn component_configuration(&self, engine: &EngineConfig) -> EngineConfig {
        engine
            .clone()
            .with(ENGINE_TICK_FREQ_SECS, self.flush_interval.as_secs())
    }
}

/// Sink object as written by whatever assembles the topology.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SinkObject {
    table: String,
    batch_size: Option<usize>,
    flush_interval_secs: Option<u64>,
    write_to_wal: Option<bool>,
    store_config_key: Option<String>,
    store_type: Option<StoreType>,
    mapper: Option<JsonFieldMapperConfig>,
}

/// Both configuration layers, loaded from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub sink: SinkConfig,
    pub engine: EngineConfig,
}

impl Settings {
    /// Loads the base64 encoded JSON sink object and the optional engine object.
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| [ENV_SINK_OBJECT, ENV_ENGINE_OBJECT].contains(&key.as_str()))
            .collect();

        let sink_obj = env_vars.get(ENV_SINK_OBJECT).ok_or_else(|| {
            Error::Config(format!("Environment variable {ENV_SINK_OBJECT} is not set"))
        })?;
        let obj: SinkObject = decode_object(ENV_SINK_OBJECT, sink_obj)?;

        let engine = match env_vars.get(ENV_ENGINE_OBJECT) {
            Some(obj) => decode_object(ENV_ENGINE_OBJECT, obj)?,
            None => EngineConfig::default(),
        };

        let mut builder = SinkConfigBuilder::new(obj.table);
        if let Some(batch_size) = obj.batch_size {
            builder = builder.batch_size(batch_size);
        }
        if let Some(flush_interval_secs) = obj.flush_interval_secs {
            builder = builder.flush_interval_secs(flush_interval_secs);
        }
        if let Some(write_to_wal) = obj.write_to_wal {
            builder = builder.write_to_wal(write_to_wal);
        }
        if let Some(key) = obj.store_config_key {
            builder = builder.store_config_key(key);
        }
        if let Some(store_type) = obj.store_type {
            builder = builder.store_type(store_type);
        }
        if let Some(mapper) = obj.mapper {
            builder = builder.mapper(mapper);
        }

        Ok(Settings {
            sink: builder.build()?,
            engine,
        })
    }
}

fn decode_object<T: for<'de> Deserialize<'de>>(name: &str, obj: &str) -> Result<T> {
    let decoded = BASE64_STANDARD
        .decode(obj.as_bytes())
        .map_err(|e| Error::Config(format!("Failed to decode {name}: {e:?}")))?;
    serde_json::from_slice(&decoded)
        .map_err(|e| Error::Config(format!("Failed to parse {name}: {e:?}")))
}
