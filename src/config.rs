//! The tuning surface: thread and queue node capacities, spin and backoff parameters and the epoch
//! advance interval.
//!
//! The process-wide [`Config`] is read once. Call [`Config::install`] before the first lock,
//! thread slot or epoch manager is used; otherwise the first read freezes [`Config::from_env`].

use crate::internal::state;
use lazy_static::lazy_static;
use parking_lot::{const_mutex, Mutex};
use std::{
    env,
    str::FromStr,
    sync::atomic::{
        AtomicBool,
        Ordering::{Acquire, Release},
    },
    time::Duration,
};

/// Largest `max_threads` a configuration may ask for. Bounded by the reader count field of the
/// queue lock state word.
pub const MAX_THREADS_LIMIT: usize = state::QUEUE_SHARED_MAX as usize;

/// Largest `max_queue_nodes` a configuration may ask for. Bounded by the tail field of the queue
/// lock state word.
pub const MAX_QUEUE_NODES_LIMIT: usize = state::TAIL_MAX as usize;

const ENV_MAX_THREADS: &str = "LOCKWOOD_MAX_THREADS";
const ENV_MAX_QUEUE_NODES: &str = "LOCKWOOD_MAX_QUEUE_NODES";
const ENV_SPIN_RETRIES: &str = "LOCKWOOD_SPIN_RETRIES";
const ENV_BACKOFF_US: &str = "LOCKWOOD_BACKOFF_US";
const ENV_EPOCH_INTERVAL_MS: &str = "LOCKWOOD_EPOCH_INTERVAL_MS";

/// Errors returned while building or installing a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key:   String,
        /// Raw value string.
        value: String,
    },
    /// A value is outside of what the lock word layout can represent.
    #[error("{key} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Configuration key.
        key:   &'static str,
        /// Rejected value.
        value: u64,
        /// Smallest accepted value.
        min:   u64,
        /// Largest accepted value.
        max:   u64,
    },
    /// The process-wide configuration was already read.
    #[error("the global configuration is frozen; install it before first use")]
    AlreadyFrozen,
    /// A queue node pool cannot serve the requested number of threads.
    #[error("queue node pool of {nodes} nodes cannot serve {threads} threads")]
    PoolTooSmall {
        /// Nodes in the pool.
        nodes:   usize,
        /// Threads the pool must serve.
        threads: usize,
    },
    /// An epoch manager has fewer per-thread records than the slot allocator hands out.
    #[error("epoch manager sized for {manager} threads, but thread slots go up to {allocator}")]
    ThreadCapacity {
        /// Records in the manager.
        manager:   usize,
        /// Capacity of the thread slot allocator.
        allocator: usize,
    },
}

/// Tuning parameters shared by every primitive in the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of thread slots, and therefore of per-thread epoch records.
    pub max_threads:     usize,
    /// Number of nodes in the global queue node pool.
    pub max_queue_nodes: usize,
    /// Pause-hinted spins before an acquisition loop sleeps.
    pub spin_retries:    u32,
    /// How long an acquisition loop sleeps once it ran out of spins.
    pub backoff:         Duration,
    /// How often the epoch manager advances the global epoch.
    pub epoch_interval:  Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_threads:     256,
            max_queue_nodes: 1024,
            spin_retries:    64,
            backoff:         Duration::from_micros(10),
            epoch_interval:  Duration::from_millis(10),
        }
    }
}

impl Config {
    /// Sets the number of thread slots.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets the size of the queue node pool.
    pub fn with_max_queue_nodes(mut self, max_queue_nodes: usize) -> Self {
        self.max_queue_nodes = max_queue_nodes;
        self
    }

    /// Sets the number of spins before sleeping.
    pub fn with_spin_retries(mut self, spin_retries: u32) -> Self {
        self.spin_retries = spin_retries;
        self
    }

    /// Sets the sleep interval used once spinning gave up.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the epoch advance interval.
    pub fn with_epoch_interval(mut self, epoch_interval: Duration) -> Self {
        self.epoch_interval = epoch_interval;
        self
    }

    /// Loads the defaults, then applies `LOCKWOOD_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `LOCKWOOD_*` environment overrides in-place, then validates the result.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_value(ENV_MAX_THREADS)? {
            self.max_threads = v;
        }
        if let Some(v) = env_value(ENV_MAX_QUEUE_NODES)? {
            self.max_queue_nodes = v;
        }
        if let Some(v) = env_value(ENV_SPIN_RETRIES)? {
            self.spin_retries = v;
        }
        if let Some(v) = env_value(ENV_BACKOFF_US)? {
            self.backoff = Duration::from_micros(v);
        }
        if let Some(v) = env_value(ENV_EPOCH_INTERVAL_MS)? {
            self.epoch_interval = Duration::from_millis(v);
        }
        self.validate()
    }

    /// Checks every field against the limits of the lock word layouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        range("max_threads", self.max_threads as u64, 1, MAX_THREADS_LIMIT as u64)?;
        range(
            "max_queue_nodes",
            self.max_queue_nodes as u64,
            1,
            MAX_QUEUE_NODES_LIMIT as u64,
        )?;
        if self.max_queue_nodes < self.max_threads {
            return Err(ConfigError::PoolTooSmall {
                nodes:   self.max_queue_nodes,
                threads: self.max_threads,
            });
        }
        range("spin_retries", self.spin_retries as u64, 1, u32::MAX as u64)?;
        if self.epoch_interval == Duration::from_secs(0) {
            return Err(ConfigError::OutOfRange {
                key:   "epoch_interval",
                value: 0,
                min:   1,
                max:   u64::MAX,
            });
        }
        Ok(())
    }

    /// Makes `self` the process-wide configuration.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, or if the global configuration has already been read.
    pub fn install(self) -> Result<(), ConfigError> {
        self.validate()?;
        let mut pending = PENDING.lock();
        if FROZEN.load(Acquire) {
            return Err(ConfigError::AlreadyFrozen);
        }
        *pending = Some(self);
        Ok(())
    }
}

fn range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key:   key.to_owned(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

static PENDING: Mutex<Option<Config>> = const_mutex(None);
static FROZEN: AtomicBool = AtomicBool::new(false);

lazy_static! {
    static ref GLOBAL: Config = freeze();
}

#[inline(never)]
#[cold]
fn freeze() -> Config {
    let mut pending = PENDING.lock();
    FROZEN.store(true, Release);
    match pending.take() {
        Some(config) => config,
        None => match Config::from_env() {
            Ok(config) => config,
            Err(e) => panic!("invalid lockwood configuration: {}", e),
        },
    }
}

/// Returns the process-wide configuration, freezing it on first call.
#[inline]
pub fn global() -> &'static Config {
    &GLOBAL
}
