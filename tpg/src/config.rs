//! Startup configuration.
//!
//! All sizes are fixed when the cores start, nothing grows afterwards. There is no parsing here,
//! a `Config` is built in code and checked with `validate` before use.
use tracing::warn;

use crate::time::Duration;
use crate::{Error, Result};

/// The largest supported connection table, per port and protocol.
pub const MAX_TABLE_BITS: u32 = 24;

/// Configuration of the whole data plane.
#[derive(Clone, Debug)]
pub struct Config {
    /// The number of cores, each running one worker thread.
    pub cores: usize,
    /// The number of physical ports.
    pub ports: usize,
    /// Connection tables have `2^table_bits` buckets per port.
    pub table_bits: u32,
    /// Tcp control blocks per core.
    pub tcp_cb_count: usize,
    /// Udp control blocks per core.
    pub udp_cb_count: usize,
    /// The timer wheels.
    pub timers: TimerConfig,
    /// The message fabric.
    pub msg: MsgConfig,
    /// Packets taken from the device per poll.
    pub rx_burst: usize,
    /// The RSS key programmed into the NICs, the default key if `None`.
    pub rss_key: Option<Vec<u8>>,
    /// A fixed key for initial sequence numbers, random if `None`.
    pub isn_key: Option<(u64, u64)>,
    /// Pin the worker of core `i` to cpu `cpus[i]`.
    ///
    /// Only honored with the `affinity` feature.
    pub cpus: Option<Vec<usize>>,
}

/// Step and range of the timer wheels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerConfig {
    /// Granularity of the connection lifetime timers.
    pub slow_step: Duration,
    /// Exclusive bound of connection lifetime timeouts.
    pub slow_max: Duration,
    /// Granularity of the retransmission timers.
    pub rto_step: Duration,
    /// Exclusive bound of retransmission timeouts.
    pub rto_max: Duration,
    /// Timers fired per wheel and call to `run_timers`.
    pub max_run: usize,
}

/// Configuration of the message fabric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgConfig {
    /// Depth of each message queue, a power of two.
    pub queue_depth: usize,
    /// How long a synchronous sender waits for processing.
    pub sync_timeout: Duration,
    /// How often a handler may repost a message.
    pub max_reposts: u32,
}

impl Config {
    /// Check all values.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.cores > 0, "cores"),
            (self.ports > 0, "ports"),
            (self.table_bits > 0 && self.table_bits <= MAX_TABLE_BITS, "table_bits"),
            (self.tcp_cb_count > 0, "tcp_cb_count"),
            (self.udp_cb_count > 0, "udp_cb_count"),
            (self.rx_burst > 0, "rx_burst"),
            (self.rss_key.as_ref().map_or(true, |key| key.len() >= crate::hash::KEY_LEN), "rss_key"),
            (self.cpus.as_ref().map_or(true, |cpus| cpus.len() >= self.cores), "cpus"),
        ];

        for &(ok, name) in checks.iter() {
            if !ok {
                warn!(field = name, "invalid configuration");
                return Err(Error::Invalid);
            }
        }

        self.timers.validate()?;
        self.msg.validate()
    }
}

impl TimerConfig {
    /// Check that both wheels have a step and hold at least one bucket.
    pub fn validate(&self) -> Result<()> {
        let wheels = [
            (self.slow_step, self.slow_max, "slow"),
            (self.rto_step, self.rto_max, "rto"),
        ];

        for &(step, max, name) in wheels.iter() {
            if step.as_micros() == 0 || max < step {
                warn!(wheel = name, ?step, ?max, "invalid timer wheel");
                return Err(Error::Invalid);
            }
        }

        if self.max_run == 0 {
            warn!("timer max run must not be zero");
            return Err(Error::Invalid);
        }

        Ok(())
    }
}

impl MsgConfig {
    /// Check that the queue depth is a power of two.
    pub fn validate(&self) -> Result<()> {
        if !self.queue_depth.is_power_of_two() {
            warn!(depth = self.queue_depth, "message queue depth must be a power of two");
            return Err(Error::Invalid);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cores: 1,
            ports: 1,
            table_bits: 16,
            tcp_cb_count: 65536,
            udp_cb_count: 8192,
            timers: TimerConfig::default(),
            msg: MsgConfig::default(),
            rx_burst: 32,
            rss_key: None,
            isn_key: None,
            cpus: None,
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        TimerConfig {
            slow_step: Duration::from_millis(100),
            slow_max: Duration::from_secs(60),
            rto_step: Duration::from_micros(50),
            rto_max: Duration::from_secs(30),
            max_run: 10_000,
        }
    }
}

impl Default for MsgConfig {
    fn default() -> Self {
        MsgConfig {
            queue_depth: 1024,
            sync_timeout: Duration::from_secs(1),
            max_reposts: 64,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn rejects() {
        let bad = [
            Config { cores: 0, ..Config::default() },
            Config { table_bits: 25, ..Config::default() },
            Config { rss_key: Some(vec![0; 12]), ..Config::default() },
            Config { cpus: Some(vec![0]), cores: 2, ..Config::default() },
            Config {
                msg: MsgConfig { queue_depth: 1000, ..MsgConfig::default() },
                ..Config::default()
            },
            Config {
                timers: TimerConfig { rto_step: Duration::from_micros(0), ..TimerConfig::default() },
                ..Config::default()
            },
        ];

        for config in bad.iter() {
            assert_eq!(config.validate(), Err(Error::Invalid), "{:?}", config);
        }
    }
}
