//! Worker threads.
//!
//! Every core runs in its own thread, optionally pinned to a cpu. A worker loops over its three
//! sources of work until it is stopped: the device, the message fabric and the timers. None of
//! them block, a worker that found nothing to do backs off briefly before polling again.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::utils::Backoff;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::hash::Toeplitz;
use crate::lcore::{commands, Core, CoreStats};
use crate::msg::Fabric;
use crate::nic::{Device, Notify};
use crate::time::Clock;
use crate::{Error, Result};

/// The running data plane.
pub struct Runtime<D: Device, N: Notify> {
    fabric: Arc<Fabric<Core<D, N>>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<Result<CoreStats>>>,
}

impl<D, N> Runtime<D, N>
    where D: Device + Send + 'static, N: Notify + Send + 'static,
{
    /// Start one worker per configured core.
    ///
    /// `factory` creates the device and application of each core, it is called on this thread
    /// with the index of the core. Fails if the configuration is invalid, if the hash engine
    /// disagrees with the known answer or if a worker can not be spawned. Workers already started
    /// are stopped again in that case.
    pub fn start<F>(config: Config, mut factory: F) -> Result<Self>
        where F: FnMut(usize) -> Result<(D, N)>,
    {
        config.validate()?;

        let hasher = match &config.rss_key {
            Some(key) => Toeplitz::with_key(key)?,
            None => Toeplitz::new(),
        };
        // The known answer only exists for the default key.
        if config.rss_key.is_none() {
            if let Err(err) = hasher.self_test() {
                error!(%err, "rss hash self test failed");
                return Err(err);
            }
        }

        let fabric = Arc::new(Fabric::new(config.cores, &config.msg)?);
        commands::register(&fabric)?;

        let config = Arc::new(config);
        let clock = Clock::start();
        let mut runtime = Runtime {
            fabric,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(config.cores),
        };

        for id in 0..config.cores {
            let (device, app) = match factory(id) {
                Ok(io) => io,
                Err(err) => {
                    runtime.halt();
                    return Err(err);
                },
            };

            let worker = Worker {
                id,
                config: config.clone(),
                fabric: runtime.fabric.clone(),
                stop: runtime.stop.clone(),
                clock,
            };

            let spawned = thread::Builder::new()
                .name(format!("tpg-core-{}", id))
                .spawn(move || worker.run(device, app));

            match spawned {
                Ok(handle) => runtime.workers.push(handle),
                Err(err) => {
                    error!(core = id, %err, "failed to spawn worker");
                    runtime.halt();
                    return Err(Error::Spawn(err.to_string()));
                },
            }
        }

        info!(cores = config.cores, ports = config.ports, "data plane started");
        Ok(runtime)
    }

    /// The message fabric connecting the cores.
    pub fn fabric(&self) -> &Arc<Fabric<Core<D, N>>> {
        &self.fabric
    }

    /// The number of running workers.
    pub fn cores(&self) -> usize {
        self.workers.len()
    }

    /// Stop all workers and collect the counters of their cores.
    pub fn stop(mut self) -> Result<Vec<CoreStats>> {
        self.stop.store(true, Ordering::Release);
        let mut stats = Vec::with_capacity(self.workers.len());
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(result) => stats.push(result?),
                Err(_) => return Err(Error::Spawn(String::from("worker panicked"))),
            }
        }

        info!("data plane stopped");
        Ok(stats)
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<D: Device, N: Notify> Drop for Runtime<D, N> {
    fn drop(&mut self) {
        // Workers that were not joined exit on their own.
        self.stop.store(true, Ordering::Release);
    }
}

struct Worker<D: Device, N: Notify> {
    id: usize,
    config: Arc<Config>,
    fabric: Arc<Fabric<Core<D, N>>>,
    stop: Arc<AtomicBool>,
    clock: Clock,
}

impl<D: Device, N: Notify> Worker<D, N> {
    fn run(self, device: D, app: N) -> Result<CoreStats> {
        let cpu = self.config.cpus.as_ref().and_then(|cpus| cpus.get(self.id)).copied();
        if let Some(cpu) = cpu {
            match pin(cpu) {
                Ok(()) => debug!(core = self.id, cpu, "worker pinned"),
                Err(err) => warn!(core = self.id, cpu, %err, "worker not pinned"),
            }
        }

        let mut core = Core::new(self.id, &self.config, device, app)?;
        let backoff = Backoff::new();
        debug!(core = self.id, "worker running");

        while !self.stop.load(Ordering::Acquire) {
            let now = self.clock.now();
            let mut work = core.poll_device(now);
            work += self.fabric.poll(self.id, &mut core);
            work += core.run_timers(now);

            if work == 0 {
                backoff.snooze();
            } else {
                backoff.reset();
            }
        }

        debug!(core = self.id, "worker stopped");
        Ok(core.stats())
    }
}

/// Pin the calling thread to one cpu.
#[cfg(all(feature = "affinity", target_os = "linux"))]
fn pin(cpu: usize) -> Result<()> {
    // SAFETY: the set is a plain bitmask initialized by CPU_ZERO and only read by the call.
    unsafe {
        let mut set: libc::cpu_set_t = core::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(Error::Affinity(cpu));
        }
    }
    Ok(())
}

#[cfg(not(all(feature = "affinity", target_os = "linux")))]
fn pin(cpu: usize) -> Result<()> {
    Err(Error::Affinity(cpu))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time;

    use super::*;
    use crate::cb::OpenParams;
    use crate::lcore::Proto;
    use crate::nic::{Journal, Link, Loopback};
    use crate::tcp::State;

    fn config(cores: usize) -> Config {
        Config {
            cores,
            tcp_cb_count: 16,
            udp_cb_count: 16,
            table_bits: 8,
            ..Config::default()
        }
    }

    /// Poll the counters of a core until `done` holds for them.
    fn wait_for<C, F>(fabric: &Fabric<C>, core: usize, done: F) -> CoreStats
        where F: Fn(&CoreStats) -> bool,
    {
        let deadline = time::Instant::now() + time::Duration::from_secs(10);
        loop {
            let stats = commands::stats(fabric, core).unwrap();
            if done(&stats) {
                return stats;
            }

            assert!(time::Instant::now() < deadline, "core {} stuck at {:?}", core, stats);
            thread::sleep(time::Duration::from_millis(1));
        }
    }

    #[test]
    fn start_and_stop() {
        let runtime = Runtime::start(config(2), |_| Ok((Loopback::new(), ()))).unwrap();
        assert_eq!(runtime.cores(), 2);
        assert_eq!(runtime.fabric().cores(), 2);

        let stats = runtime.stop().unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|stats| *stats == CoreStats::default()));
    }

    #[test]
    fn invalid_config() {
        let result = Runtime::start(config(0), |_| Ok((Loopback::new(), ())));
        assert!(matches!(result.map(drop), Err(Error::Invalid)));
    }

    #[test]
    fn factory_failure() {
        let result = Runtime::start(config(2), |id| match id {
            0 => Ok((Loopback::new(), ())),
            _ => Err(Error::NoMem),
        });
        assert!(matches!(result.map(drop), Err(Error::NoMem)));
    }

    #[test]
    fn connection_between_cores() {
        let (a, b) = Link::pair(64);
        let mut links = vec![Some(a), Some(b)];
        let runtime = Runtime::start(config(2), |id| {
            let link = links[id].take().ok_or(Error::Invalid)?;
            Ok((link, Journal::default()))
        }).unwrap();

        let server = (Ipv4Addr::new(10, 0, 0, 2), 80);
        let client = (Ipv4Addr::new(10, 0, 0, 1), 40000);
        let fabric = runtime.fabric().clone();
        commands::listen(&*fabric, 1, Proto::Tcp, OpenParams::listen(0, server)).unwrap();
        let id = commands::open(&*fabric, 0, Proto::Tcp, OpenParams::connect(0, client, server))
            .unwrap();

        // The handshake completes in the background.
        wait_for(&*fabric, 0, |stats| stats.tsm.state(State::Established) == 1);
        wait_for(&*fabric, 1, |stats| stats.tsm.state(State::Established) == 1);

        commands::close(&*fabric, 0, Proto::Tcp, id).unwrap();
        wait_for(&*fabric, 1, |stats| stats.tsm.state(State::CloseWait) == 1);
        // The acknowledgement of the FIN, fin-wait-2 may already have timed out.
        wait_for(&*fabric, 0, |stats| stats.tcp.received_pkts >= 2);

        let stats = runtime.stop().unwrap();
        assert_eq!(stats[0].tcp.cb_alloc, 1);
        assert_eq!(stats[1].tcp.cb_alloc, 2);
        assert!(stats[0].tcp.received_pkts >= 2);
        assert!(stats[1].tcp.received_pkts >= 2);
    }
}
