//! Two cores talking over an in-memory wire.
//!
//! # Usage
//!
//! One core opens a number of connections to a listener on the other core, sends some data on
//! each of them and closes them again. Both cores run in this thread on a simulated clock, so the
//! run is deterministic and finishes as fast as the machine allows.
//!
//!   > $ cargo run --example loopback -- --connections 100 --bytes 4000
//!
//! Pass `-v` to see the per-core debug output.
use std::net::Ipv4Addr;

use structopt::StructOpt;
use tracing::{info, Level};

use tpg::cb::OpenParams;
use tpg::config::Config;
use tpg::lcore::{Core, Proto};
use tpg::nic::{Journal, Link, Note};
use tpg::pool::CbId;
use tpg::tcp::{State, SEGS_PER_SEND};
use tpg::time::{Duration, Instant};

const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const SERVER: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 0, 2), 80);

type DemoCore = Core<Link, Journal>;

fn main() -> Result<(), tpg::Error> {
    let Args { connections, bytes, verbose } = Args::from_args();
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = Config {
        cores: 2,
        table_bits: 12,
        tcp_cb_count: connections + 1,
        udp_cb_count: 1,
        ..Config::default()
    };
    config.validate()?;

    let (a, b) = Link::pair(4 * connections + 64);
    let mut client = Core::new(0, &config, a, Journal::default())?;
    let mut server = Core::new(1, &config, b, Journal::default())?;
    let mut now = Instant::from_millis(1);

    server.tcp_listen(&OpenParams::listen(0, SERVER), now)?;
    let ids = (0..connections)
        .map(|i| {
            let local = (CLIENT, 10_000 + i as u16);
            client.tcp_open(&OpenParams::connect(0, local, SERVER), now)
        })
        .collect::<Result<Vec<CbId>, _>>()?;
    info!(connections, "connections opened");

    now = run(&mut client, &mut server, now, Duration::from_millis(10));
    let established = count(&client, &ids, State::Established);
    info!(established, "handshakes done");

    let data = vec![0x5a; bytes];
    for &id in &ids {
        let mut offset = 0;
        while offset < data.len() {
            let room = match client.tcp_cb(id) {
                Some(cb) if cb.state == State::Established => {
                    let burst = SEGS_PER_SEND * u32::from(cb.l4.options.tcp.mss);
                    cb.snd_buf_avail().min(burst) as usize
                },
                _ => break,
            };

            let chunk = room.min(data.len() - offset);
            if chunk == 0 {
                now = run(&mut client, &mut server, now, Duration::from_millis(1));
                continue;
            }

            let sent = client.tcp_send(id, &data[offset..offset + chunk], true, now)?;
            offset += sent as usize;
        }
    }
    now = run(&mut client, &mut server, now, Duration::from_millis(10));

    for &id in &ids {
        client.tcp_close(id, now)?;
    }
    // Long enough for time-wait to expire.
    run(&mut client, &mut server, now, Duration::from_millis(1500));

    let received: usize = server.app().notes.iter()
        .map(|(_, note)| match note {
            Note::TcpReceived(data) => data.len(),
            _ => 0,
        })
        .sum();

    let client_stats = client.stats();
    let server_stats = server.stats();
    println!("received {} of {} bytes", received, connections * bytes);
    println!("client: {} open, {:?}", client.cb_count(Proto::Tcp), client_stats.tcp);
    println!("server: {} open, {:?}", server.cb_count(Proto::Tcp), server_stats.tcp);
    println!("server close-wait: {}", server_stats.tsm.state(State::CloseWait));
    Ok(())
}

/// Advance both cores in steps of one millisecond.
fn run(client: &mut DemoCore, server: &mut DemoCore, start: Instant, span: Duration) -> Instant {
    let step = Duration::from_millis(1);
    let end = start + span;
    let mut now = start;
    while now < end {
        now += step;
        while client.poll_device(now) + server.poll_device(now) > 0 {}
        client.run_timers(now);
        server.run_timers(now);
    }
    now
}

fn count(core: &DemoCore, ids: &[CbId], state: State) -> usize {
    ids.iter()
        .filter(|&&id| core.tcp_cb(id).map(|cb| cb.state) == Some(state))
        .count()
}

#[derive(StructOpt)]
struct Args {
    /// Number of connections to open.
    #[structopt(short = "c", long = "connections", default_value = "16")]
    connections: usize,
    /// Bytes to send on every connection.
    #[structopt(short = "b", long = "bytes", default_value = "4000")]
    bytes: usize,
    /// Log at debug level.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}
