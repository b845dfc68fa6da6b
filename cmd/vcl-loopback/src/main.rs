//! VerCoLib End-to-End Loopback Test
//!
//! Drives the full channel stack against the simulated transceiver:
//!   Part A - Bring-up: channel discovery, node registration
//!   Part B - Register port: exclusive open, raw register access
//!   Part C - Data path: RX write, TX read back, byte-for-byte compare
//!   Part D - Open discipline: busy channel, wrong access mode
//!
//! Run: ./target/release/vcl-loopback [bytes]
//! Tuning comes from the usual `VCL_*` environment variables.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vcl_core::{ChannelInfo, ChannelRegister, Direction, VclError};
use vcl_module::{IommuMapper, LoopbackDevice, NodeTable};
use vcl_runtime::{AccessMode, DriverConfig, Endpoint, IrqDispatcher, MmioPort};

/// Default payload: three and a bit buffers of the default size
const DEFAULT_BYTES: usize = (3 << 20) + 123;

/// Bus address reported for the simulated BAR
const LOOPBACK_BAR: u64 = 0xF000_0000;

/// Give up on the data path after this long
const DEADLINE: Duration = Duration::from_secs(30);

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ════════════════════════════════════════════════════════════
// Part A: Bring-up
// ════════════════════════════════════════════════════════════

fn test_bringup(t: &mut TestRunner, ep: &Endpoint, table: &NodeTable) {
    t.section("Part A: Bring-up");

    t.check("two host channels discovered", ep.channels().len() == 2,
        &format!("found {}", ep.channels().len()));
    t.check("interrupt vectors = channels + 1", ep.interrupt_vectors() == 3,
        &format!("got {}", ep.interrupt_vectors()));

    let dirs: Vec<Direction> = ep.channels().iter().map(|c| c.direction()).collect();
    t.check("directions rx, tx", dirs == [Direction::Rx, Direction::Tx], &format!("{:?}", dirs));

    let names = table.names();
    let expected = [
        format!("vcl_{}", ep.id()),
        format!("vcl_{}_rx_1", ep.id()),
        format!("vcl_{}_tx_2", ep.id()),
    ];
    t.check("device nodes registered", expected.iter().all(|n| names.contains(n)), &format!("{:?}", names));

    let ready = ep.channels().iter().all(|c| c.is_ready());
    t.check("all buffers idle after probe", ready, "pool not idle");
}

// ════════════════════════════════════════════════════════════
// Part B: Register port
// ════════════════════════════════════════════════════════════

fn test_register_port(t: &mut TestRunner, ep: &Arc<Endpoint>) {
    t.section("Part B: Register port");

    let port = match MmioPort::open(Arc::clone(ep)) {
        Ok(p) => p,
        Err(e) => {
            t.fail("open register port", &e.to_string());
            return;
        }
    };
    t.pass("open register port");

    t.check("second open is busy", matches!(MmioPort::open(Arc::clone(ep)), Err(VclError::Busy)), "not busy");
    t.check("bar reported", port.bar() == LOOPBACK_BAR, &format!("{:#x}", port.bar()));

    let info = ChannelInfo(port.read_register(2, ChannelRegister::Info.index()));
    t.check("raw read of tx channel info", info.dma_direction() == Some(Direction::Tx), &format!("{:?}", info));

    drop(port);
    t.check("reopen after close", MmioPort::open(Arc::clone(ep)).is_ok(), "still busy");
}

// ════════════════════════════════════════════════════════════
// Part C: Data path
// ════════════════════════════════════════════════════════════

fn test_data_path(t: &mut TestRunner, ep: &Arc<Endpoint>, bytes: usize) {
    t.section(&format!("Part C: Data path ({} bytes)", bytes));

    let (mut rx, mut tx) = match (ep.open(0, AccessMode::WriteOnly), ep.open(1, AccessMode::ReadOnly)) {
        (Ok(rx), Ok(tx)) => (rx, tx),
        (Err(e), _) | (_, Err(e)) => {
            t.fail("open rx/tx channels", &e.to_string());
            return;
        }
    };
    t.pass("open rx/tx channels");

    let data = pattern(bytes);
    let sent = data.clone();
    let started = Instant::now();

    let writer = thread::spawn(move || -> Result<usize, VclError> {
        let mut off = 0;
        let mut retries = 0;
        while off < sent.len() {
            match rx.write(&sent[off..]) {
                Ok(n) => off += n,
                Err(VclError::TryAgain) if started.elapsed() < DEADLINE => retries += 1,
                Err(e) => return Err(e),
            }
        }
        if retries > 0 {
            println!("    writer retried {} time(s)", retries);
        }
        Ok(off)
    });

    let mut got = vec![0u8; bytes];
    let mut off = 0;
    let mut read_err = None;
    while off < got.len() {
        match tx.read(&mut got[off..]) {
            Ok(n) => off += n,
            Err(VclError::TryAgain) if started.elapsed() < DEADLINE => {}
            Err(e) => {
                read_err = Some(e);
                break;
            }
        }
    }

    let written = writer.join().unwrap_or(Err(VclError::Fault));
    let elapsed = started.elapsed();

    match written {
        Ok(n) => t.check("writer sent everything", n == bytes, &format!("{} of {}", n, bytes)),
        Err(e) => t.fail("writer sent everything", &e.to_string()),
    }
    match read_err {
        None => t.pass("reader received everything"),
        Some(e) => t.fail("reader received everything", &format!("{} after {} bytes", e, off)),
    }

    let first_diff = got.iter().zip(&data).position(|(a, b)| a != b);
    t.check("payload matches", first_diff.is_none() && off == bytes,
        &format!("first difference at {:?}", first_diff));

    let secs = elapsed.as_secs_f64().max(1e-9);
    println!("    {:.1} MiB/s over {:?}", bytes as f64 / secs / (1 << 20) as f64, elapsed);

    let ch = tx.channel();
    let (idle, active, serviced) = ch.queue_lengths();
    t.check("no buffer lost", idle + active + serviced == ch.buffer_count(),
        &format!("idle={} active={} serviced={}", idle, active, serviced));
}

// ════════════════════════════════════════════════════════════
// Part D: Open discipline
// ════════════════════════════════════════════════════════════

fn test_open_discipline(t: &mut TestRunner, ep: &Endpoint) {
    t.section("Part D: Open discipline");

    let first = ep.open(1, AccessMode::ReadOnly);
    t.check("open tx read-only", first.is_ok(), "open failed");
    t.check("second open is busy", matches!(ep.open(1, AccessMode::ReadOnly), Err(VclError::Busy)), "not busy");
    drop(first);

    t.check("rx refuses read access",
        matches!(ep.open(0, AccessMode::ReadOnly), Err(VclError::BadMode { .. })), "accepted");
    t.check("tx refuses write access",
        matches!(ep.open(1, AccessMode::ReadWrite), Err(VclError::BadMode { .. })), "accepted");
    t.check("failed opens leave the slot free", ep.open(0, AccessMode::WriteOnly).is_ok(), "slot leaked");
    t.check("unknown minor", matches!(ep.open(7, AccessMode::WriteOnly), Err(VclError::NoSuchChannel(7))), "accepted");
}

// ════════════════════════════════════════════════════════════

fn main() {
    println!("=== VerCoLib Loopback Test ===");

    let bytes = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(DEFAULT_BYTES);

    let config = DriverConfig::from_env();
    if let Err(e) = config.validate() {
        println!("\nFATAL: invalid configuration: {}", e);
        std::process::exit(2);
    }
    config.print();

    let mut t = TestRunner::new();

    let mapper = Arc::new(IommuMapper::new());
    let irq = Arc::new(IrqDispatcher::new(config.irq_queue_depth));
    let device = match LoopbackDevice::new(&[Direction::Rx, Direction::Tx], Arc::clone(&mapper), irq.clone()) {
        Ok(d) => d,
        Err(e) => {
            println!("\nFATAL: loopback device failed: {}", e);
            std::process::exit(1);
        }
    };

    let ep = match Endpoint::probe(device.clone(), mapper.clone(), LOOPBACK_BAR, &config) {
        Ok(ep) => Arc::new(ep),
        Err(e) => {
            println!("\nFATAL: probe failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };
    if let Err(e) = irq.start(Arc::clone(&ep)) {
        println!("\nFATAL: interrupt dispatcher failed: {}", e);
        std::process::exit(1);
    }

    let table = Arc::new(NodeTable::new());
    let nodes = match ep.register_nodes(table.clone()) {
        Ok(n) => n,
        Err(e) => {
            println!("\nFATAL: node registration failed: {}", e);
            std::process::exit(1);
        }
    };

    test_bringup(&mut t, &ep, &table);
    test_register_port(&mut t, &ep);
    test_data_path(&mut t, &ep, bytes);
    test_open_discipline(&mut t, &ep);

    println!("\n  Channel stats:");
    for s in ep.stats() {
        println!("    {}", s);
    }
    let dev = device.stats();
    println!(
        "  Device: {} transaction(s), {} byte(s), {} overlap(s), {} fault(s)",
        dev.transactions, dev.bytes, dev.overlaps, dev.faults
    );
    println!(
        "  Interrupts: {} delivered, {} dropped; {} live mapping(s)",
        irq.delivered(), irq.dropped(), mapper.live_mappings()
    );

    drop(nodes);
    irq.shutdown();

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
