use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use embedded_can_mock::{BusHandle, MockCan};
use isotp_link::{
    IsoTpError, IsoTpLink, LinkConfig, LinkEvents, NbCan, SendReport, StdClock, TransferError,
};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "ISO-TP echo node and tester over an in-memory CAN bus"
)]
struct Args {
    /// Identifier the echo node transmits on (the tester listens on it).
    #[arg(long, default_value = "0x7E8", value_parser = parse_id)]
    tx_id: u32,
    /// Identifier the echo node listens on (the tester transmits on it).
    #[arg(long, default_value = "0x7E0", value_parser = parse_id)]
    rx_id: u32,
    /// Number of messages the tester sends.
    #[arg(long, default_value_t = 8)]
    messages: usize,
    /// Longest message the tester sends.
    #[arg(long, default_value_t = 512, value_parser = clap::value_parser!(u16).range(1..=4095))]
    max_len: u16,
    /// Block size granted to senders (0 = unlimited).
    #[arg(long, default_value_t = 8)]
    block_size: u8,
    /// Minimum separation time requested from senders, in microseconds.
    #[arg(long, default_value_t = 0)]
    st_min_us: u64,
    /// N_Bs / N_Cr response timeout, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    response_timeout_ms: u64,
    /// Delay between polls of the echo task, in milliseconds.
    #[arg(long, default_value_t = 1)]
    poll_ms: u64,
    /// Give up on an echo after this many milliseconds.
    #[arg(long, default_value_t = 5000)]
    echo_timeout_ms: u64,
}

fn parse_id(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid CAN identifier {s:?}: {err}"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Completion events of the echo node.
struct EchoEvents;

impl LinkEvents for EchoEvents {
    fn on_send_done(&mut self, report: SendReport) {
        match report.result {
            Ok(()) => info!("echo: TX complete: {} bytes", report.len),
            Err(err) => warn!("echo: TX of {} bytes failed: {err}", report.len),
        }
    }

    fn on_receive_done(&mut self, payload: &[u8]) {
        info!("echo: RX complete: {} bytes, echoing back", payload.len());
    }

    fn on_receive_failed(&mut self, error: TransferError) {
        warn!("echo: RX failed: {error}");
    }
}

type EchoLink = IsoTpLink<'static, NbCan<MockCan>, StdClock, EchoEvents>;
type TesterLink = IsoTpLink<'static, NbCan<MockCan>, StdClock>;

fn link_config(args: &Args, tx_id: u32, rx_id: u32) -> Result<LinkConfig> {
    let mut cfg = LinkConfig::from_raw_ids(tx_id, rx_id)
        .context("invalid CAN identifiers")?
        .with_response_timeout(Duration::from_millis(args.response_timeout_ms));
    cfg.block_size = args.block_size;
    cfg.st_min = Duration::from_micros(args.st_min_us);
    cfg.validate().context("invalid link configuration")?;
    Ok(cfg)
}

/// Poll the echo link and send every received message back.
fn echo_task(link: &EchoLink, stop: &AtomicBool, interval: Duration) {
    info!("echo: task started");
    let mut buf = vec![0u8; link.config().rx_buffer_size];
    let mut pending: Option<Vec<u8>> = None;

    while !stop.load(Ordering::Acquire) {
        if let Err(err) = link.poll() {
            warn!("echo: poll failed: {err}");
        }
        if pending.is_none() {
            match link.receive(&mut buf) {
                Ok(len) => pending = Some(buf[..len].to_vec()),
                Err(IsoTpError::NotFound) => {}
                Err(err) => warn!("echo: receive failed: {err}"),
            }
        }
        if let Some(message) = pending.take() {
            match link.send(&message) {
                Ok(_) => {}
                // Previous echo still in flight; retry next round.
                Err(IsoTpError::NotIdle) => pending = Some(message),
                Err(err) => warn!("echo: send failed: {err}"),
            }
        }
        thread::sleep(interval);
    }
    info!("echo: task finished");
}

fn run_tester(link: &TesterLink, args: &Args) -> Result<()> {
    let timeout = Duration::from_millis(args.echo_timeout_ms);
    let max_len = usize::from(args.max_len);
    let mut out = vec![0u8; link.config().rx_buffer_size];

    for n in 0..args.messages {
        let len = 1 + (n * 149) % max_len;
        let message: Vec<u8> = (0..len).map(|i| (i + n) as u8).collect();
        info!("tester: sending message {n}, {len} bytes");
        link.send(&message)?;

        let started = Instant::now();
        loop {
            link.poll()?;
            match link.receive(&mut out) {
                Ok(got) => {
                    if out[..got] != message[..] {
                        bail!("echo of message {n} does not match what was sent");
                    }
                    info!(
                        "tester: echo of {got} bytes verified in {:?}",
                        started.elapsed()
                    );
                    break;
                }
                Err(IsoTpError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
            if started.elapsed() > timeout {
                bail!("no echo for message {n} within {timeout:?}");
            }
            thread::sleep(Duration::from_micros(200));
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let echo_cfg = link_config(&args, args.tx_id, args.rx_id)?;
    let tester_cfg = link_config(&args, args.rx_id, args.tx_id)?;
    info!(
        "ISO-TP echo TX ID: {:#X}, RX ID: {:#X}",
        args.tx_id, args.rx_id
    );

    let bus = BusHandle::new();
    let echo_can = MockCan::new_with_bus(&bus, vec![echo_cfg.rx_id])?;
    let tester_can = MockCan::new_with_bus(&bus, vec![tester_cfg.rx_id])?;
    let echo: EchoLink =
        IsoTpLink::new(echo_cfg, NbCan::new(echo_can.clone()), StdClock, EchoEvents)
            .context("creating echo link")?;
    let tester: TesterLink =
        IsoTpLink::new(tester_cfg, NbCan::new(tester_can.clone()), StdClock, ())
            .context("creating tester link")?;

    let stop = AtomicBool::new(false);
    let interval = Duration::from_millis(args.poll_ms);
    thread::scope(|scope| -> Result<()> {
        // Stands in for the CAN receive interrupt of both nodes.
        scope.spawn(|| {
            while !stop.load(Ordering::Acquire) {
                let mut idle = true;
                while let Some(frame) = echo_can.try_recv() {
                    echo.on_frame(&frame);
                    idle = false;
                }
                while let Some(frame) = tester_can.try_recv() {
                    tester.on_frame(&frame);
                    idle = false;
                }
                if idle {
                    thread::sleep(Duration::from_micros(100));
                }
            }
        });
        let echo_handle = scope.spawn(|| echo_task(&echo, &stop, interval));

        let result = run_tester(&tester, &args);
        stop.store(true, Ordering::Release);
        echo_handle
            .join()
            .map_err(|_| anyhow!("echo task panicked"))?;
        result
    })?;

    let _ = echo.release();
    let _ = tester.release();
    info!(
        "all {} echoes verified, {} frames on the bus",
        args.messages,
        bus.frames().len()
    );
    Ok(())
}
