use clap::Parser;
use losswire::{Capture, Config, LogSink, SystemClock, Tun};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "losswire")]
#[command(about = "Watch TCP flows on a tun device and report loss events")]
struct Args {
    /// Tun device to read from
    #[arg(short, long, default_value = "tun0")]
    interface: String,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Report wire timestamps instead of flow-relative ones
    #[arg(long)]
    absolute_time: bool,

    /// Report wire sequence numbers instead of zero-based ones
    #[arg(long)]
    absolute_seq: bool,

    /// Do not use the IP id to tell network duplicates from retransmissions
    #[arg(long)]
    no_ip_id: bool,

    /// Log every acknowledgement
    #[arg(long)]
    ack_match: bool,

    /// Log every data segment with its classification
    #[arg(long)]
    trace_sends: bool,

    /// Packet records kept per direction
    #[arg(long, default_value = "1024")]
    retention: usize,

    /// Soft cap on the shared packet record pool
    #[arg(long, default_value = "65536")]
    pool_capacity: usize,

    /// Duplicate ACKs that make a retransmission fast-retransmit driven
    #[arg(long, default_value = "3")]
    dup_acks: u32,

    /// Seconds of silence after which a flow is retired
    #[arg(long, default_value = "120")]
    flow_timeout: u64,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            absolute_time: self.absolute_time,
            absolute_seq: self.absolute_seq,
            ip_id: !self.no_ip_id,
            ack_match: self.ack_match,
            trace_sends: self.trace_sends,
            retention: self.retention,
            pool_capacity: self.pool_capacity,
            dup_ack_threshold: self.dup_acks,
            flow_timeout: Duration::from_secs(self.flow_timeout),
            ..Config::default()
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config();
    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let dev = match Tun::new(&args.interface) {
        Ok(dev) => dev,
        Err(e) => {
            error!("failed to open {}: {}", args.interface, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Listening on {}", dev.name());

    let mut capture = Capture::new(
        Box::new(dev),
        Arc::new(SystemClock),
        config,
        Box::new(LogSink),
    );
    let result = capture.run(args.count);
    capture.finish();

    let stats = capture.stats();
    info!(
        "{} frames, {} ignored, {} undecodable",
        stats.frames, stats.ignored, stats.undecodable
    );
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("capture failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
