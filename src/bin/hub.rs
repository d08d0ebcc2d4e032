use clap::Parser;
use telemetry_hub::{
    TelemetryHub,
    alarm::{AlarmEvent, AlarmEventKind},
    config::read_config_file,
    util::now_millis,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// More output per occurrence (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Read `<access_token> <json payload>` lines from stdin
    #[arg(long)]
    stdin: bool,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![("telemetry_hub", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.file)?;
    config.apply_env_overrides();

    let hub = TelemetryHub::start(config).await?;
    tokio::spawn(log_alarm_events(hub.subscribe_alarms()));

    if args.stdin {
        read_stdin(&hub).await?;
    } else {
        info!("waiting for ctrl-c");
        tokio::signal::ctrl_c().await?;
    }

    hub.shutdown().await;
    Ok(())
}

#[instrument(skip_all)]
async fn read_stdin(hub: &TelemetryHub) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((token, payload)) = line.split_once(char::is_whitespace) else {
            warn!("expected '<access_token> <json>', got: {line}");
            continue;
        };

        if let Err(e) = hub.transport().ingest(token, payload.trim(), now_millis()).await {
            error!("failed to ingest line: {e}");
        }
    }

    debug!("stdin closed");
    Ok(())
}

async fn log_alarm_events(mut events: Receiver<AlarmEvent>) {
    loop {
        match events.recv().await {
            Ok(AlarmEvent { kind, alarm }) => {
                let what = match kind {
                    AlarmEventKind::Created => "created".to_string(),
                    AlarmEventKind::SeverityChanged { from } => format!("changed from {from}"),
                    AlarmEventKind::Cleared => "cleared".to_string(),
                    AlarmEventKind::Acknowledged => "acknowledged".to_string(),
                    AlarmEventKind::Repeated => format!("repeated (#{})", alarm.notification_count),
                };
                info!(
                    "alarm {what}: {} [{}] on {} ({})",
                    alarm.alarm_type,
                    alarm.severity,
                    alarm.originator_name,
                    alarm.status()
                );
            }
            Err(RecvError::Lagged(skipped)) => warn!("missed {skipped} alarm events"),
            Err(RecvError::Closed) => break,
        }
    }
}
