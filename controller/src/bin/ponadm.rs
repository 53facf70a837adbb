// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use itertools::Itertools;
use pon_controller::AlarmReport;
use pon_controller::ConfigBuilder;
use pon_controller::Controller;
use pon_controller::Decoder;
use pon_controller::InboundEvent;
use pon_controller::Request;
use pon_controller::TuningStrategyId;
use pon_decode::CounterSet;
use pon_decode::EthCounters;
use pon_decode::GemCounters;
use pon_decode::GtcCounters;
use pon_decode::OperatingMode;
use pon_decode::PloamCounters;
use pon_decode::TwdmCounters;
use pon_decode::XgtcCounters;
use pon_messages::command::Command;
use pon_messages::command::Event;
use slog::info;
use slog::Drain;
use slog::Level;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::settings::Style;
use tabled::Table;
use tabled::Tabled;

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|_| String::from("invalid log level"))
}

fn parse_strategy(s: &str) -> Result<TuningStrategyId, String> {
    TuningStrategyId::ALL
        .into_iter()
        .find(|id| id.to_string() == s)
        .ok_or_else(|| {
            format!(
                "unknown strategy, expected one of: {}",
                TuningStrategyId::ALL.iter().join(", ")
            )
        })
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if !s.chars().all(|c| c.is_ascii_hexdigit()) || s.len() % 2 != 0 {
        return Err(String::from("expected an even number of hex digits"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{byte:02x}")).join(" ")
}

/// Administer the PON firmware of an ONU.
///
/// This tool talks to the PON firmware through the mailbox driver, to query
/// its state and counters, and to listen for the events it raises.
#[derive(Parser)]
#[command(version, about, long_about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,

    /// The directory holding the mailbox driver's socket.
    #[arg(short, long, default_value_os_t = pon_controller::default_mailbox_dir())]
    mailbox_dir: PathBuf,

    /// The protocol family name.
    #[arg(short, long, default_value = pon_messages::FAMILY_NAME)]
    family: String,

    /// The event group name.
    #[arg(short, long, default_value = pon_messages::EVENT_GROUP_NAME)]
    group: String,

    /// The response timeout for requests, in milliseconds.
    #[arg(
        short,
        long,
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..=60000)
    )]
    timeout: u64,

    /// The TWDM tuning strategy.
    #[arg(short, long, default_value = "simulated", value_parser = parse_strategy)]
    strategy: TuningStrategyId,

    /// The mask of TWDM channels which may be used.
    #[arg(long, default_value = "0xff", value_parser = parse_u32)]
    channel_mask: u32,

    /// The log-level.
    #[arg(
        short,
        long,
        default_value_t = Level::Info,
        value_parser = parse_log_level
    )]
    log_level: Level,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CounterKind {
    Gtc,
    Xgtc,
    Gem,
    Eth,
    Ploam,
    Twdm,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the firmware capabilities.
    Caps,

    /// Print the firmware version.
    Version,

    /// Print the firmware resource limits.
    Limits,

    /// Print the operating mode.
    Mode,

    /// Select the operating mode.
    SetMode {
        /// The raw mode value.
        mode: u8,
    },

    /// Print a set of counters.
    Counters {
        #[arg(value_enum)]
        kind: CounterKind,
    },

    /// Print the state of the firmware alarms.
    Alarms,

    /// Read a firmware register.
    Peek {
        #[arg(value_parser = parse_u32)]
        addr: u32,
    },

    /// Write a firmware register.
    Poke {
        #[arg(value_parser = parse_u32)]
        addr: u32,
        #[arg(value_parser = parse_u32)]
        value: u32,
    },

    /// Read a firmware object, printing the raw reply.
    Get {
        command: Command,
        /// The request payload, as hex digits.
        #[arg(value_parser = parse_hex)]
        payload: Option<Vec<u8>>,
    },

    /// Write a firmware object.
    Set {
        command: Command,
        /// The request payload, as hex digits.
        #[arg(value_parser = parse_hex)]
        payload: Vec<u8>,
    },

    /// Print firmware events until interrupted.
    Listen,
}

#[derive(Tabled)]
struct CounterRow {
    counter: &'static str,
    value: u64,
}

#[derive(Tabled)]
struct AlarmRow {
    alarm: u16,
    active: bool,
    timestamp: u32,
}

async fn print_counters<C: CounterSet>(controller: &Controller) -> anyhow::Result<()> {
    let counters: C = controller
        .counters()
        .await
        .with_context(|| format!("failed to read {}", C::COMMAND))?;
    let rows = counters
        .fields()
        .into_iter()
        .map(|(counter, value)| CounterRow { counter, value });
    println!("{}", Table::new(rows).with(Style::sharp()));
    Ok(())
}

async fn listen(controller: &Controller, log: &slog::Logger) -> anyhow::Result<()> {
    for event in Event::ALL.iter().copied() {
        let log = log.clone();
        controller.observe_event(
            event,
            Arc::new(move |inbound: &InboundEvent| {
                info!(
                    log,
                    "event";
                    "event" => %inbound.event,
                    "seq" => inbound.frame.header.seq,
                    "payload" => hex(inbound.payload()),
                );
            }),
        );
    }
    let state_log = log.clone();
    controller.set_main_state_callback(Some(Arc::new(move |previous, current| {
        info!(state_log, "main state changed"; "previous" => %previous, "current" => %current);
    })));
    let alarm_log = log.clone();
    controller.set_optic_alarm_callback(Some(Arc::new(move |report: &AlarmReport| {
        info!(
            alarm_log,
            "optical alarms";
            "active" => ?report.active,
            "raised" => ?report.raised,
            "cleared" => ?report.cleared,
        );
    })));
    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for interrupt")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let Ok(channel_mask) = u8::try_from(args.channel_mask) else {
        bail!("channel mask {:#x} does not fit in 8 bits", args.channel_mask);
    };
    let subscribe = matches!(args.cmd, Cmd::Listen);
    let config = ConfigBuilder::new()
        .mailbox_dir(args.mailbox_dir)
        .family(args.family)
        .event_group(args.group)
        .response_timeout(Duration::from_millis(args.timeout))
        .subscribe_events(subscribe)
        .tuning_strategy(args.strategy)
        .channel_mask(channel_mask)
        .build()
        .context("invalid configuration")?;

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, args.log_level).fuse();
    let log = slog::Logger::root(drain, slog::o!());

    let controller = Controller::open(config, log.clone())
        .await
        .context("failed to open mailbox session")?;

    match args.cmd {
        Cmd::Caps => println!("{}", controller.capabilities().await?),
        Cmd::Version => println!("{}", controller.version().await?),
        Cmd::Limits => println!("{:#?}", controller.limits().await?),
        Cmd::Mode => println!("{}", controller.mode().await?),
        Cmd::SetMode { mode } => controller.set_mode(OperatingMode::from(mode)).await?,
        Cmd::Counters { kind } => match kind {
            CounterKind::Gtc => print_counters::<GtcCounters>(&controller).await?,
            CounterKind::Xgtc => print_counters::<XgtcCounters>(&controller).await?,
            CounterKind::Gem => print_counters::<GemCounters>(&controller).await?,
            CounterKind::Eth => print_counters::<EthCounters>(&controller).await?,
            CounterKind::Ploam => print_counters::<PloamCounters>(&controller).await?,
            CounterKind::Twdm => print_counters::<TwdmCounters>(&controller).await?,
        },
        Cmd::Alarms => {
            let rows = controller
                .alarm_status()
                .await?
                .into_iter()
                .map(|alarm| AlarmRow {
                    alarm: alarm.alarm_id,
                    active: alarm.active,
                    timestamp: alarm.timestamp,
                });
            println!("{}", Table::new(rows).with(Style::sharp()));
        }
        Cmd::Peek { addr } => {
            let value = controller.read_register(addr).await?;
            println!("{addr:#010x}: {value:#010x}");
        }
        Cmd::Poke { addr, value } => controller.write_register(addr, value).await?,
        Cmd::Get { command, payload } => {
            let mut request = Request::get(command);
            if let Some(payload) = payload {
                request = request.with_payload(payload);
            }
            let response = controller
                .send_request(request, Decoder::<Vec<u8>>::payload(), None)
                .await?
                .wait()
                .await?;
            println!("flags: {:?}", response.flags);
            println!("[{}]", hex(&response.value));
        }
        Cmd::Set { command, payload } => controller.set(command, payload.as_slice()).await?,
        Cmd::Listen => listen(&controller, &log).await?,
    }

    controller.close().await?;
    Ok(())
}
