// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Mock mailbox driver that dummies up a basic PON firmware.

use anyhow::Context;
use clap::Parser;
use hubpack::SerializedSize;
use pon_decode::Capabilities;
use pon_decode::CounterSet;
use pon_decode::EncodePayload;
use pon_decode::EthCounters;
use pon_decode::FirmwareAlarm;
use pon_decode::GemCounters;
use pon_decode::GtcCounters;
use pon_decode::Limits;
use pon_decode::OperatingMode;
use pon_decode::OpticConfig;
use pon_decode::PloamCounters;
use pon_decode::RegisterAccess;
use pon_decode::TwdmCounters;
use pon_decode::VersionInfo;
use pon_decode::XgtcCounters;
use pon_messages::command::Command;
use pon_messages::command::CommandId;
use pon_messages::command::Control;
use pon_messages::command::Event;
use pon_messages::control::FamilyInfo;
use pon_messages::control::ResolveFamily;
use pon_messages::deserialize_payload;
use pon_messages::frame::AckCode;
use pon_messages::frame::Direction;
use pon_messages::frame::Frame;
use pon_messages::frame::Header;
use pon_messages::serialize_payload;
use pon_messages::MAX_FRAME_SIZE;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Drain;
use slog::Level;
use slog::Logger;
use std::path::Path;
use std::path::PathBuf;
use tokio::net::UnixDatagram;

const FAMILY_ID: u16 = 0x1d;
const GROUP_ID: u32 = 1;

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|_| String::from("invalid log level"))
}

/// Serve a mock PON firmware mailbox on a Unix datagram socket.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// The directory in which to create the mailbox socket.
    #[arg(short, long, default_value_os_t = pon_controller::default_mailbox_dir())]
    mailbox_dir: PathBuf,

    /// The log-level.
    #[arg(
        short,
        long,
        default_value_t = Level::Info,
        value_parser = parse_log_level
    )]
    log_level: Level,
}

// A zero-filled payload of the size firmware would send for `T`.
fn zeroed<T: SerializedSize>() -> Vec<u8> {
    vec![0; T::MAX_SIZE]
}

fn counters<C: CounterSet + Default>(request: &Frame) -> Frame {
    request
        .answer(0, AckCode::Ack, None)
        .with_group(C::default().to_group())
}

fn ack<P: EncodePayload + ?Sized>(request: &Frame, payload: &P) -> anyhow::Result<Frame> {
    Ok(request.answer(0, AckCode::Ack, Some(payload.encode()?)))
}

fn reply(request: &Frame) -> anyhow::Result<Frame> {
    let CommandId::Command(command) = request.command else {
        return Ok(request.answer(0, AckCode::Unknown(0xff), None));
    };
    if request.direction == Direction::Set {
        return ack(request, &0i32.to_le_bytes()[..]);
    }
    match command {
        Command::Capabilities => ack(request, &(Capabilities::GPON | Capabilities::XGSPON)),
        Command::Version => {
            let version = VersionInfo {
                major: 1,
                ..Default::default()
            };
            ack(request, &version)
        }
        Command::Limits => ack(request, zeroed::<Limits>().as_slice()),
        Command::Mode => ack(request, &OperatingMode::Xgspon),
        Command::OpticConfig => ack(request, zeroed::<OpticConfig>().as_slice()),
        Command::Register => {
            let access: RegisterAccess = deserialize_payload(request.payload())?;
            ack(request, &RegisterAccess { value: 0, ..access })
        }
        Command::GtcCounters => Ok(counters::<GtcCounters>(request)),
        Command::XgtcCounters => Ok(counters::<XgtcCounters>(request)),
        Command::GemCounters => Ok(counters::<GemCounters>(request)),
        Command::EthCounters => Ok(counters::<EthCounters>(request)),
        Command::PloamCounters => Ok(counters::<PloamCounters>(request)),
        Command::TwdmCounters => Ok(counters::<TwdmCounters>(request)),
        Command::AlarmStatus => {
            let alarm = FirmwareAlarm {
                alarm_id: 1,
                active: false,
                timestamp: 0,
            };
            Ok(request
                .answer(0, AckCode::Ack, None)
                .with_group(alarm.to_group()))
        }
        _ => Ok(request.answer(0, AckCode::Ack, None)),
    }
}

fn resolve(request: &Frame) -> anyhow::Result<Frame> {
    let names: ResolveFamily = deserialize_payload(request.payload())?;
    if names.family_name() != pon_messages::FAMILY_NAME {
        return Ok(request.answer(0, AckCode::Nack, None));
    }
    let group_id = if names.group_name() == pon_messages::EVENT_GROUP_NAME {
        GROUP_ID
    } else {
        0
    };
    let info = FamilyInfo {
        family_id: FAMILY_ID,
        group_id,
        version: 1,
    };
    Ok(request.answer(0, AckCode::Ack, Some(serialize_payload(&info)?)))
}

async fn send(log: &Logger, sock: &UnixDatagram, frame: &Frame, peer: &Path) {
    let result = match frame.encode() {
        Ok(buf) => sock.send_to(&buf, peer).await.map(|_| ()).map_err(anyhow::Error::from),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        warn!(log, "failed to send frame"; "peer" => ?peer, "reason" => %e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, args.log_level).fuse();
    let log = Logger::root(drain, slog::o!());

    let path = args
        .mailbox_dir
        .join(format!("{}.sock", pon_messages::FAMILY_NAME));
    if path.exists() {
        std::fs::remove_file(&path).context("failed to remove stale socket")?;
    }
    let sock = UnixDatagram::bind(&path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    info!(log, "serving mailbox"; "path" => ?path);

    let mut seq = 1u32;
    let mut buf = vec![0; MAX_FRAME_SIZE];
    loop {
        let (n_bytes, addr) = match sock.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                warn!(log, "failed to receive"; "reason" => %e);
                continue;
            }
        };
        let Some(peer) = addr.as_pathname() else {
            debug!(log, "dropping frame from unnamed peer");
            continue;
        };
        let request = match Frame::decode(&buf[..n_bytes]) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(log, "dropping malformed frame"; "reason" => ?e);
                continue;
            }
        };
        debug!(log, "=> {request:?}");
        if request.ack != AckCode::Command {
            info!(
                log,
                "answer";
                "seq" => request.header.seq,
                "command" => %request.command,
                "ack" => ?request.ack,
            );
            continue;
        }

        let response = match request.command {
            CommandId::Control(Control::ResolveFamily) => resolve(&request),
            CommandId::Control(Control::JoinGroup | Control::LeaveGroup) => {
                Ok(request.answer(0, AckCode::Ack, None))
            }
            _ => reply(&request),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(log, "malformed request"; "reason" => %e);
                request.answer(0, AckCode::NackMalformed, None)
            }
        };
        debug!(log, "<= {response:?}");
        send(&log, &sock, &response, peer).await;

        // Announce the firmware to each new subscriber.
        if request.command == CommandId::Control(Control::JoinGroup) {
            let event = Frame::new(
                Header::new(FAMILY_ID, seq, 0),
                Direction::Set,
                Event::FirmwareInit,
                AckCode::Command,
            );
            seq = seq.wrapping_add(1);
            send(&log, &sock, &event, peer).await;
        }
    }
}
