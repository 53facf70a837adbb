// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The event channel, on which firmware pushes unsolicited events.

use crate::config::Config;
use crate::controller::SessionState;
use crate::handlers::InboundEvent;
use crate::handlers::Reply;
use crate::probes;
use crate::socket::MailboxSocket;
use crate::socket::Role;
use crate::Error;
use pon_decode::ParseFromPayload;
use pon_decode::PloamStateChange;
use pon_messages::command::CommandId;
use pon_messages::command::Control;
use pon_messages::command::Event;
use pon_messages::control::FamilyInfo;
use pon_messages::control::GroupMembership;
use pon_messages::frame::AckCode;
use pon_messages::frame::Direction;
use pon_messages::frame::Flags;
use pon_messages::frame::Frame;
use pon_messages::frame::Header;
use pon_messages::serialize_payload;
use slog::debug;
use slog::error;
use slog::info;
use slog::trace;
use slog::warn;
use slog::Logger;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// The pause after a failed receive, so a broken socket does not spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The outcome of a single [`EventChannel::run_once`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Progress {
    /// A frame was received and dispatched.
    Frame,
    /// The wait was interrupted before a frame arrived.
    Interrupted,
    /// The channel was cancelled.
    Cancelled,
}

pub(crate) struct EventChannel {
    log: Logger,
    socket: MailboxSocket,
    family: u16,
    port: u32,
    session: Arc<SessionState>,
    // Answers are sent by the command channel's IO loop.
    answer_tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl EventChannel {
    /// Bind the event endpoint and join the event group.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn open_and_subscribe(
        log: Logger,
        config: &Config,
        info: &FamilyInfo,
        port: u32,
        session: Arc<SessionState>,
        answer_tx: mpsc::Sender<Frame>,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        if info.group_id == 0 {
            return Err(Error::GroupNotFound(config.event_group.clone()));
        }
        let socket = MailboxSocket::bind(
            &config.socket_dir,
            &config.family,
            Role::Event,
            &config.peer_path(),
        )?;

        let membership = GroupMembership {
            group_id: info.group_id,
        };
        let join = Frame::new(
            Header::new(info.family_id, 0, port),
            Direction::Set,
            Control::JoinGroup,
            AckCode::Command,
        )
        .with_payload(serialize_payload(&membership)?);
        socket.send(&join).await?;

        let deadline = Instant::now() + config.response_timeout;
        let mut rx_buf = MailboxSocket::rx_buffer();
        loop {
            let n_bytes = timeout_at(deadline, socket.recv(&mut rx_buf))
                .await
                .map_err(|_| Error::Timeout(config.response_timeout))??;
            let Ok(reply) = Frame::decode(&rx_buf[..n_bytes]) else {
                continue;
            };
            if reply.command != CommandId::Control(Control::JoinGroup)
                || reply.header.seq != 0
                || reply.ack == AckCode::Command
            {
                // Events may already be flowing to the new endpoint.
                trace!(log, "ignoring frame while joining"; "command" => %reply.command);
                continue;
            }
            if reply.ack != AckCode::Ack {
                return Err(Error::GroupNotFound(config.event_group.clone()));
            }
            break;
        }
        debug!(
            log,
            "joined event group";
            "group" => &config.event_group,
            "group_id" => info.group_id,
            "endpoint" => ?socket.path(),
        );

        Ok(Self {
            log,
            socket,
            family: info.family_id,
            port,
            session,
            answer_tx,
            cancel,
        })
    }

    /// Wait for one inbound frame and dispatch it.
    ///
    /// Cancellation is observed while waiting, never during dispatch.
    pub(crate) async fn run_once(&self, rx_buf: &mut [u8]) -> Result<Progress, Error> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(Progress::Cancelled),
            result = self.socket.recv(rx_buf) => match result {
                Ok(n_bytes) => {
                    self.dispatch(&rx_buf[..n_bytes]);
                    Ok(Progress::Frame)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Progress::Interrupted),
                Err(e) => Err(Error::Io(e)),
            },
        }
    }

    /// Dispatch events until cancelled.
    pub(crate) async fn run(self) {
        let mut rx_buf = MailboxSocket::rx_buffer();
        loop {
            match self.run_once(&mut rx_buf).await {
                Ok(Progress::Cancelled) => {
                    debug!(self.log, "cancelled, exiting event listener");
                    return;
                }
                Ok(Progress::Frame | Progress::Interrupted) => {}
                Err(e) => {
                    error!(self.log, "failed to receive event"; "reason" => ?e);
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    fn dispatch(&self, buf: &[u8]) {
        let frame = match Frame::decode(buf) {
            Ok(frame) => frame,
            Err(e) => {
                probes::bad__frame!(|| ("evt", "decode"));
                warn!(
                    self.log,
                    "dropping malformed event";
                    "n_bytes" => buf.len(),
                    "reason" => ?e,
                );
                return;
            }
        };
        probes::frame__received!(|| (
            "evt",
            frame.header.seq,
            u16::from(frame.command),
            buf.len() as u64
        ));

        if frame.header.family != self.family {
            probes::bad__frame!(|| ("evt", "family"));
            debug!(
                self.log,
                "dropping event for another family";
                "family" => frame.header.family,
            );
            return;
        }
        let CommandId::Event(event) = frame.command else {
            warn!(
                self.log,
                "dropping non-event frame";
                "seq" => frame.header.seq,
                "command" => %frame.command,
            );
            return;
        };
        trace!(
            self.log,
            "received event";
            "seq" => frame.header.seq,
            "event" => %event,
        );

        match event {
            Event::FirmwareInit => {
                self.session.cache.invalidate();
                info!(self.log, "firmware initialized, caches invalidated");
            }
            Event::PloamState => match PloamStateChange::parse(frame.payload()) {
                Ok(change) => {
                    debug!(
                        self.log,
                        "PLOAM state change";
                        "previous" => change.previous,
                        "current" => change.current,
                    );
                    self.session.observe_ploam(&change);
                }
                Err(e) => {
                    warn!(self.log, "malformed PLOAM state change"; "reason" => ?e);
                }
            },
            _ => {}
        }

        let Some(handler) = self.session.handlers.get(event) else {
            debug!(self.log, "no handler for event"; "event" => %event);
            return;
        };
        let wants_answer =
            event.expects_answer() || frame.flags.contains(Flags::ACK_REQUESTED);
        let inbound = InboundEvent { event, frame };
        let (ack, payload) = match handler(&inbound) {
            Ok(Reply::NoReply) => return,
            Ok(Reply::Ack(payload)) => {
                if !wants_answer {
                    return;
                }
                (AckCode::Ack, payload)
            }
            Err(e) => {
                warn!(
                    self.log,
                    "event handler failed";
                    "event" => %event,
                    "seq" => inbound.frame.header.seq,
                    "reason" => ?e,
                );
                if !wants_answer {
                    return;
                }
                (e.nack_code(), None)
            }
        };
        self.answer(&inbound.frame, ack, payload);
    }

    // Queue an answer for the command channel.
    fn answer(&self, frame: &Frame, ack: AckCode, payload: Option<Vec<u8>>) {
        let answer = frame.answer(self.port, ack, payload);
        if let Err(e) = self.answer_tx.try_send(answer) {
            error!(
                self.log,
                "failed to queue answer";
                "seq" => frame.header.seq,
                "reason" => %e,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EventChannel;
    use super::Progress;
    use crate::controller::SessionState;
    use crate::handlers::InboundEvent;
    use crate::handlers::Reply;
    use crate::socket::MailboxSocket;
    use crate::test_utils::test_logger;
    use crate::test_utils::MockMailbox;
    use crate::test_utils::FAMILY_ID;
    use crate::test_utils::GROUP_ID;
    use crate::Error;
    use pon_messages::command::Event;
    use pon_messages::control::FamilyInfo;
    use pon_messages::frame::AckCode;
    use pon_messages::frame::Flags;
    use pon_messages::frame::Frame;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        mock: MockMailbox,
        channel: EventChannel,
        session: Arc<SessionState>,
        answer_rx: mpsc::Receiver<Frame>,
        cancel: CancellationToken,
    }

    async fn fixture() -> Fixture {
        let mock = MockMailbox::new(Box::new(|_| vec![]));
        let config = mock.config().build().unwrap();
        let info = FamilyInfo {
            family_id: FAMILY_ID,
            group_id: GROUP_ID,
            version: 1,
        };
        let session = Arc::new(SessionState::default());
        let (answer_tx, answer_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let channel = EventChannel::open_and_subscribe(
            test_logger(),
            &config,
            &info,
            1234,
            session.clone(),
            answer_tx,
            cancel.clone(),
        )
        .await
        .unwrap();
        Fixture {
            mock,
            channel,
            session,
            answer_rx,
            cancel,
        }
    }

    async fn run_once(channel: &EventChannel) -> Progress {
        let mut rx_buf = MailboxSocket::rx_buffer();
        tokio::time::timeout(WAIT, channel.run_once(&mut rx_buf))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_once_until_cancelled() {
        let f = fixture().await;
        f.mock.inject(f.mock.event(Event::GtcPloamLog, vec![])).await;
        assert_eq!(run_once(&f.channel).await, Progress::Frame);
        f.cancel.cancel();
        assert_eq!(run_once(&f.channel).await, Progress::Cancelled);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let mut f = fixture().await;
        f.session.handlers.register(
            Event::CalibrationRecord,
            Arc::new(|_: &InboundEvent| Ok(Reply::Ack(None))),
        );
        f.mock.inject_raw(&[0xde, 0xad, 0xbe, 0xef]).await;
        assert_eq!(run_once(&f.channel).await, Progress::Frame);
        assert!(f.answer_rx.try_recv().is_err());

        let event = f.mock.event(Event::CalibrationRecord, vec![]);
        f.mock.inject(event.clone()).await;
        assert_eq!(run_once(&f.channel).await, Progress::Frame);
        let answer = f.answer_rx.try_recv().unwrap();
        assert_eq!(answer.header.seq, event.header.seq);
        assert_eq!(answer.header.port, 1234);
        assert_eq!(answer.ack, AckCode::Ack);
    }

    #[tokio::test]
    async fn test_log_only_event_answered_on_request() {
        let mut f = fixture().await;
        f.session.handlers.register(
            Event::AlarmRaised,
            Arc::new(|_: &InboundEvent| Ok(Reply::Ack(Some(vec![9])))),
        );

        f.mock.inject(f.mock.event(Event::AlarmRaised, vec![])).await;
        run_once(&f.channel).await;
        assert!(f.answer_rx.try_recv().is_err());

        let event = f
            .mock
            .event(Event::AlarmRaised, vec![])
            .with_flags(Flags::ACK_REQUESTED);
        f.mock.inject(event).await;
        run_once(&f.channel).await;
        let answer = f.answer_rx.try_recv().unwrap();
        assert_eq!(answer.ack, AckCode::Ack);
        assert_eq!(answer.payload(), [9]);
    }

    #[tokio::test]
    async fn test_handler_error_is_answered_with_nack() {
        let mut f = fixture().await;
        f.session.handlers.register(
            Event::CalibrationRecord,
            Arc::new(|_: &InboundEvent| Err(Error::Unsupported(String::from("calibration")))),
        );
        f.session.handlers.register(
            Event::AlarmCleared,
            Arc::new(|_: &InboundEvent| Err(Error::Unsupported(String::from("alarm")))),
        );

        f.mock
            .inject(f.mock.event(Event::AlarmCleared, vec![]))
            .await;
        run_once(&f.channel).await;
        assert!(f.answer_rx.try_recv().is_err());

        // A log-only event that asks for an answer gets the NACK too.
        let cleared = f
            .mock
            .event(Event::AlarmCleared, vec![])
            .with_flags(Flags::ACK_REQUESTED);
        f.mock.inject(cleared.clone()).await;
        run_once(&f.channel).await;
        let answer = f.answer_rx.try_recv().unwrap();
        assert_eq!(answer.ack, AckCode::Nack);
        assert_eq!(answer.header.seq, cleared.header.seq);

        f.mock
            .inject(f.mock.event(Event::CalibrationRecord, vec![]))
            .await;
        run_once(&f.channel).await;
        assert_eq!(f.answer_rx.try_recv().unwrap().ack, AckCode::Nack);
    }

    #[tokio::test]
    async fn test_event_for_other_family_is_dropped() {
        let mut f = fixture().await;
        f.session.handlers.register(
            Event::CalibrationRecord,
            Arc::new(|_: &InboundEvent| Ok(Reply::Ack(None))),
        );
        let mut event = f.mock.event(Event::CalibrationRecord, vec![]);
        event.header.family = FAMILY_ID + 1;
        f.mock.inject(event).await;
        assert_eq!(run_once(&f.channel).await, Progress::Frame);
        assert!(f.answer_rx.try_recv().is_err());
    }
}
