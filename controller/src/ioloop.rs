// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Implementation of the command channel IO loop.

use crate::config::Config;
use crate::messages::OutstandingRequest;
use crate::probes;
use crate::socket::MailboxSocket;
use crate::Error;
use pon_messages::command::CommandId;
use pon_messages::command::Control;
use pon_messages::control::FamilyInfo;
use pon_messages::control::ResolveFamily;
use pon_messages::control::CONTROL_FAMILY;
use pon_messages::deserialize_payload;
use pon_messages::frame::AckCode;
use pon_messages::frame::Direction;
use pon_messages::frame::Frame;
use pon_messages::frame::Header;
use pon_messages::serialize_payload;
use slog::debug;
use slog::error;
use slog::trace;
use slog::Logger;
use std::io;
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// The request currently awaiting its reply.
#[derive(Debug)]
struct InFlight {
    seq: u32,
    deadline: Instant,
    request: OutstandingRequest,
}

// A POD type holding the data we need for the command IO loop. See
// `IoLoop::run` for details.
#[derive(Debug)]
pub(crate) struct IoLoop {
    log: Logger,
    socket: MailboxSocket,
    family: u16,

    // Channel on which we receive outgoing requests from `Controller`. Only
    // one is pulled at a time, and the rest stay queued until the current
    // request completes.
    outgoing_request_rx: mpsc::Receiver<OutstandingRequest>,

    // The request that has been sent and not yet answered, if any.
    outstanding: Option<InFlight>,

    // Answers to firmware events, produced by the event channel. These are
    // sent from this endpoint, since the event endpoint only listens.
    outgoing_answer_rx: mpsc::Receiver<Frame>,

    cancel: CancellationToken,
}

impl IoLoop {
    pub(crate) fn new(
        log: Logger,
        socket: MailboxSocket,
        family: u16,
        outgoing_request_rx: mpsc::Receiver<OutstandingRequest>,
        outgoing_answer_rx: mpsc::Receiver<Frame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            log,
            socket,
            family,
            outgoing_request_rx,
            outstanding: None,
            outgoing_answer_rx,
            cancel,
        }
    }

    // Send a new request, and start its timer.
    async fn send_request(&mut self, request: OutstandingRequest) {
        let seq = request.frame.header.seq;
        match self.socket.send(&request.frame).await {
            Err(e) => {
                error!(
                    self.log,
                    "failed to send outgoing request";
                    "peer" => ?self.socket.peer(),
                    "seq" => seq,
                    "reason" => ?e,
                );

                // Fail the request right away. The socket is local, so a
                // retry would only fail the same way.
                request.complete(Err(e));
            }
            Ok(n_bytes) => {
                trace!(
                    self.log,
                    "sent outgoing request";
                    "seq" => seq,
                    "command" => %request.frame.command,
                    "n_bytes" => n_bytes,
                );
                self.outstanding = Some(InFlight {
                    seq,
                    deadline: Instant::now() + request.timeout,
                    request,
                });
            }
        }
    }

    async fn send_answer(&self, answer: Frame) {
        match self.socket.send(&answer).await {
            Err(e) => {
                error!(
                    self.log,
                    "failed to send answer";
                    "peer" => ?self.socket.peer(),
                    "seq" => answer.header.seq,
                    "reason" => ?e,
                );
            }
            Ok(n_bytes) => {
                trace!(
                    self.log,
                    "sent answer";
                    "seq" => answer.header.seq,
                    "command" => %answer.command,
                    "ack" => ?answer.ack,
                    "n_bytes" => n_bytes,
                );
            }
        }
    }

    fn fail_outstanding(&mut self, err: Error) {
        if let Some(in_flight) = self.outstanding.take() {
            in_flight.request.complete(Err(err));
        }
    }

    fn handle_incoming(&mut self, buf: &[u8]) {
        let frame = match Frame::decode(buf) {
            Ok(frame) => frame,
            Err(e) => {
                probes::bad__frame!(|| ("cmd", "decode"));
                // The header may still be intact, in which case the frame
                // is the (malformed) reply to our request.
                let seq = deserialize_payload::<Header>(buf).ok().map(|h| h.seq);
                error!(
                    self.log,
                    "failed to decode frame";
                    "seq" => ?seq,
                    "n_bytes" => buf.len(),
                    "reason" => ?e,
                );
                if seq.is_some() && seq == self.outstanding.as_ref().map(|o| o.seq) {
                    self.fail_outstanding(Error::Frame(e));
                }
                return;
            }
        };
        probes::frame__received!(|| (
            "cmd",
            frame.header.seq,
            u16::from(frame.command),
            buf.len() as u64
        ));

        if frame.header.family != self.family {
            probes::bad__frame!(|| ("cmd", "family"));
            debug!(
                self.log,
                "dropping frame for another family";
                "family" => frame.header.family,
                "expected" => self.family,
            );
            return;
        }
        if frame.ack == AckCode::Command {
            debug!(
                self.log,
                "dropping unexpected request on command channel";
                "seq" => frame.header.seq,
                "command" => %frame.command,
            );
            return;
        }

        match self.outstanding.take() {
            Some(in_flight) if in_flight.seq == frame.header.seq => {
                trace!(
                    self.log,
                    "received reply";
                    "seq" => frame.header.seq,
                    "ack" => ?frame.ack,
                );
                in_flight.request.complete(Ok(frame));
            }
            other => {
                // Most likely the late reply to a request that already
                // timed out.
                probes::bad__frame!(|| ("cmd", "stale"));
                debug!(
                    self.log,
                    "dropping reply with stale sequence number";
                    "seq" => frame.header.seq,
                    "outstanding" => ?other.as_ref().map(|o| o.seq),
                );
                self.outstanding = other;
            }
        }
    }

    /// Run the IO loop until cancelled.
    ///
    /// Requests are sent strictly one at a time. A request completes with
    /// exactly one of its reply, a timeout, or a transport error. Replies
    /// carrying any other sequence number are dropped.
    pub(crate) async fn run(mut self) {
        let mut rx_buf = MailboxSocket::rx_buffer();
        loop {
            let deadline = self.outstanding.as_ref().map(|o| o.deadline);
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(self.log, "cancelled, exiting IO loop");
                    self.fail_outstanding(Error::ChannelClosed);
                    return;
                }

                maybe_request = self.outgoing_request_rx.recv(), if self.outstanding.is_none() => {
                    let Some(request) = maybe_request else {
                        debug!(self.log, "request channel closed, exiting IO loop");
                        return;
                    };
                    self.send_request(request).await;
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(in_flight) = self.outstanding.take() {
                        debug!(
                            self.log,
                            "request timed out";
                            "seq" => in_flight.seq,
                            "timeout" => ?in_flight.request.timeout,
                        );
                        let timeout = in_flight.request.timeout;
                        in_flight.request.complete(Err(Error::Timeout(timeout)));
                    }
                }

                Some(answer) = self.outgoing_answer_rx.recv() => {
                    self.send_answer(answer).await;
                }

                result = self.socket.recv(&mut rx_buf) => {
                    match result {
                        Ok(n_bytes) => self.handle_incoming(&rx_buf[..n_bytes]),
                        Err(e) => {
                            error!(
                                self.log,
                                "failed to receive on command channel";
                                "reason" => ?e,
                            );
                            self.fail_outstanding(Error::Io(e));
                        }
                    }
                }
            }
        }
    }
}

/// Resolve the protocol family and event group by name.
///
/// This is a single round trip on the command endpoint, made before the IO
/// loop starts.
pub(crate) async fn resolve_family(
    log: &Logger,
    socket: &MailboxSocket,
    config: &Config,
    port: u32,
) -> Result<FamilyInfo, Error> {
    let payload = ResolveFamily::new(&config.family, &config.event_group)?;
    let request = Frame::new(
        Header::new(CONTROL_FAMILY, 0, port),
        Direction::Get,
        Control::ResolveFamily,
        AckCode::Command,
    )
    .with_payload(serialize_payload(&payload)?);

    match socket.send(&request).await {
        Ok(_) => {}
        Err(Error::Io(e))
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) =>
        {
            debug!(
                log,
                "mailbox endpoint is absent";
                "peer" => ?socket.peer(),
                "reason" => ?e,
            );
            return Err(Error::FamilyNotFound(config.family.clone()));
        }
        Err(e) => return Err(e),
    }

    let deadline = Instant::now() + config.response_timeout;
    let mut rx_buf = MailboxSocket::rx_buffer();
    loop {
        let n_bytes = timeout_at(deadline, socket.recv(&mut rx_buf))
            .await
            .map_err(|_| Error::Timeout(config.response_timeout))??;
        let reply = match Frame::decode(&rx_buf[..n_bytes]) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(log, "ignoring malformed frame during resolution"; "reason" => ?e);
                continue;
            }
        };
        if reply.command != CommandId::Control(Control::ResolveFamily)
            || reply.header.seq != 0
            || reply.ack == AckCode::Command
        {
            continue;
        }
        if reply.ack != AckCode::Ack {
            return Err(Error::FamilyNotFound(config.family.clone()));
        }
        let info = deserialize_payload::<FamilyInfo>(reply.payload())?;
        debug!(
            log,
            "resolved protocol family";
            "family" => &config.family,
            "family_id" => info.family_id,
            "group_id" => info.group_id,
            "version" => info.version,
        );
        return Ok(info);
    }
}
