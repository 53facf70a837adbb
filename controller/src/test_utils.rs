// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! An in-process mailbox driver for tests.

use crate::config::ConfigBuilder;
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
use pon_messages::EVENT_GROUP_NAME;
use pon_messages::FAMILY_NAME;
use pon_messages::MAX_FRAME_SIZE;
use slog::o;
use slog::Logger;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UnixDatagram;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) const FAMILY_ID: u16 = 0x1d;
pub(crate) const GROUP_ID: u32 = 7;

pub(crate) fn test_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// Acknowledge a request with `payload`.
pub(crate) fn ack(request: &Frame, payload: Vec<u8>) -> Frame {
    request.answer(0, AckCode::Ack, Some(payload))
}

/// Produces the replies to one request.
pub(crate) type Responder = Box<dyn Fn(&Frame) -> Vec<Frame> + Send + Sync>;

pub(crate) struct MockMailbox {
    dir: TempDir,
    socket: Arc<UnixDatagram>,
    subscribers: Arc<Mutex<Vec<PathBuf>>>,
    requests: Option<mpsc::UnboundedReceiver<Frame>>,
    answers: Option<mpsc::UnboundedReceiver<Frame>>,
    seq: AtomicU32,
    task: JoinHandle<()>,
}

impl Drop for MockMailbox {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockMailbox {
    pub(crate) fn new(responder: Responder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{FAMILY_NAME}.sock"));
        let socket = Arc::new(UnixDatagram::bind(path).unwrap());
        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (answer_tx, answers) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(
            socket.clone(),
            subscribers.clone(),
            responder,
            request_tx,
            answer_tx,
        ));
        Self {
            dir,
            socket,
            subscribers,
            requests: Some(requests),
            answers: Some(answers),
            seq: AtomicU32::new(1),
            task,
        }
    }

    /// A configuration pointing at this mailbox.
    pub(crate) fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .mailbox_dir(self.dir.path())
            .socket_dir(self.dir.path())
            .response_timeout(Duration::from_secs(2))
            .join_timeout(Duration::from_secs(1))
    }

    /// Take the receiver of every request seen by the mailbox.
    pub(crate) fn take_requests(&mut self) -> mpsc::UnboundedReceiver<Frame> {
        self.requests.take().unwrap()
    }

    /// Take the receiver of every answer to an event.
    pub(crate) fn take_answers(&mut self) -> mpsc::UnboundedReceiver<Frame> {
        self.answers.take().unwrap()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Build an event frame.
    pub(crate) fn event(&self, event: Event, payload: Vec<u8>) -> Frame {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Frame::new(
            Header::new(FAMILY_ID, seq, 0),
            Direction::Set,
            event,
            AckCode::Command,
        )
        .with_payload(payload)
    }

    /// Push a frame to every subscriber.
    pub(crate) async fn inject(&self, frame: Frame) {
        self.inject_raw(&frame.encode().unwrap()).await;
    }

    pub(crate) async fn inject_raw(&self, buf: &[u8]) {
        let subscribers = self.subscribers.lock().unwrap().clone();
        for path in subscribers {
            self.socket.send_to(buf, path).await.unwrap();
        }
    }
}

async fn serve(
    socket: Arc<UnixDatagram>,
    subscribers: Arc<Mutex<Vec<PathBuf>>>,
    responder: Responder,
    request_tx: mpsc::UnboundedSender<Frame>,
    answer_tx: mpsc::UnboundedSender<Frame>,
) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    loop {
        let Ok((n_bytes, addr)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let Some(peer) = addr.as_pathname().map(PathBuf::from) else {
            continue;
        };
        let Ok(frame) = Frame::decode(&buf[..n_bytes]) else {
            continue;
        };
        let replies = match frame.command {
            CommandId::Control(Control::ResolveFamily) => {
                let request: ResolveFamily = deserialize_payload(frame.payload()).unwrap();
                if request.family_name() != FAMILY_NAME {
                    vec![frame.answer(0, AckCode::Nack, None)]
                } else {
                    let group_id = if request.group_name() == EVENT_GROUP_NAME {
                        GROUP_ID
                    } else {
                        0
                    };
                    let info = FamilyInfo {
                        family_id: FAMILY_ID,
                        group_id,
                        version: 1,
                    };
                    vec![frame.answer(0, AckCode::Ack, Some(serialize_payload(&info).unwrap()))]
                }
            }
            CommandId::Control(Control::JoinGroup) => {
                subscribers.lock().unwrap().push(peer.clone());
                vec![frame.answer(0, AckCode::Ack, None)]
            }
            _ if frame.ack != AckCode::Command => {
                let _ = answer_tx.send(frame);
                continue;
            }
            _ => {
                let replies = responder(&frame);
                let _ = request_tx.send(frame);
                replies
            }
        };
        for reply in replies {
            let _ = socket.send_to(&reply.encode().unwrap(), &peer).await;
        }
    }
}
