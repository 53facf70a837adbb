// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Definitions of messages passed between the controller and the IO loop.

use crate::Error;
use pon_messages::frame::Frame;
use std::time::Duration;
use tokio::sync::oneshot;

/// A request from host to firmware that has not yet been completed.
#[derive(Debug)]
pub(crate) struct OutstandingRequest {
    /// The frame to send, with its sequence number already assigned.
    pub(crate) frame: Frame,
    /// The time to wait for the reply, measured from the send.
    pub(crate) timeout: Duration,
    /// The channel on which the eventual reply will be sent.
    pub(crate) response_tx: oneshot::Sender<Result<Frame, Error>>,
}

impl OutstandingRequest {
    /// Complete the request.
    ///
    /// The waiter may have given up, in which case the result is dropped.
    pub(crate) fn complete(self, result: Result<Frame, Error>) {
        let _ = self.response_tx.send(result);
    }
}
