// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Local datagram endpoints connected to the mailbox driver.

use crate::probes;
use crate::Error;
use pon_messages::frame::Frame;
use pon_messages::MAX_FRAME_SIZE;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use tokio::net::UnixDatagram;

// Distinguishes endpoints bound by several sessions in one process.
static NEXT_ENDPOINT: AtomicU32 = AtomicU32::new(0);

/// The role of an endpoint, used in its path and in log output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Role {
    Command,
    Event,
}

impl Role {
    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            Role::Command => "cmd",
            Role::Event => "evt",
        }
    }
}

/// A bound endpoint, sending to a single peer.
///
/// The socket file is removed when this is dropped.
#[derive(Debug)]
pub(crate) struct MailboxSocket {
    socket: UnixDatagram,
    path: PathBuf,
    peer: PathBuf,
    role: Role,
}

impl MailboxSocket {
    /// Bind a new endpoint in `dir`.
    pub(crate) fn bind(dir: &Path, family: &str, role: Role, peer: &Path) -> Result<Self, Error> {
        let n = NEXT_ENDPOINT.fetch_add(1, Ordering::Relaxed);
        let pid = nix::unistd::getpid();
        let path = dir.join(format!("{family}-{pid}-{n}-{}.sock", role.as_str()));
        // A previous process with the same PID may have left a file behind.
        let _ = std::fs::remove_file(&path);
        let socket = UnixDatagram::bind(&path)?;
        Ok(Self {
            socket,
            path,
            peer: peer.to_path_buf(),
            role,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn peer(&self) -> &Path {
        &self.peer
    }

    /// Encode and send a frame to the peer.
    pub(crate) async fn send(&self, frame: &Frame) -> Result<usize, Error> {
        let buf = frame.encode()?;
        let n_bytes = self.socket.send_to(&buf, &self.peer).await?;
        probes::frame__sent!(|| (
            self.role.as_str(),
            frame.header.seq,
            u16::from(frame.command),
            n_bytes as u64
        ));
        Ok(n_bytes)
    }

    /// Receive a single datagram into `buf`, returning its length.
    pub(crate) async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }

    /// Return a receive buffer large enough for any frame.
    pub(crate) fn rx_buffer() -> Vec<u8> {
        vec![0u8; MAX_FRAME_SIZE]
    }
}

impl Drop for MailboxSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::MailboxSocket;
    use super::Role;

    #[tokio::test]
    async fn test_bind_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let peer = dir.path().join("peer.sock");
        let a = MailboxSocket::bind(dir.path(), "pon_mbox", Role::Command, &peer).unwrap();
        let b = MailboxSocket::bind(dir.path(), "pon_mbox", Role::Event, &peer).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().to_str().unwrap().ends_with("-cmd.sock"));
        assert!(b.path().to_str().unwrap().ends_with("-evt.sock"));
        assert_eq!(a.peer(), peer.as_path());
        let path = a.path().to_path_buf();
        assert!(path.exists());
        drop(a);
        assert!(!path.exists());
    }
}
