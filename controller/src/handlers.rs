// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Handlers for firmware events, and the tables holding them.

use crate::alarm::AlarmReport;
use crate::Error;
use pon_decode::MainState;
use pon_decode::ParseFromAttributes;
use pon_decode::ParseFromPayload;
use pon_messages::attr::AttrGroup;
use pon_messages::command::Event;
use pon_messages::frame::Frame;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

/// A firmware event delivered to a handler.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub event: Event,
    pub frame: Frame,
}

impl InboundEvent {
    /// Return the raw payload of the event.
    pub fn payload(&self) -> &[u8] {
        self.frame.payload()
    }

    /// Return the nested attribute groups of the event.
    pub fn groups(&self) -> &[AttrGroup] {
        &self.frame.groups
    }

    /// Parse the payload as `T`.
    pub fn parse<T: ParseFromPayload>(&self) -> Result<T, Error> {
        T::parse(self.payload()).map_err(Error::from)
    }

    /// Parse the attribute groups as `T`.
    pub fn parse_attributes<T: ParseFromAttributes>(&self) -> Result<T, Error> {
        T::parse_attributes(self.groups()).map_err(Error::from)
    }
}

/// What the dispatcher should do after a handler returns successfully.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Acknowledge the event, with an optional payload.
    ///
    /// Log-only events are acknowledged only if the firmware asked for it.
    Ack(Option<Vec<u8>>),
    /// Send nothing back.
    NoReply,
}

/// A handler for one firmware event.
///
/// An `Err` is answered with the NACK code given by [`Error::nack_code`],
/// for events that expect an answer or ask for one.
pub type EventHandler = Arc<dyn Fn(&InboundEvent) -> Result<Reply, Error> + Send + Sync>;

/// Sees an event before its handler does.
pub type EventObserver = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Called with the previous and new PLOAM main states when they differ.
pub type MainStateCallback = Arc<dyn Fn(MainState, MainState) + Send + Sync>;

/// Called with each optical alarm evaluation that has something to report.
pub type OpticAlarmCallback = Arc<dyn Fn(&AlarmReport) + Send + Sync>;

/// The table of registered event handlers, keyed by event.
#[derive(Default)]
pub(crate) struct HandlerTable {
    handlers: Mutex<BTreeMap<Event, EventHandler>>,
}

impl HandlerTable {
    /// Register a handler, returning the one it replaces.
    pub(crate) fn register(&self, event: Event, handler: EventHandler) -> Option<EventHandler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event, handler)
    }

    pub(crate) fn unregister(&self, event: Event) -> Option<EventHandler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event)
    }

    /// Put an observer in front of the handler for `event`.
    ///
    /// The answer is still the one from the handler it wraps. With no
    /// handler registered, the event is acknowledged.
    pub(crate) fn observe(&self, event: Event, observer: EventObserver) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = handlers.remove(&event);
        let chained: EventHandler = Arc::new(move |inbound: &InboundEvent| {
            observer(inbound);
            match &previous {
                Some(handler) => handler(inbound),
                None => Ok(Reply::Ack(None)),
            }
        });
        handlers.insert(event, chained);
    }

    // The lock is released before the handler is called.
    pub(crate) fn get(&self, event: Event) -> Option<EventHandler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .cloned()
    }
}

/// A slot holding at most one callback.
pub(crate) struct Slot<T: ?Sized> {
    inner: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl<T: ?Sized> Slot<T> {
    /// Replace the callback, returning the previous one.
    pub(crate) fn replace(&self, value: Option<Arc<T>>) -> Option<Arc<T>> {
        std::mem::replace(
            &mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner),
            value,
        )
    }

    pub(crate) fn get(&self) -> Option<Arc<T>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
