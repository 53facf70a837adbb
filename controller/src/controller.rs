// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Implementation of the main controller logic.

use crate::alarm::AlarmSampler;
use crate::alarm::AlarmState;
use crate::cache::Cache;
use crate::cache::CacheState;
use crate::config::Config;
use crate::eeprom::Eeprom;
use crate::eeprom::FileEeprom;
use crate::eeprom::MemoryEeprom;
use crate::events::EventChannel;
use crate::handlers::EventHandler;
use crate::handlers::EventObserver;
use crate::handlers::HandlerTable;
use crate::handlers::InboundEvent;
use crate::handlers::MainStateCallback;
use crate::handlers::OpticAlarmCallback;
use crate::handlers::Slot;
use crate::ioloop::resolve_family;
use crate::ioloop::IoLoop;
use crate::map_ack;
use crate::messages::OutstandingRequest;
use crate::socket::MailboxSocket;
use crate::socket::Role;
use crate::twdm::Coordinator;
use crate::Error;
use crate::NackKind;
use crate::NUM_OUTSTANDING_REQUESTS;
use pon_decode::AlarmThresholds;
use pon_decode::Capabilities;
use pon_decode::CounterSet;
use pon_decode::EncodePayload;
use pon_decode::Error as DecodeError;
use pon_decode::FirmwareAlarm;
use pon_decode::Limits;
use pon_decode::MainState;
use pon_decode::OperatingMode;
use pon_decode::OpticConfig;
use pon_decode::ParseFromAttributes;
use pon_decode::ParseFromPayload;
use pon_decode::PloamStateChange;
use pon_decode::RegisterAccess;
use pon_decode::VersionInfo;
use pon_messages::attr::AttrGroup;
use pon_messages::command::Command;
use pon_messages::command::Event;
use pon_messages::control::FamilyInfo;
use pon_messages::frame::AckCode;
use pon_messages::frame::Direction;
use pon_messages::frame::Flags;
use pon_messages::frame::Frame;
use pon_messages::frame::Header;
use slog::debug;
use slog::warn;
use slog::Logger;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// State shared between the controller and its background tasks.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) cache: Cache,
    pub(crate) handlers: HandlerTable,
    pub(crate) main_state_callback: Slot<dyn Fn(MainState, MainState) + Send + Sync>,
    pub(crate) alarms: Arc<AlarmState>,
}

impl SessionState {
    /// Apply a PLOAM state change to the alarm glue.
    pub(crate) fn observe_ploam(&self, change: &PloamStateChange) {
        self.alarms.observe_ploam(change);
        let (previous, current) = (change.previous_main(), change.current_main());
        if previous != current {
            if let Some(callback) = self.main_state_callback.get() {
                callback(previous, current);
            }
        }
    }
}

/// A synchronous request to the firmware.
#[derive(Clone, Debug)]
pub struct Request {
    pub direction: Direction,
    pub command: Command,
    pub flags: Flags,
    pub payload: Option<Vec<u8>>,
    pub groups: Vec<AttrGroup>,
    /// Overrides the configured response timeout.
    pub timeout: Option<Duration>,
}

impl Request {
    fn new(direction: Direction, command: Command) -> Self {
        Self {
            direction,
            command,
            flags: Flags::empty(),
            payload: None,
            groups: vec![],
            timeout: None,
        }
    }

    /// Read a firmware object.
    pub fn get(command: Command) -> Self {
        Self::new(Direction::Get, command)
    }

    /// Write a firmware object.
    pub fn set(command: Command) -> Self {
        Self::new(Direction::Set, command)
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_group(mut self, group: AttrGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Converts a positive reply into a typed value.
pub enum Decoder<T> {
    /// Decode the opaque payload.
    Payload(fn(&[u8]) -> Result<T, DecodeError>),
    /// Decode the nested attribute groups.
    Attributes(fn(&[AttrGroup]) -> Result<T, DecodeError>),
}

impl<T: ParseFromPayload> Decoder<T> {
    pub fn payload() -> Self {
        Decoder::Payload(T::parse)
    }
}

impl<T: ParseFromAttributes> Decoder<T> {
    pub fn attributes() -> Self {
        Decoder::Attributes(T::parse_attributes)
    }
}

/// Decides how a NACK is reported, in place of the default mapping.
///
/// Returning `None` accepts the NACK, and the reply is decoded as if it had
/// been acknowledged.
pub type ErrorOverride = fn(NackKind) -> Option<Error>;

/// A decoded reply.
#[derive(Clone, Debug, PartialEq)]
pub struct Response<T> {
    pub value: T,
    /// The flags echoed by the firmware.
    pub flags: Flags,
}

/// A request that has been queued, and whose reply may be awaited.
pub struct PendingRequest<T> {
    seq: u32,
    response_rx: oneshot::Receiver<Result<Frame, Error>>,
    decoder: Decoder<T>,
    error_override: Option<ErrorOverride>,
}

impl<T> PendingRequest<T> {
    /// The sequence number of the request.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Wait for the reply.
    ///
    /// This resolves with exactly one of the decoded reply, the error the
    /// reply maps to, a timeout, or a transport error.
    pub async fn wait(self) -> Result<Response<T>, Error> {
        let frame = self
            .response_rx
            .await
            .map_err(|_| Error::ChannelClosed)??;
        if frame.ack != AckCode::Ack {
            match (NackKind::from_ack(frame.ack), self.error_override) {
                (Some(kind), Some(error_override)) => {
                    if let Some(err) = error_override(kind) {
                        return Err(err);
                    }
                }
                _ => return Err(map_ack(frame.ack)),
            }
        }
        let value = match self.decoder {
            Decoder::Payload(decode) => decode(frame.payload())?,
            Decoder::Attributes(decode) => decode(&frame.groups)?,
        };
        Ok(Response {
            value,
            flags: frame.flags,
        })
    }
}

// Read the optional status word at the start of a reply to a write.
fn parse_status(buf: &[u8]) -> Result<Option<i32>, DecodeError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[..4]);
    Ok(Some(i32::from_le_bytes(raw)))
}

/// A session with the PON firmware mailbox.
pub struct Controller {
    config: Config,
    log: Logger,
    info: FamilyInfo,
    port: u32,
    seq: AtomicU32,
    session: Arc<SessionState>,
    twdm: Arc<Coordinator>,

    // Channel onto which requests are sent.
    //
    // The command task owns the receiving end of this, and actually sends
    // out the frames. See `IoLoop` for details.
    outgoing_request_tx: mpsc::Sender<OutstandingRequest>,

    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel.cancel();
        for (_, task) in self.tasks.iter() {
            task.abort();
        }
    }
}

impl Controller {
    /// Open a session with the mailbox driver.
    ///
    /// This resolves the protocol family, joins the event group if
    /// configured to, and starts the background tasks. Failure to resolve
    /// the family is fatal.
    pub async fn open(config: Config, log: Logger) -> Result<Self, Error> {
        if let Err(e) = usdt::register_probes() {
            warn!(log, "failed to register DTrace probes"; "reason" => ?e);
        }

        let port = nix::unistd::getpid().as_raw() as u32;
        let socket = MailboxSocket::bind(
            &config.socket_dir,
            &config.family,
            Role::Command,
            &config.peer_path(),
        )?;
        let info = resolve_family(&log, &socket, &config, port).await?;

        let eeprom: Arc<dyn Eeprom> = match &config.eeprom {
            Some(paths) => Arc::new(FileEeprom::open(paths)?),
            None => Arc::new(MemoryEeprom::new(log.new(slog::o!("eeprom" => "memory")))),
        };
        let strategy = config.tuning_strategy.build(&log);
        let twdm = Arc::new(Coordinator::new(
            log.new(slog::o!("component" => "twdm")),
            config.channel_mask,
            strategy,
            eeprom.clone(),
        ));
        let session = Arc::new(SessionState::default());
        register_twdm_handlers(&session.handlers, &twdm);

        let cancel = CancellationToken::new();
        let (outgoing_request_tx, outgoing_request_rx) = mpsc::channel(NUM_OUTSTANDING_REQUESTS);
        let (answer_tx, answer_rx) = mpsc::channel(NUM_OUTSTANDING_REQUESTS);

        // Join before spawning anything, so a failure leaves nothing running.
        let events = if config.subscribe_events {
            Some(
                EventChannel::open_and_subscribe(
                    log.new(slog::o!("task" => "events")),
                    &config,
                    &info,
                    port,
                    session.clone(),
                    answer_tx,
                    cancel.clone(),
                )
                .await?,
            )
        } else {
            None
        };

        let mut tasks = Vec::with_capacity(3);
        let io_loop = IoLoop::new(
            log.new(slog::o!("task" => "command")),
            socket,
            info.family_id,
            outgoing_request_rx,
            answer_rx,
            cancel.clone(),
        );
        tasks.push(("command", tokio::spawn(io_loop.run())));
        if let Some(events) = events {
            tasks.push(("events", tokio::spawn(events.run())));
        }
        let sampler = AlarmSampler::new(
            log.new(slog::o!("task" => "alarms")),
            session.alarms.clone(),
            eeprom,
            config.alarm_interval,
            cancel.clone(),
        );
        tasks.push(("alarms", tokio::spawn(sampler.run())));

        debug!(
            log,
            "opened mailbox session";
            "family" => &config.family,
            "family_id" => info.family_id,
            "port" => port,
        );
        Ok(Self {
            config,
            log,
            info,
            port,
            seq: AtomicU32::new(1),
            session,
            twdm,
            outgoing_request_tx,
            cancel,
            tasks,
        })
    }

    /// Stop the background tasks.
    ///
    /// The tasks share one join timeout to exit. A task that does not is
    /// aborted and reported as an error.
    pub async fn close(mut self) -> Result<(), Error> {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.config.join_timeout;
        let mut result = Ok(());
        for (name, mut task) in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(self.log, "task failed"; "task" => name, "reason" => ?e);
                }
                Err(_) => {
                    task.abort();
                    warn!(self.log, "task did not exit in time, aborted"; "task" => name);
                    if result.is_ok() {
                        result = Err(Error::ShutdownTimeout(name));
                    }
                }
            }
        }
        result
    }

    /// Return the resolved protocol family.
    pub fn family_info(&self) -> FamilyInfo {
        self.info
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Allocate the next sequence number. Zero is reserved for the control
    // messages used while opening the session.
    fn next_seq(&self) -> u32 {
        loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }

    /// Queue a request.
    ///
    /// Requests are sent one at a time, in the order they were queued. The
    /// reply is awaited with [`PendingRequest::wait`].
    pub async fn send_request<T>(
        &self,
        request: Request,
        decoder: Decoder<T>,
        error_override: Option<ErrorOverride>,
    ) -> Result<PendingRequest<T>, Error> {
        let seq = self.next_seq();
        let mut frame = Frame::new(
            Header::new(self.info.family_id, seq, self.port),
            request.direction,
            request.command,
            AckCode::Command,
        )
        .with_flags(request.flags);
        frame.payload = request.payload;
        frame.groups = request.groups;

        let (response_tx, response_rx) = oneshot::channel();
        let outstanding = OutstandingRequest {
            frame,
            timeout: request.timeout.unwrap_or(self.config.response_timeout),
            response_tx,
        };
        self.outgoing_request_tx
            .send(outstanding)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(PendingRequest {
            seq,
            response_rx,
            decoder,
            error_override,
        })
    }

    async fn rpc<T>(&self, request: Request, decoder: Decoder<T>) -> Result<T, Error> {
        let pending = self.send_request(request, decoder, None).await?;
        pending.wait().await.map(|response| response.value)
    }

    /// Read a firmware object and decode its payload.
    pub async fn get<T: ParseFromPayload>(&self, command: Command) -> Result<T, Error> {
        self.rpc(Request::get(command), Decoder::payload()).await
    }

    /// Write a firmware object.
    ///
    /// A negative status word in the reply is reported as
    /// [`Error::Status`].
    pub async fn set<P: EncodePayload + ?Sized>(
        &self,
        command: Command,
        payload: &P,
    ) -> Result<(), Error> {
        let request = Request::set(command).with_payload(payload.encode()?);
        match self.rpc(request, Decoder::Payload(parse_status)).await? {
            Some(status) if status < 0 => Err(Error::Status(status)),
            _ => Ok(()),
        }
    }

    // Serve a value from the cache, or read and cache it.
    async fn cached<T: ParseFromPayload + Copy>(
        &self,
        command: Command,
        read: fn(&CacheState) -> Option<T>,
        store: fn(&mut CacheState, T),
    ) -> Result<T, Error> {
        let generation = self.session.cache.generation();
        if let Some(value) = self.session.cache.read(read) {
            return Ok(value);
        }
        let value = self.get::<T>(command).await?;
        self.session.cache.store(generation, |s| store(s, value));
        Ok(value)
    }

    /// Return the firmware capabilities.
    pub async fn capabilities(&self) -> Result<Capabilities, Error> {
        self.cached(
            Command::Capabilities,
            |s| s.capabilities,
            |s, v| s.capabilities = Some(v),
        )
        .await
    }

    /// Return the firmware version.
    pub async fn version(&self) -> Result<VersionInfo, Error> {
        self.cached(Command::Version, |s| s.version, |s, v| s.version = Some(v))
            .await
    }

    /// Return the firmware resource limits.
    pub async fn limits(&self) -> Result<Limits, Error> {
        self.cached(Command::Limits, |s| s.limits, |s, v| s.limits = Some(v))
            .await
    }

    /// Return the current operating mode.
    pub async fn mode(&self) -> Result<OperatingMode, Error> {
        self.cached(Command::Mode, |s| s.mode, |s, v| s.mode = Some(v))
            .await
    }

    /// Select the operating mode.
    pub async fn set_mode(&self, mode: OperatingMode) -> Result<(), Error> {
        let generation = self.session.cache.generation();
        self.set(Command::Mode, &mode).await?;
        self.session.cache.store(generation, |s| s.mode = Some(mode));
        Ok(())
    }

    pub async fn optic_config(&self) -> Result<OpticConfig, Error> {
        self.get(Command::OpticConfig).await
    }

    pub async fn set_optic_config(&self, config: &OpticConfig) -> Result<(), Error> {
        let generation = self.session.cache.generation();
        self.set(Command::OpticConfig, config).await?;
        self.session
            .cache
            .store(generation, |s| s.external_calibration = None);
        Ok(())
    }

    /// Return `true` if the transceiver is externally calibrated.
    pub async fn external_calibration(&self) -> Result<bool, Error> {
        let generation = self.session.cache.generation();
        if let Some(value) = self.session.cache.read(|s| s.external_calibration) {
            return Ok(value);
        }
        let value = self.optic_config().await?.external_calibration;
        self.session
            .cache
            .store(generation, |s| s.external_calibration = Some(value));
        Ok(value)
    }

    /// Read a counter snapshot.
    pub async fn counters<C: CounterSet>(&self) -> Result<C, Error> {
        self.rpc(Request::get(C::COMMAND), Decoder::attributes())
            .await
    }

    /// Return the state of every firmware alarm.
    pub async fn alarm_status(&self) -> Result<Vec<FirmwareAlarm>, Error> {
        let request = Request::get(Command::AlarmStatus).with_flags(Flags::DUMP);
        self.rpc(request, Decoder::attributes()).await
    }

    /// Read a firmware register.
    pub async fn read_register(&self, addr: u32) -> Result<u32, Error> {
        let access = RegisterAccess { addr, value: 0 };
        let request = Request::get(Command::Register).with_payload(access.encode()?);
        let reply: RegisterAccess = self.rpc(request, Decoder::payload()).await?;
        Ok(reply.value)
    }

    /// Write a firmware register.
    pub async fn write_register(&self, addr: u32, value: u32) -> Result<(), Error> {
        self.set(Command::Register, &RegisterAccess { addr, value })
            .await
    }

    /// Register a handler for an event, returning the one it replaces.
    pub fn register_handler(&self, event: Event, handler: EventHandler) -> Option<EventHandler> {
        self.session.handlers.register(event, handler)
    }

    pub fn unregister_handler(&self, event: Event) -> Option<EventHandler> {
        self.session.handlers.unregister(event)
    }

    /// Observe an event without replacing its handler.
    ///
    /// The observer runs first, and the registered handler still produces
    /// the answer.
    pub fn observe_event(&self, event: Event, observer: EventObserver) {
        self.session.handlers.observe(event, observer);
    }

    /// Set the callback for PLOAM main state changes, returning the previous
    /// one.
    pub fn set_main_state_callback(
        &self,
        callback: Option<MainStateCallback>,
    ) -> Option<MainStateCallback> {
        self.session.main_state_callback.replace(callback)
    }

    /// Set the callback for optical alarm reports, returning the previous
    /// one.
    pub fn set_optic_alarm_callback(
        &self,
        callback: Option<OpticAlarmCallback>,
    ) -> Option<OpticAlarmCallback> {
        self.session.alarms.callback.replace(callback)
    }

    /// Set the optical alarm thresholds.
    ///
    /// If never set, they are read from the transceiver on the first sample.
    pub fn set_alarm_thresholds(&self, thresholds: AlarmThresholds) {
        self.session.alarms.set_thresholds(thresholds);
    }

    pub fn alarm_thresholds(&self) -> Option<AlarmThresholds> {
        self.session.alarms.thresholds()
    }

    /// Return the TWDM coordinator.
    pub fn twdm(&self) -> &Coordinator {
        &self.twdm
    }
}

fn register_twdm_handlers(handlers: &HandlerTable, twdm: &Arc<Coordinator>) {
    let coordinator = twdm.clone();
    handlers.register(
        Event::TwdmWavelengthCheck,
        Arc::new(move |event: &InboundEvent| coordinator.handle_check(event)),
    );
    for event in [Event::TwdmWavelengthConfig, Event::TwdmWavelengthTuning] {
        let coordinator = twdm.clone();
        handlers.register(
            event,
            Arc::new(move |event: &InboundEvent| coordinator.handle_execute(event)),
        );
    }
}
