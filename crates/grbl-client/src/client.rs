//! Async connection to a Grbl controller.
//!
//! A [`Client`] owns one reader task and one command lock:
//!
//! ```text
//! transport ──bytes──▶ reader task: LineCodec ─▶ BootState ─▶ publish Message
//!                                                        └──▶ capture sink (if a command is waiting)
//! command() ─▶ lock (FIFO) ─▶ exchange task: install sink ─▶ write line ─▶ collect until ok / error:<code>
//! ```
//!
//! The reader task holds the command lock from creation until the unlock
//! notice has been processed, so no command can be written (or capture the
//! notice) before the controller has finished booting.
//!
//! Once a command holds the lock, its exchange runs in its own task. Dropping
//! the `command()` future only discards the result; the lock stays held until
//! the terminal marker arrives or the connection closes.

use std::sync::{Arc, OnceLock};

use grbl_protocol::{
    decode_help, decode_settings, decode_status, BootEvent, BootState, Catalog, Command,
    LineCodec, MachineStatus, PendingResponse, Position, Setting,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc, oneshot, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, Disconnect};
use crate::events::{Event, EventPublisher};

/// Size of a single transport read.
const READ_CHUNK: usize = 1024;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// Shared State
// ============================================================================

/// Where inbound message lines go besides the publisher.
#[derive(Default)]
struct Inbox {
    /// Sink of the command currently collecting a response.
    sink: Option<mpsc::UnboundedSender<String>>,
    /// Set once the reader task has stopped.
    closed: Option<Disconnect>,
}

/// State shared between the reader task and command callers.
struct Shared {
    name: String,
    catalog: Catalog,
    publisher: Box<dyn EventPublisher>,
    version: OnceLock<String>,
    inbox: Mutex<Inbox>,
    closed_notify: Notify,
}

impl Shared {
    /// Route a boot state machine event.
    fn dispatch(&self, event: BootEvent) {
        match event {
            BootEvent::Version(version) => {
                debug!("Client[{}]: Grbl version {}", self.name, version);
                let _ = self.version.set(version.clone());
                self.publisher.publish(Event::Version(version));
            }
            BootEvent::Message(line) => {
                trace!("Client[{}]: <- {}", self.name, line);
                self.publisher.publish(Event::Message(line.clone()));
                if let Some(sink) = &self.inbox.lock().sink {
                    let _ = sink.send(line);
                }
            }
        }
    }

    /// Mark the connection closed and wake every waiter.
    fn close(&self, reason: Disconnect) {
        let mut inbox = self.inbox.lock();
        if inbox.closed.is_none() {
            match &reason {
                Disconnect::Shutdown => debug!("Client[{}]: {}", self.name, reason),
                _ => warn!("Client[{}]: Connection lost: {}", self.name, reason),
            }
            inbox.closed = Some(reason);
        }
        // Dropping the sink ends the waiting command's receive loop.
        inbox.sink = None;
        drop(inbox);
        self.closed_notify.notify_waiters();
    }

    fn disconnect(&self) -> Option<Disconnect> {
        self.inbox.lock().closed.clone()
    }

    fn disconnect_error(&self) -> ClientError {
        self.disconnect().unwrap_or(Disconnect::Shutdown).into()
    }
}

/// Capture of inbound lines for the command holding the lock.
///
/// Removed on drop so every exit path of a command releases it.
struct Capture {
    shared: Arc<Shared>,
}

impl Capture {
    fn install(shared: Arc<Shared>, sink: mpsc::UnboundedSender<String>) -> ClientResult<Self> {
        let mut inbox = shared.inbox.lock();
        if let Some(reason) = &inbox.closed {
            return Err(reason.clone().into());
        }
        inbox.sink = Some(sink);
        drop(inbox);
        Ok(Capture { shared })
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.shared.inbox.lock().sink = None;
    }
}

/// Closes the connection if the reader task is dropped (aborted).
struct CloseOnDrop(Arc<Shared>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close(Disconnect::Shutdown);
    }
}

// ============================================================================
// Reader Task
// ============================================================================

async fn run_reader<R>(mut reader: R, shared: Arc<Shared>, boot_guard: OwnedMutexGuard<Writer>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let _close_on_drop = CloseOnDrop(shared.clone());
    let mut boot_guard = Some(boot_guard);
    let mut codec = LineCodec::new();
    let mut state = BootState::default();
    let mut read_buf = [0u8; READ_CHUNK];

    let reason = 'read: loop {
        let n = match reader.read(&mut read_buf).await {
            Ok(0) => {
                if codec.buffered_len() > 0 {
                    debug!("Client[{}]: Discarding partial line {:?}", shared.name, codec.buffer_as_str());
                }
                break 'read Disconnect::Eof;
            }
            Ok(n) => n,
            Err(e) => break 'read Disconnect::Io(e.to_string()),
        };
        codec.push(&read_buf[..n]);

        while let Some(line) = codec.decode_line() {
            let (next, event) = match state.advance(&line) {
                Ok(step) => step,
                Err(e) => break 'read Disconnect::Banner(e),
            };
            shared.dispatch(event);
            state = next;

            if state.is_steady() && boot_guard.take().is_some() {
                debug!("Client[{}]: Boot complete", shared.name);
            }
        }
    };

    shared.close(reason);
}

// ============================================================================
// Command Exchange
// ============================================================================

async fn write_line(writer: &mut Writer, text: &str) -> std::io::Result<()> {
    writer.write_all(&LineCodec::encode_command(text)).await?;
    writer.flush().await
}

/// Write one command and collect its response while holding the command lock.
async fn run_exchange(
    shared: Arc<Shared>,
    mut writer: OwnedMutexGuard<Writer>,
    text: String,
) -> ClientResult<Vec<String>> {
    let (sink, mut lines) = mpsc::unbounded_channel();
    let _capture = Capture::install(shared.clone(), sink)?;

    debug!("Client[{}]: -> {}", shared.name, text);
    shared.publisher.publish(Event::Command(text.clone()));
    if let Err(e) = write_line(&mut writer, &text).await {
        // A partly written line may still be answered.
        shared.close(Disconnect::Io(e.to_string()));
        return Err(e.into());
    }

    let mut pending = PendingResponse::new();
    while let Some(line) = lines.recv().await {
        if let Some(result) = pending.push(&line, &shared.catalog) {
            return result.map_err(|e| {
                warn!("Client[{}]: Command '{}' failed: {}", shared.name, text, e);
                e.into()
            });
        }
    }

    Err(shared.disconnect_error())
}

// ============================================================================
// Client
// ============================================================================

/// A connection to a Grbl controller.
///
/// Commands are serialized: each call waits (in submission order) until every
/// earlier command has received its terminal marker.
pub struct Client {
    shared: Arc<Shared>,
    writer: Arc<tokio::sync::Mutex<Writer>>,
    reader: JoinHandle<()>,
    events: Option<broadcast::Sender<Event>>,
}

impl Client {
    /// Start a connection over a transport, publishing events on a broadcast
    /// channel available through [`Client::subscribe`].
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn connect<R, W>(reader: R, writer: W, catalog: Catalog, config: ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let mut client = Client::with_publisher(reader, writer, catalog, config, events.clone()).await;
        client.events = Some(events);
        client
    }

    /// Connect to a TCP serial bridge.
    pub async fn connect_tcp<A: ToSocketAddrs>(
        addr: A,
        catalog: Catalog,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Client::connect(reader, writer, catalog, config).await)
    }

    /// Start a connection that publishes events to `publisher`.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn with_publisher<R, W, P>(
        reader: R,
        writer: W,
        catalog: Catalog,
        config: ClientConfig,
        publisher: P,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        P: EventPublisher,
    {
        let shared = Arc::new(Shared {
            name: config.name,
            catalog,
            publisher: Box::new(publisher),
            version: OnceLock::new(),
            inbox: Mutex::new(Inbox::default()),
            closed_notify: Notify::new(),
        });

        let writer: Writer = Box::new(writer);
        let writer = Arc::new(tokio::sync::Mutex::new(writer));
        // Uncontended: nobody else has seen this mutex yet.
        let boot_guard = writer.clone().lock_owned().await;

        debug!("Client[{}]: Awaiting version banner", shared.name);
        let reader = tokio::spawn(run_reader(reader, shared.clone(), boot_guard));

        Client {
            shared,
            writer,
            reader,
            events: None,
        }
    }

    /// Subscribe to connection events.
    ///
    /// Returns `None` if the client was built with a custom publisher.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Event>> {
        self.events.as_ref().map(|events| events.subscribe())
    }

    /// The firmware version from the boot banner, once seen.
    pub fn version(&self) -> Option<&str> {
        self.shared.version.get().map(String::as_str)
    }

    /// Wait until the boot sequence has completed.
    ///
    /// Fails if the connection closed first (a malformed banner is reported as
    /// a protocol error).
    pub async fn ready(&self) -> ClientResult<()> {
        let _writer = self.writer.lock().await;
        match self.shared.disconnect() {
            Some(reason) => Err(reason.into()),
            None => Ok(()),
        }
    }

    /// Wait until the connection closes and return the reason.
    pub async fn closed(&self) -> ClientError {
        loop {
            let notified = self.shared.closed_notify.notified();
            if let Some(reason) = self.shared.disconnect() {
                return reason.into();
            }
            notified.await;
        }
    }

    /// Stop the reader task. Pending and future commands fail.
    pub fn shutdown(&self) {
        self.reader.abort();
        self.shared.close(Disconnect::Shutdown);
    }

    /// Send a command line and collect its response.
    ///
    /// Returns the lines received before `ok`, or the catalog-resolved error
    /// for `error:<code>`. There is no timeout: a command the controller never
    /// answers blocks every later command until the connection is closed.
    ///
    /// Cancelling the returned future while it waits for the lock withdraws
    /// the command. Cancelling it later does not: the command still occupies
    /// the connection until its terminal marker arrives.
    ///
    /// A failed write closes the connection.
    pub async fn command(&self, text: &str) -> ClientResult<Vec<String>> {
        let writer = self.writer.clone().lock_owned().await;

        let (reply, result) = oneshot::channel();
        let exchange = run_exchange(self.shared.clone(), writer, text.to_string());
        tokio::spawn(async move {
            let _ = reply.send(exchange.await);
        });

        match result.await {
            Ok(result) => result,
            Err(_) => Err(self.shared.disconnect_error()),
        }
    }

    /// Send a [`Command`] and collect its response.
    pub async fn send(&self, command: &Command) -> ClientResult<Vec<String>> {
        self.command(&command.to_command_string()).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Request and decode a status report.
    pub async fn status(&self) -> ClientResult<MachineStatus> {
        let lines = self.send(&Command::Status).await?;
        Ok(decode_status(&lines)?)
    }

    /// Request the help line.
    pub async fn help(&self) -> ClientResult<String> {
        let lines = self.send(&Command::Help).await?;
        Ok(decode_help(&lines)?)
    }

    /// Read all settings.
    pub async fn settings(&self) -> ClientResult<Vec<Setting>> {
        let lines = self.send(&Command::Settings).await?;
        Ok(decode_settings(&lines, &self.shared.catalog)?)
    }

    // ========================================================================
    // Shortcuts
    // ========================================================================

    /// Run the homing cycle (`$H`).
    pub async fn run_homing_cycle(&self) -> ClientResult<Vec<String>> {
        self.send(&Command::RunHomingCycle).await
    }

    /// Clear the alarm lock (`$X`).
    pub async fn kill_alarm_lock(&self) -> ClientResult<Vec<String>> {
        self.send(&Command::KillAlarmLock).await
    }

    /// Select rapid motion mode (`G0`).
    pub async fn rapid_travel(&self) -> ClientResult<Vec<String>> {
        self.send(&Command::RapidTravel).await
    }

    /// Interpret coordinates as inches (`G20`).
    pub async fn imperial_coordinates(&self) -> ClientResult<Vec<String>> {
        self.send(&Command::ImperialCoordinates).await
    }

    /// Interpret coordinates as millimeters (`G21`).
    pub async fn metric_coordinates(&self) -> ClientResult<Vec<String>> {
        self.send(&Command::MetricCoordinates).await
    }

    /// Interpret coordinates as absolute positions (`G90`).
    pub async fn absolute_positioning(&self) -> ClientResult<Vec<String>> {
        self.send(&Command::AbsolutePositioning).await
    }

    /// Interpret coordinates as offsets from the current position (`G91`).
    pub async fn incremental_positioning(&self) -> ClientResult<Vec<String>> {
        self.send(&Command::IncrementalPositioning).await
    }

    /// Move to `position`; only the axes provided are sent.
    pub async fn position(&self, position: Position) -> ClientResult<Vec<String>> {
        self.send(&Command::Position(position)).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
