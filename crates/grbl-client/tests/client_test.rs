//! Integration tests for the Grbl client over an in-memory transport.
//!
//! Each test plays the controller on the far end of a `tokio::io::duplex`
//! pipe: it writes the boot sequence and responses, and reads the command
//! lines the client sends.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use grbl_client::{Client, ClientConfig, ClientError, Disconnect, Event};
use grbl_protocol::{Axes, Catalog, Position};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf, ReadHalf,
    WriteHalf,
};
use tokio::sync::mpsc;

const BANNER: &str = "Grbl 1.1f ['$' for help]\r\n";
const UNLOCK: &str = "[MSG:'$H'|'$X' to unlock]\r\n";

/// The controller side of the pipe.
struct Device {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Device {
    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.expect("device write");
        self.writer.flush().await.expect("device flush");
    }

    async fn boot(&mut self) {
        self.send(BANNER).await;
        self.send(UNLOCK).await;
    }

    /// Read one command line sent by the client, without the terminator.
    async fn expect_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.expect("device read");
        assert!(line.ends_with("\r\n"), "line not CR LF terminated: {:?}", line);
        line.truncate(line.len() - 2);
        line
    }

    /// Assert that the client writes nothing for a short while.
    async fn expect_silence(&mut self) {
        let mut line = String::new();
        let result = tokio::time::timeout(Duration::from_millis(50), self.reader.read_line(&mut line)).await;
        assert!(result.is_err(), "unexpected write: {:?}", line);
    }
}

/// Transport read half fed chunk by chunk (or with an error) from the test.
struct ScriptedReader {
    chunks: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
}

impl AsyncRead for ScriptedReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.chunks.poll_recv(cx) {
            Poll::Ready(Some(Ok(data))) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Transport write half whose every write fails.
struct BrokenWriter;

impl AsyncWrite for BrokenWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Build a client with a recording publisher and the controller end of the pipe.
async fn setup(catalog: Catalog) -> (Client, Device, mpsc::UnboundedReceiver<Event>) {
    let (client_io, device_io) = tokio::io::duplex(4096);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (device_read, device_write) = tokio::io::split(device_io);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let client = Client::with_publisher(
        client_read,
        client_write,
        catalog,
        ClientConfig::named("test"),
        events_tx,
    )
    .await;

    let device = Device {
        reader: BufReader::new(device_read),
        writer: device_write,
    };
    (client, device, events_rx)
}

async fn booted(catalog: Catalog) -> (Client, Device, mpsc::UnboundedReceiver<Event>) {
    let (client, mut device, mut events) = setup(catalog).await;
    device.boot().await;
    client.ready().await.expect("boot should complete");
    assert_eq!(events.recv().await, Some(Event::Version("1.1f".to_string())));
    assert!(matches!(events.recv().await, Some(Event::Message(_))));
    (client, device, events)
}

// ============================================================================
// Boot Sequence
// ============================================================================

#[tokio::test]
async fn test_boot_sequence_events() {
    let (client, mut device, mut events) = setup(Catalog::default()).await;
    assert!(client.version().is_none());

    device.send(BANNER).await;
    device.send(UNLOCK).await;
    client.ready().await.expect("boot should complete");

    assert_eq!(client.version(), Some("1.1f"));
    assert_eq!(events.recv().await, Some(Event::Version("1.1f".to_string())));
    assert_eq!(
        events.recv().await,
        Some(Event::Message("[MSG:'$H'|'$X' to unlock]".to_string()))
    );
}

#[tokio::test]
async fn test_boot_sequence_split_across_chunks() {
    let (client, mut device, mut events) = setup(Catalog::default()).await;

    let boot = format!("{}\r\n{}", BANNER, UNLOCK);
    for chunk in boot.as_bytes().chunks(3) {
        device.send(std::str::from_utf8(chunk).expect("ascii")).await;
    }
    client.ready().await.expect("boot should complete");

    // The empty line between banner and notice is not an event.
    assert_eq!(events.recv().await, Some(Event::Version("1.1f".to_string())));
    assert_eq!(
        events.recv().await,
        Some(Event::Message("[MSG:'$H'|'$X' to unlock]".to_string()))
    );
}

#[tokio::test]
async fn test_malformed_banner_is_fatal() {
    let (client, mut device, mut events) = setup(Catalog::default()).await;

    device.send("Grbl bogus\r\n").await;

    match client.ready().await {
        Err(ClientError::Protocol(e)) => assert_eq!(e.input, "Grbl bogus"),
        other => panic!("expected protocol error, got {:?}", other),
    }
    match client.command("$X").await {
        Err(ClientError::Protocol(e)) => assert_eq!(e.input, "Grbl bogus"),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert!(matches!(client.closed().await, ClientError::Protocol(_)));
    assert!(client.version().is_none());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_unlock_notice_not_captured_by_early_command() {
    let (client, mut device, _events) = setup(Catalog::default()).await;

    let controller = async {
        device.boot().await;
        assert_eq!(device.expect_line().await, "$X");
        device.send("[MSG:Caution: Unlocked]\r\nok\r\n").await;
    };

    // Issued before the banner arrives.
    let (response, ()) = tokio::join!(client.command("$X"), controller);
    assert_eq!(response.expect("command should succeed"), vec!["[MSG:Caution: Unlocked]".to_string()]);
}

// ============================================================================
// Command Correlation
// ============================================================================

#[tokio::test]
async fn test_command_publishes_events() {
    let (client, mut device, mut events) = booted(Catalog::default()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "G21");
        device.send("ok\r\n").await;
    };
    let (response, ()) = tokio::join!(client.metric_coordinates(), controller);
    assert!(response.expect("command should succeed").is_empty());

    assert_eq!(events.recv().await, Some(Event::Command("G21".to_string())));
    assert_eq!(events.recv().await, Some(Event::Message("ok".to_string())));
}

#[tokio::test]
async fn test_command_error_from_catalog() {
    let (client, mut device, _events) = booted(Catalog::grbl_v1_1()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "$X");
        device.send("error:9\r\n").await;
    };
    let (response, ()) = tokio::join!(client.kill_alarm_lock(), controller);

    match response {
        Err(ClientError::Command(e)) => {
            assert_eq!(e.code, "9");
            assert_eq!(e.message, "G-code lock");
            assert!(!e.description.is_empty());
        }
        other => panic!("expected command error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_command_error_unknown_code() {
    let (client, mut device, _events) = booted(Catalog::default()).await;

    let controller = async {
        device.expect_line().await;
        device.send("error:9\r\n").await;
    };
    let (response, ()) = tokio::join!(client.command("$X"), controller);

    match response {
        Err(ClientError::Command(e)) => {
            assert_eq!(e.code, "9");
            assert_eq!(e.message, "");
            assert_eq!(e.description, "");
        }
        other => panic!("expected command error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_commands_are_serialized() {
    let (client, mut device, _events) = booted(Catalog::default()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "G90");
        // B must not be written before A's terminal marker.
        device.expect_silence().await;
        device.send("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]\r\nok\r\n").await;

        assert_eq!(device.expect_line().await, "G91");
        device.send("ok\r\n").await;
    };

    let (a, b, ()) = tokio::join!(
        client.absolute_positioning(),
        client.incremental_positioning(),
        controller
    );
    assert_eq!(
        a.expect("A should succeed"),
        vec!["[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]".to_string()]
    );
    assert!(b.expect("B should succeed").is_empty());
}

#[tokio::test]
async fn test_abandoned_command_keeps_connection_busy() {
    let (client, mut device, _events) = booted(Catalog::default()).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(20), client.command("$$")).await;
    assert!(abandoned.is_err(), "settings should still be waiting for ok");
    assert_eq!(device.expect_line().await, "$$");

    let controller = async {
        // The status request must wait for the abandoned command's ok.
        device.expect_silence().await;
        device.send("$0=10\r\nok\r\n").await;

        assert_eq!(device.expect_line().await, "?");
        device.send("<Idle|MPos:0.000,0.000,0.000>\r\nok\r\n").await;
    };
    let (status, ()) = tokio::join!(client.status(), controller);
    assert_eq!(status.expect("status should decode").state, "Idle");
}

#[tokio::test]
async fn test_failed_command_releases_lock() {
    let (client, mut device, _events) = booted(Catalog::default()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "G0");
        device.send("error:22\r\n").await;
        assert_eq!(device.expect_line().await, "G20");
        device.send("ok\r\n").await;
    };

    let (a, b, ()) = tokio::join!(client.rapid_travel(), client.imperial_coordinates(), controller);
    assert!(matches!(a, Err(ClientError::Command(_))));
    assert!(b.is_ok());
}

#[tokio::test]
async fn test_unsolicited_lines_only_published() {
    let (client, mut device, mut events) = booted(Catalog::default()).await;

    device.send("[MSG:Pgm End]\r\n").await;
    assert_eq!(events.recv().await, Some(Event::Message("[MSG:Pgm End]".to_string())));

    let controller = async {
        device.expect_line().await;
        device.send("ok\r\n").await;
    };
    let (response, ()) = tokio::join!(client.run_homing_cycle(), controller);
    assert!(response.expect("homing should succeed").is_empty());
}

#[tokio::test]
async fn test_position_command_text() {
    let (client, mut device, _events) = booted(Catalog::default()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "X-100.0 Y-100.0");
        device.send("ok\r\n").await;
        assert_eq!(device.expect_line().await, "");
        device.send("ok\r\n").await;
    };

    let moves = async {
        client
            .position(Position { x: Some(-100.0), y: Some(-100.0), z: None })
            .await
            .expect("move should succeed");
        client.position(Position::default()).await.expect("empty move should succeed");
    };
    tokio::join!(moves, controller);
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_status() {
    let (client, mut device, _events) = booted(Catalog::default()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "?");
        device
            .send("<Idle|MPos:0.000,1.500,-2.000|WCO:0.000,0.000,0.000>\r\nok\r\n")
            .await;
    };
    let (status, ()) = tokio::join!(client.status(), controller);
    let status = status.expect("status should decode");

    assert_eq!(status.state, "Idle");
    assert_eq!(status.machine_position, Some(Axes { x: 0.0, y: 1.5, z: -2.0 }));
    assert_eq!(status.work_coordinate_offset, Some(Axes { x: 0.0, y: 0.0, z: 0.0 }));
}

#[tokio::test]
async fn test_settings() {
    let (client, mut device, _events) = booted(Catalog::grbl_v1_1()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "$$");
        device.send("$0=10\r\n$200=7\r\nok\r\n").await;
    };
    let (settings, ()) = tokio::join!(client.settings(), controller);
    let settings = settings.expect("settings should decode");

    assert_eq!(settings.len(), 2);
    assert_eq!(settings[0].code, "0");
    assert_eq!(settings[0].value, "10");
    assert_eq!(settings[0].name.as_deref(), Some("Step pulse time"));
    assert_eq!(settings[1].code, "200");
    assert!(settings[1].name.is_none());
}

#[tokio::test]
async fn test_settings_malformed_line() {
    let (client, mut device, _events) = booted(Catalog::grbl_v1_1()).await;

    let controller = async {
        device.expect_line().await;
        device.send("$0 10\r\nok\r\n").await;
        // The connection survives a decode failure.
        assert_eq!(device.expect_line().await, "$");
        device
            .send("[HLP:$$ $# $G $I $N $x=val $Nx=line $J=line $C $X $H ~ ! ? ctrl-x]\r\nok\r\n")
            .await;
    };
    let queries = async {
        match client.settings().await {
            Err(ClientError::Protocol(e)) => assert_eq!(e.input, "$0 10"),
            other => panic!("expected protocol error, got {:?}", other),
        }
        client.help().await
    };
    let (help, ()) = tokio::join!(queries, controller);
    assert_eq!(
        help.expect("help should decode"),
        "$$ $# $G $I $N $x=val $Nx=line $J=line $C $X $H ~ ! ? ctrl-x"
    );
}

// ============================================================================
// Connection Loss
// ============================================================================

#[tokio::test]
async fn test_shutdown_fails_pending_command() {
    let (client, mut device, _events) = booted(Catalog::default()).await;

    let controller = async {
        assert_eq!(device.expect_line().await, "$H");
        client.shutdown();
    };
    let (response, ()) = tokio::join!(client.run_homing_cycle(), controller);

    assert!(matches!(response, Err(ClientError::Closed(Disconnect::Shutdown))));
    assert!(matches!(client.command("?").await, Err(ClientError::Closed(_))));
}

#[tokio::test]
async fn test_end_of_stream_fails_pending_command() {
    let (client, device, _events) = booted(Catalog::default()).await;

    let controller = async move {
        let mut device = device;
        assert_eq!(device.expect_line().await, "?");
        device.send("<Run|MPos:1.000,2.000,3.000>\r\n").await;
        drop(device);
    };
    let (response, ()) = tokio::join!(client.status(), controller);

    assert!(matches!(response, Err(ClientError::Closed(Disconnect::Eof))));
    assert!(matches!(client.closed().await, ClientError::Closed(Disconnect::Eof)));
}

#[tokio::test]
async fn test_read_error_fails_pending_command() {
    let (chunks, chunks_rx) = mpsc::unbounded_channel();
    let (client_write, device_io) = tokio::io::duplex(1024);
    let mut device_read = BufReader::new(device_io);
    let (events_tx, _events) = mpsc::unbounded_channel::<Event>();

    let client = Client::with_publisher(
        ScriptedReader { chunks: chunks_rx },
        client_write,
        Catalog::default(),
        ClientConfig::named("test"),
        events_tx,
    )
    .await;

    chunks.send(Ok(format!("{}{}", BANNER, UNLOCK).into_bytes())).expect("reader alive");
    client.ready().await.expect("boot should complete");

    let controller = async {
        let mut line = String::new();
        device_read.read_line(&mut line).await.expect("device read");
        assert_eq!(line, "?\r\n");
        chunks
            .send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "port reset")))
            .expect("reader alive");
    };
    let (response, ()) = tokio::join!(client.status(), controller);

    match response {
        Err(ClientError::Closed(Disconnect::Io(reason))) => assert!(reason.contains("port reset")),
        other => panic!("expected transport failure, got {:?}", other),
    }
    assert!(matches!(client.closed().await, ClientError::Closed(Disconnect::Io(_))));
}

#[tokio::test]
async fn test_write_error_closes_connection() {
    let (client_read, mut device_write) = tokio::io::duplex(1024);
    let (events_tx, _events) = mpsc::unbounded_channel::<Event>();

    let client = Client::with_publisher(
        client_read,
        BrokenWriter,
        Catalog::default(),
        ClientConfig::named("test"),
        events_tx,
    )
    .await;

    device_write.write_all(BANNER.as_bytes()).await.expect("device write");
    device_write.write_all(UNLOCK.as_bytes()).await.expect("device write");
    client.ready().await.expect("boot should complete");

    match client.command("?").await {
        Err(ClientError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("expected I/O error, got {:?}", other),
    }

    // A late answer to the half-written line must not reach the next command.
    device_write.write_all(b"ok\r\n").await.expect("device write");
    match client.command("$").await {
        Err(ClientError::Closed(Disconnect::Io(reason))) => assert!(reason.contains("cable unplugged")),
        other => panic!("expected closed connection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_broadcast_subscription() {
    let (client_io, device_io) = tokio::io::duplex(1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (_device_read, mut device_write) = tokio::io::split(device_io);

    let client = Client::connect(client_read, client_write, Catalog::default(), ClientConfig::default()).await;
    let mut events = client.subscribe().expect("broadcast publisher");

    device_write.write_all(BANNER.as_bytes()).await.expect("device write");
    device_write.write_all(UNLOCK.as_bytes()).await.expect("device write");
    client.ready().await.expect("boot should complete");

    assert_eq!(events.recv().await.expect("event"), Event::Version("1.1f".to_string()));
}
