//! Integration tests for envtrack-ingest.
//!
//! These tests drive a real acceptor over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use envtrack_ingest::{
    Acceptor, AcceptorBuilder, JsonFileStationRegistry, LiveSessions, StaticStationRegistry,
};

const STATION_A: &str = "5b1e4c2a-7d3f-4e8a-9c10-aa0000000001";
const STATION_B: &str = "5b1e4c2a-7d3f-4e8a-9c10-bb0000000002";

struct Server {
    addr: std::net::SocketAddr,
    live: LiveSessions,
    payloads: mpsc::UnboundedReceiver<(String, Bytes)>,
    _task: JoinHandle<envtrack_ingest::Result<()>>,
}

async fn start(configure: impl FnOnce(AcceptorBuilder) -> AcceptorBuilder) -> Server {
    let (tx, payloads) = mpsc::unbounded_channel();

    let builder = Acceptor::builder()
        .station_registry(Arc::new(StaticStationRegistry::new([STATION_A, STATION_B])))
        .on_payload(move |station_id, payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((station_id, payload));
            }
        });

    let acceptor = configure(builder).bind("127.0.0.1:0").await.unwrap();
    let addr = acceptor.local_addr().unwrap();
    let live = acceptor.live_sessions();
    let task = tokio::spawn(acceptor.run());

    Server {
        addr,
        live,
        payloads,
        _task: task,
    }
}

struct Station {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Station {
    async fn connect(server: &Server) -> Self {
        let (reader, writer) = TcpStream::connect(server.addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next reply line, `None` on EOF.
    async fn reply(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("reply timed out")
            .unwrap();
        (n > 0).then(|| line.trim_end().to_string())
    }

    async fn request(&mut self, line: &str) -> Option<String> {
        self.send(line).await;
        self.reply().await
    }

    async fn assert_closed(&mut self) {
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_to_end(&mut rest))
            .await
            .expect("close timed out")
            .unwrap();
        assert!(rest.is_empty(), "unexpected trailing bytes: {rest:?}");
    }
}

async fn next_payload(server: &mut Server) -> (String, Bytes) {
    tokio::time::timeout(Duration::from_secs(5), server.payloads.recv())
        .await
        .expect("payload timed out")
        .expect("payload channel closed")
}

async fn wait_for_live(live: &LiveSessions, count: usize) {
    for _ in 0..100 {
        if live.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} live sessions, found {:?}", live.ids());
}

async fn wait_until_idle(live: &LiveSessions) {
    wait_for_live(live, 0).await;
}

/// Full happy path: HELO, SIZE, DATA, FINI.
#[tokio::test]
async fn test_station_upload_is_delivered() {
    let mut server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    assert_eq!(station.request(&format!("HELO {STATION_A}")).await.as_deref(), Some("ACK"));
    wait_for_live(&server.live, 1).await;
    assert_eq!(station.request("SIZE 5").await.as_deref(), Some("ACK"));
    assert_eq!(station.request("DATA hello").await.as_deref(), Some("ACK"));
    assert_eq!(station.request("FINI").await.as_deref(), Some("FINI"));
    station.assert_closed().await;

    let (station_id, payload) = next_payload(&mut server).await;
    assert_eq!(station_id, STATION_A);
    assert_eq!(&payload[..], b"hel");
    assert!(server.live.is_empty());
}

/// Several SIZE/DATA pairs accumulate into one payload.
#[tokio::test]
async fn test_chunked_upload() {
    let mut server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    station.request(&format!("HELO {STATION_A}")).await;
    for chunk in ["t;21.5|", "h;40.2|", ";;"] {
        let size = format!("SIZE {}", chunk.len());
        assert_eq!(station.request(&size).await.as_deref(), Some("ACK"));
        assert_eq!(station.request(&format!("DATA {chunk}")).await.as_deref(), Some("ACK"));
    }
    assert_eq!(station.request("FINI").await.as_deref(), Some("FINI"));

    let (_, payload) = next_payload(&mut server).await;
    assert_eq!(&payload[..], b"t;21.5|h;40.2|");
}

/// Pipelined frames in one write are answered in order.
#[tokio::test]
async fn test_pipelined_frames_with_crlf() {
    let mut server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    station
        .writer
        .write_all(format!("HELO {STATION_B}\r\nSIZE 4\r\nDATA abcd\r\nFINI\r\n").as_bytes())
        .await
        .unwrap();

    assert_eq!(station.reply().await.as_deref(), Some("ACK"));
    assert_eq!(station.reply().await.as_deref(), Some("ACK"));
    assert_eq!(station.reply().await.as_deref(), Some("ACK"));
    assert_eq!(station.reply().await.as_deref(), Some("FINI"));
    station.assert_closed().await;

    let (station_id, payload) = next_payload(&mut server).await;
    assert_eq!(station_id, STATION_B);
    assert_eq!(&payload[..], b"ab");
}

/// An unregistered station gets no ACK, only FINI and close.
#[tokio::test]
async fn test_unknown_station_is_terminated() {
    let mut server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    assert_eq!(station.request("HELO not-a-station").await.as_deref(), Some("FINI"));
    station.assert_closed().await;

    wait_until_idle(&server.live).await;
    assert!(server.payloads.try_recv().is_err());
}

/// Commands before HELO terminate the connection.
#[tokio::test]
async fn test_size_before_helo_is_terminated() {
    let server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    assert_eq!(station.request("SIZE 5").await.as_deref(), Some("FINI"));
    station.assert_closed().await;
}

/// A DATA length mismatch is refused and the station may retry.
#[tokio::test]
async fn test_length_mismatch_then_retry() {
    let mut server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    station.request(&format!("HELO {STATION_A}")).await;
    assert_eq!(station.request("SIZE 5").await.as_deref(), Some("ACK"));
    assert_eq!(station.request("DATA abc").await.as_deref(), Some("NAK"));
    assert_eq!(station.request("SIZE 5").await.as_deref(), Some("ACK"));
    assert_eq!(station.request("DATA abcde").await.as_deref(), Some("ACK"));
    assert_eq!(station.request("FINI").await.as_deref(), Some("FINI"));

    let (_, payload) = next_payload(&mut server).await;
    assert_eq!(&payload[..], b"abc");
}

/// SIZE larger than the remaining buffer is refused.
#[tokio::test]
async fn test_oversized_size_is_refused() {
    let server = start(|b| b.buffer_capacity(16)).await;
    let mut station = Station::connect(&server).await;

    station.request(&format!("HELO {STATION_A}")).await;
    assert_eq!(station.request("SIZE 17").await.as_deref(), Some("NAK"));
    assert_eq!(station.request("SIZE 4096").await.as_deref(), Some("NAK"));
    assert_eq!(station.request("SIZE 16").await.as_deref(), Some("ACK"));
}

/// Unknown commands are answered with NAK.
#[tokio::test]
async fn test_unknown_command_gets_nak() {
    let server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    station.request(&format!("HELO {STATION_A}")).await;
    assert_eq!(station.request("PING").await.as_deref(), Some("NAK"));
    assert_eq!(station.request("SIZE 1").await.as_deref(), Some("ACK"));
}

/// Two stations interleaving their uploads do not interfere.
#[tokio::test]
async fn test_concurrent_stations_are_independent() {
    let mut server = start(|b| b).await;
    let mut a = Station::connect(&server).await;
    let mut b = Station::connect(&server).await;

    a.request(&format!("HELO {STATION_A}")).await;
    b.request(&format!("HELO {STATION_B}")).await;
    wait_for_live(&server.live, 2).await;

    a.request("SIZE 6").await;
    b.request("SIZE 6").await;
    a.request("DATA aaaa;;").await;
    b.request("DATA bbbb;;").await;

    assert_eq!(b.request("FINI").await.as_deref(), Some("FINI"));
    let (station_id, payload) = next_payload(&mut server).await;
    assert_eq!(station_id, STATION_B);
    assert_eq!(&payload[..], b"bbbb");
    assert_eq!(server.live.len(), 1);

    assert_eq!(a.request("FINI").await.as_deref(), Some("FINI"));
    let (station_id, payload) = next_payload(&mut server).await;
    assert_eq!(station_id, STATION_A);
    assert_eq!(&payload[..], b"aaaa");
    assert!(server.live.is_empty());
}

/// A silent connection is closed after the idle timeout.
#[tokio::test]
async fn test_idle_connection_is_closed() {
    let mut server = start(|b| b.idle_timeout(Duration::from_millis(100))).await;
    let mut station = Station::connect(&server).await;

    station.request(&format!("HELO {STATION_A}")).await;
    station.assert_closed().await;

    wait_until_idle(&server.live).await;
    assert!(server.payloads.try_recv().is_err());
}

/// A station that keeps sending but never authenticates is still dropped.
#[tokio::test]
async fn test_chatter_without_helo_is_closed() {
    let mut server = start(|b| {
        b.idle_timeout(Duration::from_secs(2))
            .auth_timeout(Duration::from_millis(200))
    })
    .await;
    let mut station = Station::connect(&server).await;
    let started = std::time::Instant::now();

    let mut naks = 0;
    loop {
        assert!(started.elapsed() < Duration::from_secs(2), "chatter was never cut off");

        if station.writer.write_all(b"PING\n").await.is_err() {
            break;
        }
        let mut line = String::new();
        match station.reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                assert_eq!(line, "NAK\n");
                naks += 1;
            }
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    assert!(naks > 0);
    wait_until_idle(&server.live).await;
    assert!(server.payloads.try_recv().is_err());
}

/// A larger buffer also raises the frame limit, so a full-size DATA line fits.
#[tokio::test]
async fn test_larger_buffer_accepts_full_data_line() {
    let mut server = start(|b| b.buffer_capacity(8192)).await;
    let mut station = Station::connect(&server).await;
    let reading = "x".repeat(5000);

    station.request(&format!("HELO {STATION_A}")).await;
    assert_eq!(station.request("SIZE 5002").await.as_deref(), Some("ACK"));
    assert_eq!(
        station.request(&format!("DATA {reading};;")).await.as_deref(),
        Some("ACK")
    );
    assert_eq!(station.request("FINI").await.as_deref(), Some("FINI"));

    let (_, payload) = next_payload(&mut server).await;
    assert_eq!(payload.len(), 5000);
}

/// Multi-byte DATA that overflows the buffer is refused, not fatal.
#[tokio::test]
async fn test_wide_characters_over_capacity_keep_connection() {
    let mut server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    station.request(&format!("HELO {STATION_A}")).await;
    assert_eq!(station.request("SIZE 1400").await.as_deref(), Some("ACK"));
    // 1400 characters, 4200 bytes
    let wide = "\u{20ac}".repeat(1400);
    assert_eq!(station.request(&format!("DATA {wide}")).await.as_deref(), Some("NAK"));

    assert_eq!(station.request("SIZE 5").await.as_deref(), Some("ACK"));
    assert_eq!(station.request("DATA hello").await.as_deref(), Some("ACK"));
    assert_eq!(station.request("FINI").await.as_deref(), Some("FINI"));

    let (_, payload) = next_payload(&mut server).await;
    assert_eq!(&payload[..], b"hel");
}

/// A peer that disconnects mid-transfer delivers nothing.
#[tokio::test]
async fn test_disconnect_before_fini_delivers_nothing() {
    let mut server = start(|b| b).await;
    let mut station = Station::connect(&server).await;

    station.request(&format!("HELO {STATION_A}")).await;
    station.request("SIZE 3").await;
    station.request("DATA abc").await;
    drop(station);

    wait_until_idle(&server.live).await;
    assert!(server.payloads.try_recv().is_err());
}

/// Connections over the limit are closed right away.
#[tokio::test]
async fn test_connection_limit() {
    let mut server = start(|b| b.max_connections(1)).await;
    let mut first = Station::connect(&server).await;
    assert_eq!(first.request(&format!("HELO {STATION_A}")).await.as_deref(), Some("ACK"));

    let mut second = Station::connect(&server).await;
    second.assert_closed().await;

    first.request("SIZE 3").await;
    first.request("DATA xyz").await;
    assert_eq!(first.request("FINI").await.as_deref(), Some("FINI"));
    next_payload(&mut server).await;

    let mut third = Station::connect(&server).await;
    assert_eq!(third.request(&format!("HELO {STATION_B}")).await.as_deref(), Some("ACK"));
}

/// Stations registered in a JSON file are authenticated.
#[tokio::test]
async fn test_file_backed_registry() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), r#"{"stations":[{"guid":"file-station","name":"Roof"}]}"#).unwrap();
    let registry = Arc::new(JsonFileStationRegistry::new(file.path()));

    let mut server = start(move |b| b.station_registry(registry)).await;
    let mut station = Station::connect(&server).await;

    assert_eq!(station.request("HELO file-station").await.as_deref(), Some("ACK"));
    station.request("SIZE 4").await;
    station.request("DATA ok;;").await;
    station.request("FINI").await;

    let (station_id, payload) = next_payload(&mut server).await;
    assert_eq!(station_id, "file-station");
    assert_eq!(&payload[..], b"ok");
}

/// Shutdown aborts live sessions.
#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let acceptor = Acceptor::builder()
        .station_registry(Arc::new(StaticStationRegistry::new([STATION_A])))
        .on_payload(|_, _| async {})
        .bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = acceptor.local_addr().unwrap();
    let live = acceptor.live_sessions();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(acceptor.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("HELO {STATION_A}\n").as_bytes())
        .await
        .unwrap();
    let mut ack = [0u8; 4];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(&ack, b"ACK\n");
    wait_for_live(&live, 1).await;

    stop_tx.send(()).unwrap();
    task.await.unwrap().unwrap();

    assert!(live.is_empty());
    let mut rest = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;
    assert!(matches!(closed, Ok(Ok(0)) | Ok(Err(_))));
}
