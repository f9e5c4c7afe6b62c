//! Station demo - uploads one reading to a running ingestion server.
//!
//! This example demonstrates:
//! - The HELO / SIZE / DATA / FINI conversation from the station side
//! - Splitting a payload into several SIZE/DATA chunks
//!
//! # Running
//!
//! ```text
//! cargo run -- --station demo-station
//! cargo run --example station -- --guid demo-station "t;21.5|h;40.2|"
//! ```

use std::error::Error;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Marker the server strips from the end of every upload.
const TRAILER: &str = ";;";

#[derive(Parser, Debug)]
#[command(about = "Upload a reading to an EnvTrack ingestion server")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:8787")]
    server: String,

    /// Station GUID to identify with
    #[arg(long)]
    guid: String,

    /// Maximum characters per DATA frame
    #[arg(long, default_value_t = 64)]
    chunk: usize,

    /// Reading to upload
    reading: String,
}

struct Connection {
    replies: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn connect(addr: &str) -> Result<Self, Box<dyn Error>> {
        let (reader, writer) = TcpStream::connect(addr).await?.into_split();
        Ok(Self {
            replies: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Send one command and wait for its reply line.
    async fn exchange(&mut self, line: String) -> Result<String, Box<dyn Error>> {
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;
        let reply = self.replies.next_line().await?.unwrap_or_default();
        println!("> {line}\n< {reply}");
        Ok(reply)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut conn = Connection::connect(&args.server).await?;

    if conn.exchange(format!("HELO {}", args.guid)).await? != "ACK" {
        return Err("station was not accepted".into());
    }

    let upload: Vec<char> = format!("{}{}", args.reading, TRAILER).chars().collect();
    for chunk in upload.chunks(args.chunk.max(1)) {
        let text: String = chunk.iter().collect();

        if conn.exchange(format!("SIZE {}", chunk.len())).await? != "ACK" {
            return Err("server refused SIZE".into());
        }
        if conn.exchange(format!("DATA {text}")).await? != "ACK" {
            return Err("server refused DATA".into());
        }
    }

    conn.exchange("FINI".to_string()).await?;
    Ok(())
}
