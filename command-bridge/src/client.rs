//! Blocking client for the line protocol.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::debug;

use crate::cli::SendArgs;
use crate::frame::{FrameReader, encode};

pub struct Client {
    reader: FrameReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    /// Connects with `timeout` applied to the connect and to every read and write.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone().context("failed to clone client stream")?;

        Ok(Self {
            reader: FrameReader::new(stream),
            writer,
        })
    }

    /// Sends one request and waits for its reply.
    pub fn send(&mut self, request: &Value) -> Result<Value> {
        let encoded = encode(request).context("failed to encode request")?;
        self.send_raw(&encoded)?;
        self.read_reply()
    }

    /// Writes bytes as-is; callers supply their own newlines.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .context("failed to write request")?;
        self.writer.flush().context("failed to flush request")
    }

    pub fn read_reply(&mut self) -> Result<Value> {
        let frame = self
            .reader
            .read_frame()
            .context("failed to read reply")?
            .context("server closed the connection")?;
        serde_json::from_slice(&frame).context("reply is not valid JSON")
    }
}

/// `send` subcommand: prints the reply and fails when the command did.
pub fn run(args: SendArgs) -> Result<()> {
    let mut client = Client::connect(args.server, args.timeout())?;
    debug!("connected to {}", args.server);

    let reply = client.send(&args.request())?;
    println!("{reply}");

    if reply.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("{} failed: {error}", args.action);
    }
    Ok(())
}
