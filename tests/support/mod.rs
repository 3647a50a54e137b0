//! A minimal HTTP/1.1 origin server for exercising the fetcher.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How the server answers.
#[derive(Clone)]
pub struct ServerOptions {
    /// The logical resource content.
    pub body: Vec<u8>,
    pub content_type: &'static str,
    /// Answer `Range` requests with 206; otherwise always 200.
    pub honor_ranges: bool,
    /// Send the body gzip-encoded with `Content-Encoding: gzip`.
    pub gzip: bool,
    /// Send this raw payload as a gzip body instead of encoding `body`.
    pub raw_gzip_payload: Option<Vec<u8>>,
    /// Answer every request with this status and an empty body.
    pub status: Option<u16>,
    /// Answer requests carrying a bounded range (`bytes=a-b`) with this
    /// status. The open range `bytes=0-` is unaffected.
    pub block_status: Option<u16>,
    /// Answer the open range `bytes=0-` with this status and an empty body.
    pub open_range_status: Option<u16>,
    /// Declare this `Content-Length` and send no body.
    pub declared_length: Option<u64>,
    /// Omit `Content-Length` and delimit the body by closing the connection.
    pub omit_length: bool,
    /// For bounded ranges, send everything from the range start to the end
    /// of the resource.
    pub overshoot_ranges: bool,
    /// For bounded ranges, send only the first half of the requested bytes.
    pub short_ranges: bool,
    /// For bounded ranges, serve (and label) the bytes one position later
    /// than requested.
    pub shifted_ranges: bool,
    /// For bounded ranges, send the headers and then hold the connection
    /// open without a body until the client goes away.
    pub stall_ranges: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            body: Vec::new(),
            content_type: "application/octet-stream",
            honor_ranges: true,
            gzip: false,
            raw_gzip_payload: None,
            status: None,
            block_status: None,
            open_range_status: None,
            declared_length: None,
            omit_length: false,
            overshoot_ranges: false,
            short_ranges: false,
            shifted_ranges: false,
            stall_ranges: false,
        }
    }
}

/// A request as seen by the server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn range(&self) -> Option<&str> {
        self.headers.get("range").map(String::as_str)
    }
}

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    abandoned: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let abandoned = Arc::new(AtomicUsize::new(0));
        let options = Arc::new(options);

        let log = requests.clone();
        let dropped = abandoned.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let options = options.clone();
                let log = log.clone();
                let dropped = dropped.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(socket, &options, &log, &dropped).await;
                });
            }
        });

        Self {
            addr,
            requests,
            abandoned,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests carrying a bounded `bytes=a-b` range, i.e. block requests.
    pub fn block_requests(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.range().map(str::to_string))
            .filter(|r| !r.ends_with('-'))
            .collect()
    }

    /// Stalled range responses whose client has closed the connection.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Deterministic, non-repeating-looking test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 9)) as u8)
        .collect()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A localhost URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/gone", addr)
}

async fn handle_connection(
    mut socket: TcpStream,
    options: &ServerOptions,
    log: &Mutex<Vec<RecordedRequest>>,
    abandoned: &AtomicUsize,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }

    let text = String::from_utf8_lossy(&head);
    let headers: HashMap<String, String> = text
        .lines()
        .skip(1)
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();
    let range = headers.get("range").cloned();
    log.lock().unwrap().push(RecordedRequest { headers });

    let bounded = range.as_deref().map(parse_range).and_then(|(_, end)| end);
    let open = range.is_some() && bounded.is_none();
    if let Some(status) = options
        .status
        .or(options.block_status.filter(|_| bounded.is_some()))
        .or(options.open_range_status.filter(|_| open))
    {
        // A 204 carries no body and no length.
        let length = if status == 204 { "" } else { "Content-Length: 0\r\n" };
        let response = format!(
            "HTTP/1.1 {} Test\r\n{}Connection: close\r\n\r\n",
            status, length
        );
        socket.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    let payload = match (&options.raw_gzip_payload, options.gzip) {
        (Some(raw), _) => raw.clone(),
        (None, true) => gzip(&options.body),
        (None, false) => options.body.clone(),
    };
    let total = payload.len() as u64;

    let mut extra = String::new();
    if options.gzip || options.raw_gzip_payload.is_some() {
        extra.push_str("Content-Encoding: gzip\r\n");
    }

    let (status, body): (&str, &[u8]) = match range.as_deref().map(parse_range) {
        Some((start, end)) if options.honor_ranges && start < total => {
            let (start, end) = match end {
                Some(end) if options.shifted_ranges && end + 1 < total => (start + 1, Some(end + 1)),
                _ => (start, end),
            };
            let requested_end = end.unwrap_or(total - 1).min(total - 1);
            let send_end = if options.overshoot_ranges {
                total - 1
            } else if options.short_ranges && end.is_some() {
                start + (requested_end - start) / 2
            } else {
                requested_end
            };
            extra.push_str(&format!(
                "Content-Range: bytes {}-{}/{}\r\n",
                start, requested_end, total
            ));
            (
                "206 Partial Content",
                &payload[start as usize..=send_end as usize],
            )
        }
        _ => ("200 OK", &payload[..]),
    };

    let length = match (options.declared_length, options.omit_length) {
        (Some(declared), _) => format!("Content-Length: {}\r\n", declared),
        (None, true) => String::new(),
        (None, false) => format!("Content-Length: {}\r\n", body.len()),
    };
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\n{}{}Connection: close\r\n\r\n",
        status, options.content_type, extra, length
    );
    socket.write_all(head.as_bytes()).await?;
    if options.stall_ranges && bounded.is_some() {
        socket.flush().await?;
        // Reads return 0 (or fail) once the client drops the connection.
        while socket.read(&mut buf).await.unwrap_or(0) > 0 {}
        abandoned.fetch_add(1, Ordering::SeqCst);
        return Ok(());
    }
    if options.declared_length.is_none() {
        socket.write_all(body).await?;
    }
    socket.flush().await?;
    let _ = socket.shutdown().await;
    Ok(())
}

/// Parses `bytes=a-` / `bytes=a-b`.
fn parse_range(value: &str) -> (u64, Option<u64>) {
    let ranges = value.trim_start_matches("bytes=");
    let (start, end) = ranges.split_once('-').unwrap_or((ranges, ""));
    (
        start.trim().parse().unwrap_or(0),
        end.trim().parse().ok(),
    )
}
