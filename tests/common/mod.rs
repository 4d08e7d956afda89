//! Shared utilities for integration tests.

use std::future::Future;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rapla_proxy::calendar::{Calendar, Event, IcsSerializer, ResourceKey, Serializer};
use rapla_proxy::extract::{ExtractError, Extractor};
use rapla_proxy::http::AppState;

/// Calendar with a couple of events, named `name`.
#[allow(dead_code)]
pub fn sample_calendar(name: &str) -> Calendar {
    let day = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
    Calendar::new(
        name,
        vec![
            Event {
                date: day,
                start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                title: format!("Lecture {name}"),
                location: Some("Raum 101".into()),
                organizer: Some("Müller".into()),
            },
            Event {
                date: day.succ_opt().unwrap(),
                start: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
                title: "Lab".into(),
                location: None,
                organizer: None,
            },
        ],
    )
}

/// Bytes the ICS serializer produces for `calendar`.
#[allow(dead_code)]
pub fn ics_bytes(calendar: &Calendar) -> Vec<u8> {
    let mut out = Vec::new();
    calendar.serialize_to(&IcsSerializer, &mut out).unwrap();
    out
}

type ExtractFn = dyn Fn(usize, &ResourceKey) -> Result<Calendar, ExtractError> + Send + Sync;

/// Extractor that counts calls and delegates to a closure.
///
/// The closure receives the zero-based call index.
#[allow(dead_code)]
pub struct CountingExtractor {
    calls: AtomicUsize,
    completed: Arc<AtomicUsize>,
    delay: Option<Duration>,
    f: Box<ExtractFn>,
}

#[allow(dead_code)]
impl CountingExtractor {
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: Fn(usize, &ResourceKey) -> Result<Calendar, ExtractError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            completed: Arc::new(AtomicUsize::new(0)),
            delay: None,
            f: Box::new(f),
        })
    }

    pub fn slow<F>(delay: Duration, f: F) -> Arc<Self>
    where
        F: Fn(usize, &ResourceKey) -> Result<Calendar, ExtractError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            completed: Arc::new(AtomicUsize::new(0)),
            delay: Some(delay),
            f: Box::new(f),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Counter of extractions that returned (successfully or not).
    pub fn completed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.completed)
    }
}

#[async_trait]
impl Extractor for CountingExtractor {
    async fn extract(&self, key: &ResourceKey) -> Result<Calendar, ExtractError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.f)(n, key);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Serializer that counts calls and delegates to another serializer.
#[allow(dead_code)]
pub struct CountingSerializer {
    calls: AtomicUsize,
    inner: Arc<dyn Serializer>,
}

#[allow(dead_code)]
impl CountingSerializer {
    pub fn new(inner: Arc<dyn Serializer>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            inner,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Serializer for CountingSerializer {
    fn content_type(&self) -> &'static str {
        self.inner.content_type()
    }

    fn serialize(&self, calendar: &Calendar, out: &mut dyn Write) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.serialize(calendar, out)
    }
}

/// Serializer that writes a document prefix and then fails.
///
/// Records how many extractions had completed when serialization began.
#[allow(dead_code)]
pub struct FailingSerializer {
    pub extractions_done: Arc<AtomicUsize>,
    pub seen_at_start: AtomicUsize,
}

impl Serializer for FailingSerializer {
    fn content_type(&self) -> &'static str {
        "text/calendar; charset=utf-8"
    }

    fn serialize(&self, _calendar: &Calendar, out: &mut dyn Write) -> io::Result<()> {
        self.seen_at_start
            .store(self.extractions_done.load(Ordering::SeqCst), Ordering::SeqCst);
        out.write_all(b"BEGIN:VCALENDAR\r\nVERSION:2.0\r\n")?;
        out.flush()?;
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "simulated write failure"))
    }
}

/// Serializer that writes and flushes a document prefix, then panics.
#[allow(dead_code)]
pub struct PanickingSerializer;

impl Serializer for PanickingSerializer {
    fn content_type(&self) -> &'static str {
        "text/calendar; charset=utf-8"
    }

    fn serialize(&self, _calendar: &Calendar, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(b"BEGIN:VCALENDAR\r\n")?;
        out.flush()?;
        panic!("serializer bug");
    }
}

/// App state around `extractor` with the default serializers.
#[allow(dead_code)]
pub fn state_with(extractor: Arc<dyn Extractor>) -> AppState {
    AppState::new(extractor, ResourceKey::new("woo").unwrap(), Duration::from_secs(5))
}

/// Start a programmable mock upstream on an ephemeral port.
///
/// The closure receives the request line and returns status and body.
#[allow(dead_code)]
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let request_line = read_request_line(&mut socket).await;
                        let (status, body) = f(request_line).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request_line(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&head)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
