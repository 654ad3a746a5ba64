use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::error::ReplicaError;
use crate::http;
use crate::nanopub::{ArtifactCode, RecordDocument};

pub const STATUS_HEADER: &str = "Nanopub-Registry-Status";
pub const LOAD_COUNTER_HEADER: &str = "Nanopub-Registry-Load-Counter";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryMetadata {
    pub status: String,
    pub load_counter: i64,
}

impl RegistryMetadata {
    /// Only a ready or updating registry reports a usable counter.
    pub fn is_serving(&self) -> bool {
        matches!(self.status.as_str(), "ready" | "updating")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Record {
        counter: i64,
        document: RecordDocument,
    },
    Failed {
        counter: i64,
        message: String,
    },
}

impl StreamFrame {
    pub fn counter(&self) -> i64 {
        match self {
            StreamFrame::Record { counter, .. } | StreamFrame::Failed { counter, .. } => *counter,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    counter: i64,
    #[serde(default)]
    nanopub: Option<RecordDocument>,
    #[serde(default)]
    error: Option<String>,
}

impl WireFrame {
    fn into_frame(self) -> StreamFrame {
        match (self.nanopub, self.error) {
            (Some(document), None) => StreamFrame::Record {
                counter: self.counter,
                document,
            },
            (_, Some(message)) => StreamFrame::Failed {
                counter: self.counter,
                message,
            },
            (None, None) => StreamFrame::Failed {
                counter: self.counter,
                message: "frame carries neither record nor error".to_string(),
            },
        }
    }
}

pub type FrameStream = Box<dyn Iterator<Item = Result<StreamFrame, ReplicaError>> + Send>;

pub trait RegistryClient: Send + Sync {
    fn fetch_metadata(&self) -> Result<RegistryMetadata, ReplicaError>;

    /// Frames positioned strictly after `after_counter`, in counter order.
    fn open_stream(&self, after_counter: i64) -> Result<FrameStream, ReplicaError>;

    fn fetch_record(&self, uri: &str) -> Result<RecordDocument, ReplicaError>;
}

impl<T: RegistryClient + ?Sized> RegistryClient for Arc<T> {
    fn fetch_metadata(&self) -> Result<RegistryMetadata, ReplicaError> {
        (**self).fetch_metadata()
    }

    fn open_stream(&self, after_counter: i64) -> Result<FrameStream, ReplicaError> {
        (**self).open_stream(after_counter)
    }

    fn fetch_record(&self, uri: &str) -> Result<RecordDocument, ReplicaError> {
        (**self).fetch_record(uri)
    }
}

#[derive(Clone)]
pub struct RegistryHttpClient {
    client: Client,
    base_url: String,
}

impl RegistryHttpClient {
    pub fn new(base_url: &str) -> Result<Self, ReplicaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("np-replica/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ReplicaError::RegistryHttp(err.to_string()))?,
        );
        // Streams stay open for as long as the registry has records to send.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| ReplicaError::RegistryHttp(err.to_string()))?;
        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send_with_retries<F>(&self, make_req: F) -> Result<Response, ReplicaError>
    where
        F: FnMut() -> RequestBuilder,
    {
        http::send_with_retries(make_req, ReplicaError::RegistryHttp)
    }
}

impl RegistryClient for RegistryHttpClient {
    fn fetch_metadata(&self) -> Result<RegistryMetadata, ReplicaError> {
        let response = self.send_with_retries(|| {
            self.client
                .head(&self.base_url)
                .timeout(REQUEST_TIMEOUT)
        })?;
        let response = handle_status(response)?;
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim().to_string())
        };
        let status = header(STATUS_HEADER)
            .ok_or_else(|| ReplicaError::RegistryHeader(STATUS_HEADER.to_string()))?;
        let load_counter = header(LOAD_COUNTER_HEADER)
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| ReplicaError::RegistryHeader(LOAD_COUNTER_HEADER.to_string()))?;
        Ok(RegistryMetadata {
            status,
            load_counter,
        })
    }

    fn open_stream(&self, after_counter: i64) -> Result<FrameStream, ReplicaError> {
        let url = format!("{}stream", self.base_url);
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .query(&[("afterCounter", after_counter)])
                .header(ACCEPT, "application/x-ndjson")
        })?;
        let response = handle_status(response)?;
        Ok(decode_frames(response))
    }

    fn fetch_record(&self, uri: &str) -> Result<RecordDocument, ReplicaError> {
        let code = ArtifactCode::from_uri(uri)
            .ok_or_else(|| ReplicaError::InvalidArtifactCode(uri.to_string()))?;
        let url = format!("{}np/{}", self.base_url, code);
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .header(ACCEPT, "application/json")
                .timeout(REQUEST_TIMEOUT)
        })?;
        handle_status(response)?
            .json::<RecordDocument>()
            .map_err(|err| ReplicaError::RegistryHttp(err.to_string()))
    }
}

/// Newline-delimited JSON frames read lazily from `reader`.
pub fn decode_frames<R>(reader: R) -> FrameStream
where
    R: std::io::Read + Send + 'static,
{
    let frames = serde_json::Deserializer::from_reader(reader).into_iter::<WireFrame>();
    Box::new(frames.map(|frame| match frame {
        Ok(frame) => Ok(frame.into_frame()),
        Err(err) if err.is_io() || err.is_eof() => Err(ReplicaError::StreamIo(err.to_string())),
        Err(err) => Err(ReplicaError::MalformedRecord(err.to_string())),
    }))
}

fn handle_status(response: Response) -> Result<Response, ReplicaError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "registry request failed".to_string());
    Err(ReplicaError::RegistryStatus { status, message })
}
