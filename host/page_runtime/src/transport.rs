//! Request/response carriers for the render protocol.

use crate::error::TransportError;
use crate::protocol::RenderConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

pub const REQUEST_FRAME_CAP: usize = 65_536;
pub const RESPONSE_FRAME_CAP: usize = 1_048_576;

/// One protocol round trip: send the request, get the next `RenderConfig`.
#[async_trait]
pub trait ProtocolTransport: Send + Sync {
    async fn render(&self, request: &RenderConfig) -> Result<RenderConfig, TransportError>;
}

/// JSON over HTTP POST to a scenario endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Reuse a client already configured by the embedding application
    /// (auth headers, org scoping).
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ProtocolTransport for HttpTransport {
    async fn render(&self, request: &RenderConfig) -> Result<RenderConfig, TransportError> {
        debug!(
            endpoint = %self.endpoint,
            scenario = %request.scenario.scenario_key,
            "posting render request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("scenario", request.scenario.scenario_key.as_str())])
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        decode_response(&body)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResponseBody {
    Wrapped {
        success: bool,
        #[serde(default)]
        data: Option<RenderConfig>,
        #[serde(default)]
        err: Option<BackendError>,
    },
    Bare(RenderConfig),
}

#[derive(Deserialize)]
struct BackendError {
    #[serde(default)]
    msg: String,
}

/// Accepts a bare `RenderConfig` or the `{success, data, err}` envelope.
pub fn decode_response(body: &[u8]) -> Result<RenderConfig, TransportError> {
    match serde_json::from_slice::<ResponseBody>(body) {
        Ok(ResponseBody::Bare(config)) => Ok(config),
        Ok(ResponseBody::Wrapped {
            success: true,
            data: Some(config),
            ..
        }) => Ok(config),
        Ok(ResponseBody::Wrapped { success, err, .. }) => {
            let msg = err
                .map(|err| err.msg)
                .filter(|msg| !msg.is_empty())
                .unwrap_or_else(|| {
                    if success {
                        "response envelope carried no data".to_string()
                    } else {
                        "backend returned success=false".to_string()
                    }
                });
            Err(TransportError::Backend(msg))
        }
        Err(_) => {
            // Re-decode as the bare shape for a precise error message.
            serde_json::from_slice::<RenderConfig>(body).map_err(TransportError::from)
        }
    }
}

/// Length-prefixed JSON frames over a backend child process's stdio.
///
/// Each exchange runs in its own task holding the pipe lock until its reply
/// is read, so a caller that gives up never leaves a reply behind for the
/// next request.
pub struct ProcessTransport {
    io: Arc<Mutex<ProcessIo>>,
    timeout: Duration,
}

struct ProcessIo {
    // Held so the child is killed when the transport is dropped.
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ProcessTransport {
    pub fn spawn(program: &str, args: &[String], timeout: Duration) -> Result<Self, TransportError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "backend stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "backend stdout unavailable"))?;

        Ok(Self {
            io: Arc::new(Mutex::new(ProcessIo {
                _child: child,
                stdin,
                stdout,
            })),
            timeout,
        })
    }
}

#[async_trait]
impl ProtocolTransport for ProcessTransport {
    async fn render(&self, request: &RenderConfig) -> Result<RenderConfig, TransportError> {
        let payload = serde_json::to_vec(request)?;

        let io = self.io.clone();
        let exchange = tokio::spawn(async move {
            let mut io = io.lock().await;
            write_frame(&mut io.stdin, &payload, REQUEST_FRAME_CAP).await?;
            io.stdin.flush().await?;
            read_frame(&mut io.stdout, RESPONSE_FRAME_CAP).await
        });

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(io::Error::other)??;

        debug!(bytes = response.len(), "backend replied");
        decode_response(&response)
    }
}

pub async fn read_frame(
    reader: &mut (impl AsyncRead + Unpin),
    max_payload: usize,
) -> io::Result<Vec<u8>> {
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

pub async fn write_frame(
    writer: &mut (impl AsyncWrite + Unpin),
    payload: &[u8],
    max_payload: usize,
) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}
