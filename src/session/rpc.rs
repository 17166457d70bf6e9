//! JSON-RPC over the standard I/O of the Copilot CLI.
//!
//! Messages are framed with a `Content-Length` header, the same way the language server protocol frames
//! them. Requests are sent one at a time; anything the peer sends that is not the awaited response is
//! skipped.

use std::{process::Stdio, time::Duration};

use futures::{SinkExt as _, StreamExt as _, future::BoxFuture};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tokio_util::{
    bytes::{Buf as _, BufMut as _, BytesMut},
    codec::{Decoder, Encoder, FramedRead, FramedWrite},
};
use tracing::{debug, info, trace, warn};

use crate::{
    env::{COPILOT_CLI_PATH, REQUEST_TIMEOUT, TOKEN_VARIABLES},
    error::{Error, Result},
    session::{SessionBackend, SessionMetadata, SessionRpc},
};

const HEADER_END: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// The largest message body accepted from the peer.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Frames JSON values with a `Content-Length` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentLengthCodec;

impl Decoder for ContentLengthCodec {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        let Some(header_len) = src
            .windows(HEADER_END.len())
            .position(|window| window == HEADER_END)
        else {
            return Ok(None);
        };

        let headers = std::str::from_utf8(&src[..header_len])
            .map_err(|e| Error::Rpc(format!("malformed frame header: {e}")))?;
        let content_len = headers
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(CONTENT_LENGTH))
            .ok_or_else(|| Error::Rpc(String::from("frame without Content-Length")))?
            .1
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::Rpc(format!("malformed Content-Length: {e}")))?;
        if content_len > MAX_FRAME_LEN {
            return Err(Error::Rpc(format!(
                "frame of {content_len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
            )));
        }

        let body_start = header_len + HEADER_END.len();
        let frame_len = body_start + content_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(body_start);
        let body = src.split_to(content_len);
        Ok(Some(serde_json::from_slice(&body)?))
    }
}

impl Encoder<Value> for ContentLengthCodec {
    type Error = Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(&item)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// A JSON-RPC connection over a reader and a writer.
#[derive(Debug)]
pub struct RpcConnection<R, W> {
    reader: FramedRead<R, ContentLengthCodec>,
    writer: FramedWrite<W, ContentLengthCodec>,
    next_id: u64,
    timeout: Duration,
}

impl<R, W> RpcConnection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a connection whose requests each time out after `timeout`.
    pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
        Self {
            reader: FramedRead::new(reader, ContentLengthCodec),
            writer: FramedWrite::new(writer, ContentLengthCodec),
            next_id: 0,
            timeout,
        }
    }

    /// Sends a request and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the peer answers with an error, closes the connection or does not answer
    /// in time.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;

        trace!("sending {method} (#{id})");
        self.writer
            .send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await?;

        tokio::time::timeout(self.timeout, self.response(id))
            .await
            .map_err(|_| Error::Rpc(format!("{method} timed out after {:?}", self.timeout)))?
            .map_err(|err| match err {
                Error::Rpc(message) => Error::Rpc(format!("{method}: {message}")),
                err => err,
            })
    }

    async fn response(&mut self, id: u64) -> Result<Value> {
        while let Some(frame) = self.reader.next().await {
            let mut frame = frame?;
            if frame.get("method").is_some() || frame.get("id").and_then(Value::as_u64) != Some(id) {
                trace!("skipping unrelated frame");
                continue;
            }

            if let Some(error) = frame.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| error.to_string(), str::to_owned);
                return Err(Error::Rpc(message));
            }
            return Ok(frame.get_mut("result").map(Value::take).unwrap_or_default());
        }

        Err(Error::Rpc(String::from("connection closed")))
    }
}

/// Reads the session list from a `session.list` result, either a bare array or `{"sessions": [...]}`.
pub fn session_list(result: Value) -> Vec<SessionMetadata> {
    let sessions = match result {
        Value::Array(sessions) => sessions,
        Value::Object(mut fields) => match fields.remove("sessions") {
            Some(Value::Array(sessions)) => sessions,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    sessions
        .into_iter()
        .filter_map(|session| match session {
            Value::Object(fields) => Some(fields),
            _ => None,
        })
        .collect()
}

impl<R, W> SessionRpc for RpcConnection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn list_sessions(&mut self) -> BoxFuture<'_, Result<Vec<SessionMetadata>>> {
        Box::pin(async move { Ok(session_list(self.request("session.list", json!({})).await?)) })
    }

    fn session_events<'a>(&'a mut self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            let params = json!({ "sessionId": session_id });
            self.request("session.resume", params.clone()).await?;
            let mut result = self.request("session.getMessages", params).await?;

            Ok(match result.get_mut("events").map(Value::take) {
                Some(Value::Array(events)) => events,
                _ => Vec::new(),
            })
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.writer.close().await })
    }
}

/// A Copilot CLI server process and the connection to it.
#[derive(Debug)]
pub struct CopilotProcess {
    child: Child,
    connection: RpcConnection<ChildStdout, ChildStdin>,
}

impl SessionRpc for CopilotProcess {
    fn list_sessions(&mut self) -> BoxFuture<'_, Result<Vec<SessionMetadata>>> {
        self.connection.list_sessions()
    }

    fn session_events<'a>(&'a mut self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<Value>>> {
        self.connection.session_events(session_id)
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Err(err) = self.connection.stop().await {
                debug!("failed to close the Copilot CLI input: {err}");
            }
            self.child.kill().await?;
            info!("stopped the Copilot CLI");
            Ok(())
        })
    }
}

/// Spawns the Copilot CLI in server mode for every connection.
#[derive(Debug, Clone)]
pub struct CopilotCli {
    program: String,
    timeout: Duration,
}

impl Default for CopilotCli {
    fn default() -> Self {
        Self::new(COPILOT_CLI_PATH.as_str(), *REQUEST_TIMEOUT)
    }
}

impl CopilotCli {
    /// The environment variable the token is handed over in.
    pub const TOKEN_VARIABLE: &'static str = "COPILOT_SDK_AUTH_TOKEN";

    /// Creates a backend that runs `program` with a per-request `timeout`.
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_owned(),
            timeout,
        }
    }

    /// Builds the server-mode command.
    ///
    /// With a token, the CLI authenticates with that token only: the token variables inherited from this
    /// process are removed and the stored login is disabled. Without one, the CLI uses its own login.
    fn command(&self, token: Option<&str>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["--server", "--stdio"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match token {
            Some(token) => {
                for variable in TOKEN_VARIABLES {
                    command.env_remove(variable);
                }
                command
                    .args(["--auth-token-env", Self::TOKEN_VARIABLE, "--no-auto-login"])
                    .env(Self::TOKEN_VARIABLE, token);
            }
            None => warn!("no token provided, falling back to the local Copilot CLI login"),
        }
        command
    }

    fn spawn(&self, token: Option<&str>) -> Result<CopilotProcess> {
        let mut child = self.command(token).spawn()?;
        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            return Err(Error::Rpc(String::from("Copilot CLI has no standard I/O")));
        };

        info!("started {} in server mode", self.program);
        Ok(CopilotProcess {
            child,
            connection: RpcConnection::new(stdout, stdin, self.timeout),
        })
    }
}

impl SessionBackend for CopilotCli {
    fn connect<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, Result<Box<dyn SessionRpc>>> {
        Box::pin(async move { Ok(Box::new(self.spawn(token)?) as Box<dyn SessionRpc>) })
    }
}
