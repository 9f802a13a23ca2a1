use anyhow::{Context, Result};
use redraft_common::protocol::framing::{encode_frame, FrameDecoder, FramingError};
use redraft_common::protocol::jsonrpc::{Response, RpcError, PARSE_ERROR};
use serde_json::json;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::rpc::methods::{handle_raw_request, RpcServerState};

const READ_BUFFER_BYTES: usize = 16 * 1024;

/// Serve JSON-RPC 2.0 over a Unix domain socket until shutdown is signaled.
///
/// Framing is Content-Length headed, matching the CLI transport. Each
/// connection runs on its own task.
pub async fn serve_unix_until_shutdown(
    listener: UnixListener,
    state: RpcServerState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("rpc server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("failed to accept unix rpc connection")?;
                debug!("rpc connection accepted");
                let connection_state = state.clone();
                tokio::spawn(async move {
                    if let Err(error) = serve_connection(stream, connection_state).await {
                        warn!(?error, "unix rpc connection failed");
                    }
                });
            }
        }
    }
}

/// Handle a single RPC stream. Responses, including deferred ones, go
/// through one writer task so frames never interleave.
pub async fn serve_connection<IO>(stream: IO, state: RpcServerState) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, write_half) = io::split(stream);
    let (sink, responses) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(write_responses(write_half, responses));

    let read_result = read_requests(&mut read_half, &state, &sink).await;
    drop(sink);
    // Deferred handlers hold their own sink clones; the writer drains them.
    let write_result = writer.await.context("rpc writer task failed")?;
    read_result.and(write_result)
}

async fn read_requests<R>(
    reader: &mut R,
    state: &RpcServerState,
    sink: &mpsc::UnboundedSender<Response>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0_u8; READ_BUFFER_BYTES];

    loop {
        let bytes_read = reader.read(&mut buffer).await.context("failed to read rpc stream")?;
        if bytes_read == 0 {
            return Ok(());
        }

        let mut chunk = &buffer[..bytes_read];
        loop {
            let decoded = decoder.append_bytes(chunk);
            chunk = &[];
            match decoded {
                Ok(frames) if frames.is_empty() => break,
                Ok(frames) => {
                    for frame in frames {
                        if let Some(response) = handle_raw_request(&frame, state, sink).await {
                            let _ = sink.send(response);
                        }
                    }
                }
                Err(error) => {
                    let _ = sink.send(framing_error_response(&error));
                    if error.is_fatal() {
                        warn!(%error, "closing rpc connection on unrecoverable framing error");
                        return Ok(());
                    }
                    debug!(%error, "rejected rpc frame");
                }
            }
        }
    }
}

async fn write_responses<W>(
    mut writer: W,
    mut responses: mpsc::UnboundedReceiver<Response>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = responses.recv().await {
        let body = serde_json::to_vec(&response).context("failed to serialize json-rpc response")?;
        writer.write_all(&encode_frame(&body)).await.context("failed to write json-rpc response")?;
        writer.flush().await.context("failed to flush json-rpc response")?;
    }
    writer.shutdown().await.ok();
    Ok(())
}

fn framing_error_response(error: &FramingError) -> Response {
    Response::error(
        None,
        RpcError::new(PARSE_ERROR, "Parse error")
            .with_data(json!({ "kind": "framing", "reason": error.to_string() })),
    )
}
