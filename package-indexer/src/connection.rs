use std::{io, time::Duration};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    indexer::Indexer,
    protocol::{Command, Request, Response},
    store::PackageStore,
};

/// Longest request line accepted, terminator included.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Why a connection loop stopped without an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// The peer closed its side; any unterminated trailing bytes were dropped.
    PeerClosed,
    /// Nothing arrived within the configured idle timeout.
    IdleTimeout,
    /// A request ran past [`MAX_LINE_BYTES`]; it was answered with `ERROR`.
    LineTooLong,
}

enum Incoming {
    Line,
    Eof,
    Idle,
    TooLong,
}

/// Serves requests from `reader` until the peer goes away.
///
/// Requests are handled strictly one at a time: read a line, apply it, write
/// the response, repeat. Malformed lines get `ERROR` and the loop carries on.
/// A line longer than [`MAX_LINE_BYTES`] also gets `ERROR`, but there is no
/// telling where the next request starts, so the connection is closed.
/// Read or write failures end the loop with the error.
pub async fn handle_connection<R, W, S>(
    reader: &mut R,
    writer: &mut W,
    indexer: &Indexer<S>,
    idle_timeout: Option<Duration>,
) -> io::Result<Closed>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: PackageStore,
{
    let mut line = Vec::new();

    loop {
        match read_line(reader, &mut line, idle_timeout).await? {
            Incoming::Line => {}
            Incoming::Eof => return Ok(Closed::PeerClosed),
            Incoming::Idle => return Ok(Closed::IdleTimeout),
            Incoming::TooLong => {
                warn!(limit = MAX_LINE_BYTES, "request line too long, closing connection");
                writer.write_all(Response::Error.as_line().as_bytes()).await?;
                writer.flush().await?;
                return Ok(Closed::LineTooLong);
            }
        }

        let response = respond(indexer, &line);
        writer.write_all(response.as_line().as_bytes()).await?;
        writer.flush().await?;
    }
}

async fn read_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    idle_timeout: Option<Duration>,
) -> io::Result<Incoming>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut bounded = (&mut *reader).take(MAX_LINE_BYTES as u64 + 1);
    let read = bounded.read_until(b'\n', line);
    let bytes = match idle_timeout {
        Some(limit) => match timeout(limit, read).await {
            Ok(result) => result?,
            Err(_) => return Ok(Incoming::Idle),
        },
        None => read.await?,
    };

    if line.len() > MAX_LINE_BYTES {
        return Ok(Incoming::TooLong);
    }
    // A final line without its terminator is not a request.
    if bytes == 0 || line.last() != Some(&b'\n') {
        return Ok(Incoming::Eof);
    }
    Ok(Incoming::Line)
}

/// Produces the response for one raw request line.
pub fn respond<S: PackageStore>(indexer: &Indexer<S>, line: &[u8]) -> Response {
    let Ok(text) = std::str::from_utf8(line) else {
        debug!("request is not valid utf-8");
        return Response::Error;
    };

    match Request::parse(text) {
        Ok(request) => dispatch(indexer, &request),
        Err(err) => {
            debug!(error = %err, "malformed request");
            Response::Error
        }
    }
}

/// Applies a parsed request to the index.
pub fn dispatch<S: PackageStore>(indexer: &Indexer<S>, request: &Request) -> Response {
    let accepted = match request.command {
        Command::Index => indexer.add(
            &request.package,
            request.dependencies.iter().map(String::as_str),
        ),
        Command::Query => indexer.query(&request.package),
        Command::Remove => indexer.remove(&request.package),
    };
    let response = Response::from_outcome(accepted);
    debug!(
        command = %request.command,
        package = %request.package,
        %response,
        "request applied"
    );
    response
}
