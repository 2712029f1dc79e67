use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{debug, info, warn};

use crate::cli::ClientArgs;

/// Typed in place of a request to end the session.
const QUIT: &str = "/quit";

/// Forwards each stdin line to the server and prints the response line.
///
/// Stops at end of input, on `/quit`, on ctrl-c, or when the server hangs up.
pub async fn run(args: ClientArgs) -> Result<()> {
    let mut session = Session::connect(args.server).await?;
    let mut requests = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let next = select! {
            line = requests.next_line() => line.context("failed to read stdin")?,
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(?error, "ctrl-c handler failed");
                }
                None
            }
        };
        let Some(line) = next else { break };

        let request = line.trim_end_matches('\r');
        if request.is_empty() {
            continue;
        }
        if request.eq_ignore_ascii_case(QUIT) {
            break;
        }

        match session.request(request).await? {
            Some(response) => print_line(&mut stdout, &response).await?,
            None => {
                print_line(&mut stdout, "*** server closed the connection").await?;
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

/// One connection to an indexer, used strictly request-then-response.
struct Session {
    server: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Session {
    async fn connect(server: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("failed to connect to {server}"))?;
        info!("connected to {server}");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            server,
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends one request and waits for its response. `None` means the server
    /// closed the connection first.
    async fn request(&mut self, request: &str) -> Result<Option<String>> {
        let mut frame = String::with_capacity(request.len() + 1);
        frame.push_str(request);
        frame.push('\n');
        self.writer
            .write_all(frame.as_bytes())
            .await
            .with_context(|| format!("failed to send request to {}", self.server))?;

        let mut response = String::new();
        if self.reader.read_line(&mut response).await? == 0 {
            return Ok(None);
        }
        debug!(request, response = response.trim_end(), "exchange complete");
        Ok(Some(response.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn close(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, server = %self.server, "failed to close connection cleanly");
        }
    }
}

async fn print_line(stdout: &mut Stdout, line: &str) -> Result<()> {
    stdout.write_all(format!("{line}\n").as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
