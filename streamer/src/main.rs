/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * The websocket file streamer.  "serve" runs inside a scheduler job on
 * the cluster: it listens on the first free port of the advertised
 * range, demands the shared secret as a bearer token, and then either
 * sends a file as binary frames or receives one, with the literal text
 * frame "EOF" marking the end of the stream.  "send" and "receive" are
 * the client ends: they scan the address/port grid from the same
 * coordinates token until a peer answers.
 */

use std::process::exit;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use getopts::Options;
#[allow(unused_imports)]
use slog::{debug, error, info, o, warn, Logger};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};

use clusteromat_common::make_log;
use clusteromat_types::transfer::StreamerCoordinates;

const CHUNK_SIZE: usize = 1024 * 1024;
const EOF_FRAME: &str = "EOF";

fn decode_coordinates(token: &str) -> Result<StreamerCoordinates> {
    let json = base64::decode_config(token, base64::URL_SAFE)
        .context("coordinates token is not base64url")?;
    serde_json::from_slice(&json)
        .context("coordinates token is not valid JSON")
}

fn usage(opts: &Options) -> ! {
    eprintln!(
        "{}",
        opts.usage(
            "usage: clusteromat-streamer \
            (serve --send|--receive | send | receive) \
            --token TOKEN --path FILE",
        ),
    );
    exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut opts = Options::new();
    opts.reqopt("t", "token", "base64url coordinates token", "TOKEN");
    opts.reqopt("p", "path", "file to send or receive into", "FILE");
    opts.optflag("s", "send", "serve: send the file to the peer");
    opts.optflag("r", "receive", "serve: receive the file from the peer");
    opts.optopt("w", "wait-timeout", "seconds to wait for a peer", "SECONDS");
    opts.optopt("l", "limit", "inbound transfer byte cap", "BYTES");

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(verb) = args.first().cloned() else {
        usage(&opts);
    };
    let p = match opts.parse(&args[1..]) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            usage(&opts);
        }
    };

    let log = make_log("clusteromat-streamer");

    let coordinates = decode_coordinates(&p.opt_str("token").unwrap())?;
    let path = p.opt_str("path").unwrap();
    let wait_timeout = p
        .opt_str("wait-timeout")
        .map(|s| s.parse::<u64>())
        .transpose()
        .context("wait-timeout must be a number of seconds")?
        .unwrap_or(60 * 60 * 24);
    let limit = p
        .opt_str("limit")
        .map(|s| s.parse::<u64>())
        .transpose()
        .context("limit must be a number of bytes")?
        .unwrap_or(5 * 1024 * 1024 * 1024);

    match verb.as_str() {
        "serve" => {
            let send = match (p.opt_present("send"), p.opt_present("receive"))
            {
                (true, false) => true,
                (false, true) => false,
                _ => usage(&opts),
            };
            serve(&log, &coordinates, &path, send, wait_timeout, limit).await
        }
        "send" => client(&log, &coordinates, &path, true).await,
        "receive" => client(&log, &coordinates, &path, false).await,
        _ => usage(&opts),
    }
}

/**
 * Bind the first free port in the advertised range.
 */
async fn bind_in_range(
    log: &Logger,
    ports: (u16, u16),
) -> Result<TcpListener> {
    for port in ports.0..ports.1 {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                info!(log, "listening"; "port" => port);
                return Ok(listener);
            }
            Err(_) => continue,
        }
    }
    bail!("no free port in range {}-{}", ports.0, ports.1);
}

async fn serve(
    log: &Logger,
    coordinates: &StreamerCoordinates,
    path: &str,
    send: bool,
    wait_timeout: u64,
    limit: u64,
) -> Result<()> {
    let listener = bind_in_range(log, coordinates.ports).await?;
    let secret = coordinates.secret.clone();

    let work = async {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .context("accepting a connection")?;
            debug!(log, "connection"; "peer" => %peer);

            let expected = format!("Bearer {}", secret);
            let auth = move |req: &Request,
                             res: Response|
                  -> std::result::Result<Response, ErrorResponse> {
                let presented = req
                    .headers()
                    .get("authorization")
                    .and_then(|h| h.to_str().ok());
                if presented == Some(expected.as_str()) {
                    Ok(res)
                } else {
                    let mut denied =
                        ErrorResponse::new(Some("not authorised".into()));
                    *denied.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(denied)
                }
            };

            let ws = match accept_hdr_async(stream, auth).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(log, "handshake rejected"; "error" => %e);
                    continue;
                }
            };

            info!(log, "peer authenticated"; "peer" => %peer);
            if send {
                send_file(log, ws, path).await?;
            } else {
                receive_file(log, ws, path, limit).await?;
            }
            return Ok(());
        }
    };

    match tokio::time::timeout(Duration::from_secs(wait_timeout), work).await
    {
        Ok(res) => res,
        Err(_) => bail!("no peer connected within {} seconds", wait_timeout),
    }
}

async fn send_file<S>(
    log: &Logger,
    mut ws: WebSocketStream<S>,
    path: &str,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {:?}", path))?;

    let mut sent = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ws.send(Message::Binary(buf[..n].to_vec())).await?;
        sent += n as u64;
    }
    ws.send(Message::Text(EOF_FRAME.to_string())).await?;
    ws.close(None).await.ok();
    info!(log, "file sent"; "bytes" => sent);
    Ok(())
}

async fn receive_file<S>(
    log: &Logger,
    mut ws: WebSocketStream<S>,
    path: &str,
    limit: u64,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {:?}", path))?;

    let mut received = 0u64;
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(t) if t == EOF_FRAME => {
                file.flush().await?;
                info!(log, "file received"; "bytes" => received);
                ws.close(None).await.ok();
                return Ok(());
            }
            Message::Binary(data) => {
                received += data.len() as u64;
                if received > limit {
                    bail!(
                        "inbound transfer exceeded the {} byte limit",
                        limit,
                    );
                }
                file.write_all(&data).await?;
            }
            Message::Text(t) => {
                file.write_all(t.as_bytes()).await?;
                received += t.len() as u64;
            }
            Message::Close(_) => break,
            _ => (),
        }
    }
    bail!("peer disconnected before the end-of-file frame");
}

/**
 * Client end: scan the address grid until some port answers with a
 * successful handshake.
 */
async fn client(
    log: &Logger,
    coordinates: &StreamerCoordinates,
    path: &str,
    send: bool,
) -> Result<()> {
    for ip in coordinates.ips.iter() {
        for port in coordinates.ports.0..coordinates.ports.1 {
            let url = format!("ws://{}:{}", ip, port);
            let Ok(mut request) = url.as_str().into_client_request() else {
                continue;
            };
            request.headers_mut().insert(
                "authorization",
                format!("Bearer {}", coordinates.secret)
                    .parse()
                    .map_err(|e| anyhow!("authorization header: {}", e))?,
            );

            let ws = match connect_async(request).await {
                Ok((ws, _res)) => ws,
                Err(_) => continue,
            };
            info!(log, "connected"; "url" => &url);

            return if send {
                send_file(log, ws, path).await
            } else {
                receive_file(log, ws, path, u64::MAX).await
            };
        }
    }
    bail!("unable to establish a connection to any advertised address");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coordinates_decoding() {
        let c = StreamerCoordinates {
            ports: (50000, 50010),
            ips: vec!["127.0.0.1".to_string()],
            secret: "sesame".to_string(),
        };
        let token = base64::encode_config(
            serde_json::to_string(&c).unwrap(),
            base64::URL_SAFE,
        );

        let back = decode_coordinates(&token).unwrap();
        assert_eq!(back.ports, (50000, 50010));
        assert_eq!(back.secret, "sesame");

        assert!(decode_coordinates("!!!not-base64!!!").is_err());
    }

    #[tokio::test]
    async fn serve_and_stream_round_trip() {
        let log = make_log("test");
        let dir = std::env::temp_dir();
        let src = dir.join(format!("streamer-src-{}", std::process::id()));
        let dst = dir.join(format!("streamer-dst-{}", std::process::id()));
        let payload = vec![7u8; 3 * 1024 * 1024 + 17];
        tokio::fs::write(&src, &payload).await.unwrap();

        let coordinates = StreamerCoordinates {
            ports: (39400, 39420),
            ips: vec!["127.0.0.1".to_string()],
            secret: "sesame".to_string(),
        };

        let server = {
            let log = log.clone();
            let coordinates = coordinates.clone();
            let src = src.clone();
            tokio::spawn(async move {
                serve(
                    &log,
                    &coordinates,
                    src.to_str().unwrap(),
                    true,
                    30,
                    u64::MAX,
                )
                .await
            })
        };

        /*
         * Give the listener a moment to bind, then scan for it.
         */
        tokio::time::sleep(Duration::from_millis(100)).await;
        client(&log, &coordinates, dst.to_str().unwrap(), false)
            .await
            .unwrap();
        server.await.unwrap().unwrap();

        let received = tokio::fs::read(&dst).await.unwrap();
        assert_eq!(received.len(), payload.len());
        assert_eq!(received, payload);

        tokio::fs::remove_file(&src).await.ok();
        tokio::fs::remove_file(&dst).await.ok();
    }
}
