//! One RCON client connection: authenticate, then answer commands

use anyhow::Result;
use rcon_shared::{
    codec::{FrameDecoder, FrameEncoder, MAX_FRAGMENT_BODY},
    packet_type, Packet, AUTH_FAILED_ID,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Largest reply `flood` will produce
const MAX_FLOOD: usize = 64 * 1024;

/// Serve one connection until the peer hangs up or fails authentication
pub async fn run<S>(mut stream: S, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut encoder = FrameEncoder::new();
    let mut buf = vec![0u8; 4096];
    let mut authenticated = false;

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        while let Some(packet) = decoder.decode_next()? {
            match packet.kind {
                packet_type::SERVERDATA_AUTH => {
                    authenticated = packet.body == password.as_bytes();
                    // Source servers precede the auth response with an empty value packet
                    encoder.encode(&Packet::response(packet.id, ""))?;
                    if authenticated {
                        info!("Client authenticated");
                        encoder.encode(&Packet::auth_response(packet.id))?;
                    } else {
                        warn!("Client sent a wrong password");
                        encoder.encode(&Packet::auth_response(AUTH_FAILED_ID))?;
                    }
                }
                packet_type::SERVERDATA_EXECCOMMAND if authenticated => {
                    let command = packet.text();
                    debug!("#{} $ {}", packet.id, command);
                    for fragment in fragments(packet.id, &reply_to(&command)) {
                        encoder.encode(&fragment)?;
                    }
                }
                kind => {
                    warn!("Unexpected packet type {} (authenticated: {})", kind, authenticated);
                    return Ok(());
                }
            }
        }

        if !encoder.is_empty() {
            stream.write_all(&encoder.take()).await?;
        }
        if !authenticated && decoder.buffer_len() == 0 {
            // A rejected client gets its answer, then the connection closes
            return Ok(());
        }
    }
}

/// Canned answers
fn reply_to(command: &str) -> String {
    let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));

    match verb {
        "" => String::new(),
        "status" => "hostname: mock-backend\nplayers : 0 humans, 0 bots (16 max)".to_string(),
        "echo" => rest.to_string(),
        "flood" => {
            // flood <count> [pattern]
            let (count, pattern) = rest.split_once(' ').unwrap_or((rest, "x"));
            let pattern = if pattern.is_empty() { "x" } else { pattern };
            let count = count.trim().parse::<usize>().unwrap_or(0);
            pattern.repeat(count.min(MAX_FLOOD / pattern.len()))
        }
        _ => format!("Unknown command \"{}\"", verb),
    }
}

/// Split a reply into response packets
///
/// Every packet but the last carries exactly `MAX_FRAGMENT_BODY` bytes, even
/// when that cuts a UTF-8 sequence; a shorter body marks the end of the reply.
fn fragments(id: i32, reply: &str) -> Vec<Packet> {
    if reply.is_empty() {
        return vec![Packet::response(id, "")];
    }

    reply
        .as_bytes()
        .chunks(MAX_FRAGMENT_BODY)
        .map(|chunk| Packet::response(id, chunk))
        .collect()
}
