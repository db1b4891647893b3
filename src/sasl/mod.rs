//! The SASL handshake D-Bus performs before switching to binary frames.
//!
//! The handshake is a line-oriented ASCII exchange terminated by `\r\n`. A
//! single zero byte must have been written to the transport before the
//! first `AUTH` line; after `BEGIN` the stream carries binary D-Bus frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ErrorKind, Result};
use crate::utils::{hex_decode, hex_encode};

pub use self::mechanism::{CookieSha1, External, Mechanism};
mod mechanism;

#[cfg(test)]
mod tests;

/// An upper bound on a single handshake line.
const MAX_LINE: usize = 16 * 1024;

/// The state of the handshake after an `AUTH` line has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    /// Waiting for a challenge or a verdict.
    WaitData,
    /// The current mechanism failed a challenge; waiting for `REJECTED`.
    WaitReject,
}

/// The default mechanism stack: `EXTERNAL` first, then `DBUS_COOKIE_SHA1`.
pub fn default_mechanisms() -> Vec<Box<dyn Mechanism + Send>> {
    vec![Box::new(External::new()), Box::new(CookieSha1::new())]
}

/// Drive the authentication handshake to `BEGIN`.
///
/// Mechanisms are attempted in order; a `REJECTED` verdict moves on to the
/// next one. No bytes other than the handshake are read or written before
/// `BEGIN`.
pub(crate) async fn authenticate<S>(
    stream: &mut S,
    mechanisms: Vec<Box<dyn Mechanism + Send>>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let count = mechanisms.len();
    let mut line = Vec::new();

    for (index, mut mechanism) in mechanisms.into_iter().enumerate() {
        let last = index + 1 == count;

        let initial = hex_encode(&mechanism.initial_response()?);
        let mut auth = Vec::new();
        auth.extend_from_slice(b"AUTH ");
        auth.extend_from_slice(mechanism.name().as_bytes());
        auth.push(b' ');
        auth.extend_from_slice(&initial);
        send_line(stream, &auth).await?;

        let mut state = AuthState::WaitData;
        let mut unknown_commands = 0;

        loop {
            read_line(stream, &mut line).await?;

            let (command, rest) = split_command(&line);

            match command {
                b"OK" | b"AGREE_UNIX_FD" => {
                    send_line(stream, b"BEGIN").await?;
                    return Ok(());
                }
                b"DATA" if state == AuthState::WaitData => {
                    let Some(challenge) = hex_decode(rest) else {
                        return Err(Error::new(ErrorKind::AuthError(
                            "challenge is not valid hex".into(),
                        )));
                    };

                    match mechanism.process_data(&challenge) {
                        Ok(response) => {
                            let mut data = Vec::new();
                            data.extend_from_slice(b"DATA ");
                            data.extend_from_slice(&hex_encode(&response));
                            send_line(stream, &data).await?;
                        }
                        Err(e) => {
                            if last {
                                return Err(e);
                            }

                            send_line(stream, b"CANCEL").await?;
                            state = AuthState::WaitReject;
                        }
                    }
                }
                b"REJECTED" => {
                    if last {
                        let supported = String::from_utf8_lossy(rest).into_owned();
                        return Err(Error::new(ErrorKind::AuthRejected(supported)));
                    }

                    // Fall back to the next mechanism.
                    break;
                }
                b"ERROR" => {
                    let message = String::from_utf8_lossy(rest).into_owned();
                    return Err(Error::new(ErrorKind::AuthError(message)));
                }
                _ => {
                    // Unknown commands are reported back to the server; a
                    // server which keeps sending them ends the exchange.
                    unknown_commands += 1;

                    if unknown_commands > 4 {
                        let command = String::from_utf8_lossy(command).into_owned();
                        return Err(Error::new(ErrorKind::AuthUnknownCommand(command)));
                    }

                    send_line(stream, b"ERROR").await?;
                }
            }
        }
    }

    Err(Error::new(ErrorKind::AuthRejected(String::new())))
}

async fn send_line<S>(stream: &mut S, line: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(line).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

/// Read one `\r\n`-terminated line.
///
/// Reads a byte at a time so that nothing beyond the handshake is consumed
/// from the stream.
async fn read_line<S>(stream: &mut S, line: &mut Vec<u8>) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    line.clear();

    let mut byte = [0u8; 1];

    loop {
        stream.read_exact(&mut byte).await?;

        if byte[0] == b'\n' {
            break;
        }

        line.push(byte[0]);

        if line.len() > MAX_LINE {
            return Err(Error::new(ErrorKind::AuthError(
                "authentication line too long".into(),
            )));
        }
    }

    while line.last().is_some_and(u8::is_ascii_whitespace) {
        line.pop();
    }

    Ok(())
}

/// Split a handshake line into its command and argument. A line without an
/// argument yields an empty one.
fn split_command(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|&b| b == b' ') {
        Some(n) => (&line[..n], &line[n + 1..]),
        None => (line, b""),
    }
}
