use std::env;
use std::path::PathBuf;

use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{Error, ErrorKind, Result};
use crate::utils::hex_encode;

/// An authentication mechanism.
///
/// The handshake driver hex-encodes responses and hex-decodes challenges;
/// mechanisms work with the raw bytes.
pub trait Mechanism {
    /// The name of the mechanism as sent in the `AUTH` line.
    fn name(&self) -> &'static str;

    /// The initial response sent along with `AUTH`.
    fn initial_response(&self) -> Result<Vec<u8>>;

    /// Process a `DATA` challenge from the server.
    fn process_data(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// The `EXTERNAL` mechanism: authenticate by the identity the transport
/// already carries, which for unix sockets is the caller's uid.
pub struct External {
    uid: u32,
}

impl External {
    /// Construct the mechanism for the current user.
    pub fn new() -> Self {
        Self {
            uid: unsafe { libc::getuid() },
        }
    }

    /// Construct the mechanism for an explicit uid.
    pub fn with_uid(uid: u32) -> Self {
        Self { uid }
    }
}

impl Default for External {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for External {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn initial_response(&self) -> Result<Vec<u8>> {
        Ok(self.uid.to_string().into_bytes())
    }

    fn process_data(&mut self, _: &[u8]) -> Result<Vec<u8>> {
        Err(Error::new(ErrorKind::AuthError(
            "EXTERNAL expects no challenge".into(),
        )))
    }
}

/// The `DBUS_COOKIE_SHA1` mechanism.
///
/// The server challenge names a cookie in the user's keyring directory; the
/// response proves knowledge of the cookie by hashing it together with both
/// challenges.
pub struct CookieSha1 {
    user: Option<String>,
    keyring_dir: Option<PathBuf>,
}

impl CookieSha1 {
    /// Construct the mechanism for the current user, with the keyring at
    /// `$HOME/.dbus-keyrings`.
    pub fn new() -> Self {
        Self {
            user: env::var("USER").ok(),
            keyring_dir: env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".dbus-keyrings")),
        }
    }

    /// Construct the mechanism with an explicit user and keyring directory.
    pub fn with_keyring(user: impl Into<String>, keyring_dir: impl Into<PathBuf>) -> Self {
        Self {
            user: Some(user.into()),
            keyring_dir: Some(keyring_dir.into()),
        }
    }

    fn find_cookie(&self, context: &str, cookie_id: &str) -> Result<String> {
        let not_found = || Error::new(ErrorKind::CookieNotFound(context.to_owned()));

        // Keyring contexts are plain file names; refuse anything that could
        // escape the keyring directory.
        if context.is_empty() || context.contains('/') {
            return Err(not_found());
        }

        let Some(dir) = &self.keyring_dir else {
            return Err(not_found());
        };

        let contents = std::fs::read_to_string(dir.join(context)).map_err(|_| not_found())?;

        // Each keyring line is `<id> <creation-time> <cookie>`.
        for line in contents.lines() {
            let mut parts = line.split_ascii_whitespace();

            if parts.next() == Some(cookie_id) {
                let _creation_time = parts.next();

                if let Some(cookie) = parts.next() {
                    return Ok(cookie.to_owned());
                }
            }
        }

        Err(not_found())
    }
}

impl Default for CookieSha1 {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for CookieSha1 {
    fn name(&self) -> &'static str {
        "DBUS_COOKIE_SHA1"
    }

    fn initial_response(&self) -> Result<Vec<u8>> {
        match &self.user {
            Some(user) => Ok(user.clone().into_bytes()),
            None => Err(Error::new(ErrorKind::AuthError(
                "DBUS_COOKIE_SHA1 requires the USER environment variable".into(),
            ))),
        }
    }

    fn process_data(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        let challenge = std::str::from_utf8(challenge)?;

        let mut parts = challenge.split_ascii_whitespace();

        let (Some(context), Some(cookie_id), Some(server_challenge)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::new(ErrorKind::AuthError(format!(
                "malformed DBUS_COOKIE_SHA1 challenge: {challenge}"
            ))));
        };

        let cookie = self.find_cookie(context, cookie_id)?;

        // Hex keeps the client challenge free of whitespace.
        let mut random = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random);
        let client_challenge = String::from_utf8(hex_encode(&random)).expect("hex is ascii");

        let mut hasher = Sha1::new();
        hasher.update(server_challenge.as_bytes());
        hasher.update(b":");
        hasher.update(client_challenge.as_bytes());
        hasher.update(b":");
        hasher.update(cookie.as_bytes());
        let digest = hex_encode(&hasher.finalize());

        let mut response = client_challenge.into_bytes();
        response.push(b' ');
        response.extend_from_slice(&digest);
        Ok(response)
    }
}
