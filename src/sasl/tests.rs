use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::utils::{hex_decode, hex_encode};

use super::mechanism::{CookieSha1, External, Mechanism};
use super::authenticate;

#[test]
fn test_external_initial_response() {
    let external = External::with_uid(1000);
    let response = external.initial_response().unwrap();
    assert_eq!(hex_encode(&response), b"31303030");
}

#[test]
fn test_external_rejects_challenge() {
    let mut external = External::with_uid(1000);
    assert!(external.process_data(b"challenge").is_err());
}

#[test]
fn test_cookie_sha1_response() {
    use sha1::{Digest, Sha1};

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("org_freedesktop_general"),
        "12 1719400000 c0ffee\n34 1719400000 decade\n",
    )
    .unwrap();

    let mut mechanism = CookieSha1::with_keyring("tester", dir.path());
    assert_eq!(mechanism.initial_response().unwrap(), b"tester");

    let response = mechanism
        .process_data(b"org_freedesktop_general 34 abcdef")
        .unwrap();

    let response = String::from_utf8(response).unwrap();
    let (client_challenge, digest) = response.split_once(' ').unwrap();

    assert!(!client_challenge.contains(char::is_whitespace));

    let mut hasher = Sha1::new();
    hasher.update(format!("abcdef:{client_challenge}:decade"));
    assert_eq!(digest.as_bytes(), &hex_encode(&hasher.finalize())[..]);
}

#[test]
fn test_cookie_sha1_missing_cookie() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ctx"), "12 0 c0ffee\n").unwrap();

    let mut mechanism = CookieSha1::with_keyring("tester", dir.path());
    assert!(mechanism.process_data(b"ctx 99 abcdef").is_err());
    assert!(mechanism.process_data(b"missing 12 abcdef").is_err());
    assert!(mechanism.process_data(b"../etc 12 abcdef").is_err());
}

async fn read_handshake_line<S>(reader: &mut BufReader<S>) -> String
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line.trim_end().to_owned()
}

#[tokio::test]
async fn test_authenticate_external_ok() {
    let (mut client, server) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let mut server = BufReader::new(server);

        let auth = read_handshake_line(&mut server).await;
        assert_eq!(auth, "AUTH EXTERNAL 31303030");

        server
            .get_mut()
            .write_all(b"OK c0ffee0123456789\r\n")
            .await
            .unwrap();

        let begin = read_handshake_line(&mut server).await;
        assert_eq!(begin, "BEGIN");
    });

    authenticate(&mut client, vec![Box::new(External::with_uid(1000))])
        .await
        .unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn test_authenticate_rejected() {
    let (mut client, server) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let mut server = BufReader::new(server);
        let _ = read_handshake_line(&mut server).await;

        server
            .get_mut()
            .write_all(b"REJECTED KERBEROS_V4\r\n")
            .await
            .unwrap();
    });

    let err = authenticate(&mut client, vec![Box::new(External::with_uid(1000))])
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Authentication rejected, server supports: KERBEROS_V4"
    );

    server.await.unwrap();
}

#[tokio::test]
async fn test_authenticate_falls_back_on_rejection() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ctx"), "12 0 c0ffee\n").unwrap();

    let (mut client, server) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        use sha1::{Digest, Sha1};

        let mut server = BufReader::new(server);

        let auth = read_handshake_line(&mut server).await;
        assert_eq!(auth, "AUTH EXTERNAL 31303030");

        server
            .get_mut()
            .write_all(b"REJECTED DBUS_COOKIE_SHA1\r\n")
            .await
            .unwrap();

        let auth = read_handshake_line(&mut server).await;
        let initial = auth.strip_prefix("AUTH DBUS_COOKIE_SHA1 ").unwrap();
        assert_eq!(
            hex_decode(initial.as_bytes()).unwrap(),
            b"tester".to_vec()
        );

        let challenge = hex_encode(b"ctx 12 f00d");
        let mut line = b"DATA ".to_vec();
        line.extend_from_slice(&challenge);
        line.extend_from_slice(b"\r\n");
        server.get_mut().write_all(&line).await.unwrap();

        let data = read_handshake_line(&mut server).await;
        let payload = data.strip_prefix("DATA ").unwrap();
        let payload = hex_decode(payload.as_bytes()).unwrap();
        let payload = String::from_utf8(payload).unwrap();
        let (client_challenge, digest) = payload.split_once(' ').unwrap();

        let mut hasher = Sha1::new();
        hasher.update(format!("f00d:{client_challenge}:c0ffee"));
        assert_eq!(digest.as_bytes(), &hex_encode(&hasher.finalize())[..]);

        server.get_mut().write_all(b"OK c0ffee\r\n").await.unwrap();

        let begin = read_handshake_line(&mut server).await;
        assert_eq!(begin, "BEGIN");
    });

    authenticate(
        &mut client,
        vec![
            Box::new(External::with_uid(1000)),
            Box::new(CookieSha1::with_keyring("tester", dir.path())),
        ],
    )
    .await
    .unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn test_authenticate_server_error() {
    let (mut client, server) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let mut server = BufReader::new(server);
        let _ = read_handshake_line(&mut server).await;

        server
            .get_mut()
            .write_all(b"ERROR not today\r\n")
            .await
            .unwrap();
    });

    let err = authenticate(&mut client, vec![Box::new(External::with_uid(1000))])
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Authentication error: not today");
    server.await.unwrap();
}
