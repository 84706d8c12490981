//! SOCKS4a tunnelling for brokers behind a proxy.
//!
//! The bus client only knows how to dial a plain TCP endpoint, so proxy
//! support is a local forwarder: a loopback listener whose connections
//! are CONNECTed through the proxy to the broker and then pumped byte for
//! byte. The client simply dials the forwarder.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use tracing::{debug, warn};

/// `host:port[:user]` proxy endpoint.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
}

impl std::str::FromStr for ProxyConfig {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.splitn(3, ':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or("proxy host missing")?
            .to_string();
        let port = parts
            .next()
            .ok_or("proxy port missing")?
            .parse::<u16>()
            .map_err(|e| format!("proxy port: {e}"))?;
        let user = parts.next().map(String::from);
        Ok(Self { host, port, user })
    }
}

/// Start the forwarder and return the loopback address the bus client
/// should dial. Accepts any number of connections over its lifetime (the
/// client reconnects, the one-shot publisher dials separately).
pub fn spawn_socks4_tunnel(
    proxy: &ProxyConfig,
    dest_host: &str,
    dest_port: u16,
) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let local = listener.local_addr()?;
    debug!("socks4 tunnel on {local} via {}:{}", proxy.host, proxy.port);

    let proxy = proxy.clone();
    let dest_host = dest_host.to_string();
    thread::spawn(move || {
        for conn in listener.incoming() {
            let downstream = match conn {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("tunnel accept failed: {err}");
                    break;
                }
            };
            let proxy = proxy.clone();
            let dest_host = dest_host.clone();
            thread::spawn(move || {
                match connect_through(&proxy, &dest_host, dest_port) {
                    Ok(upstream) => pump(downstream, upstream),
                    Err(err) => warn!("socks4 connect failed: {err}"),
                }
            });
        }
    });
    Ok(local)
}

/// The SOCKS4a CONNECT request: version 4, command 1, destination port,
/// the sentinel address 0.0.0.1, the user id, then the hostname — both
/// NUL-terminated. The proxy resolves the hostname itself.
fn socks4a_request(dest_host: &str, dest_port: u16, user: Option<&str>) -> Vec<u8> {
    let mut request = vec![4u8, 1];
    request.extend_from_slice(&dest_port.to_be_bytes());
    request.extend_from_slice(&[0, 0, 0, 1]);
    request.extend_from_slice(user.unwrap_or("").as_bytes());
    request.push(0);
    request.extend_from_slice(dest_host.as_bytes());
    request.push(0);
    request
}

fn connect_through(proxy: &ProxyConfig, dest_host: &str, dest_port: u16) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))?;
    stream.write_all(&socks4a_request(dest_host, dest_port, proxy.user.as_deref()))?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply)?;
    if reply[1] != 0x5a {
        return Err(io::Error::other(format!(
            "socks4 request rejected ({:#04x})",
            reply[1]
        )));
    }
    Ok(stream)
}

fn pump(a: TcpStream, b: TcpStream) {
    let (ar, br) = match (a.try_clone(), b.try_clone()) {
        (Ok(ar), Ok(br)) => (ar, br),
        _ => return,
    };
    let forward = thread::spawn(move || copy_all(ar, b));
    copy_all(br, a);
    let _ = forward.join();
}

fn copy_all(mut from: TcpStream, mut to: TcpStream) {
    let _ = io::copy(&mut from, &mut to);
    let _ = to.shutdown(std::net::Shutdown::Write);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_matches_socks4a() {
        let request = socks4a_request("mqtt.example", 1883, Some("peter"));
        assert_eq!(&request[..2], &[4, 1]);
        assert_eq!(&request[2..4], &1883u16.to_be_bytes());
        assert_eq!(&request[4..8], &[0, 0, 0, 1]);
        assert_eq!(&request[8..14], b"peter\0");
        assert_eq!(&request[14..], b"mqtt.example\0");
    }

    #[test]
    fn anonymous_request_has_empty_user_field() {
        let request = socks4a_request("broker", 1883, None);
        assert_eq!(request[8], 0);
        assert_eq!(&request[9..], b"broker\0");
    }

    #[test]
    fn proxy_config_parses_with_and_without_user() {
        let config: ProxyConfig = "hop:1080".parse().unwrap();
        assert_eq!(config.host, "hop");
        assert_eq!(config.port, 1080);
        assert!(config.user.is_none());

        let config: ProxyConfig = "hop:1080:peter".parse().unwrap();
        assert_eq!(config.user.as_deref(), Some("peter"));
    }

    #[test_case::test_case("hop"; "missing port")]
    #[test_case::test_case("hop:none"; "unparsable port")]
    #[test_case::test_case(":1080"; "empty host")]
    fn invalid_proxy_specs_are_rejected(raw: &str) {
        assert!(raw.parse::<ProxyConfig>().is_err());
    }
}
