//! Encoders and parsers for every SOCKS5 message.
//!
//! Parsers look only at the slice they are given and either decode a whole
//! message, report [`Parse::NeedMore`], or fail. Calling one again with a
//! longer buffer is always safe, which is what the reassembler relies on.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::proto::*;
use crate::{Error, Result};

fn check_version(got: u8, expected: u8) -> Result<()> {
    if got != expected {
        return Err(Error::ProtocolVersion(got));
    }
    Ok(())
}

fn put_address(buf: &mut Vec<u8>, address: &Address, port: u16) {
    buf.push(address.atyp());
    match address {
        Address::Ipv4(ip) => buf.extend_from_slice(&ip.octets()),
        Address::Ipv6(ip) => buf.extend_from_slice(&ip.octets()),
        Address::Domain(host) => {
            let host = host.as_ref().as_bytes();
            buf.push(host.len() as u8);
            buf.extend_from_slice(host);
        }
    }
    buf.extend_from_slice(&port.to_be_bytes());
}

/// Parse `ATYP ADDR PORT` starting at `at`. The returned length is the
/// offset just past the port.
fn parse_address(buf: &[u8], at: usize) -> Result<Parse<(Address, u16)>> {
    let atyp = match buf.get(at) {
        Some(&atyp) => atyp,
        None => return Ok(Parse::NeedMore),
    };
    let start = at + 1;

    let (address, end) = match atyp {
        ATYP_IPV4 => {
            let end = start + 4;
            if buf.len() < end + 2 {
                return Ok(Parse::NeedMore);
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[start..end]);
            (Address::Ipv4(Ipv4Addr::from(octets)), end)
        }
        ATYP_IPV6 => {
            let end = start + 16;
            if buf.len() < end + 2 {
                return Ok(Parse::NeedMore);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[start..end]);
            (Address::Ipv6(Ipv6Addr::from(octets)), end)
        }
        ATYP_DOMAIN => {
            let len = match buf.get(start) {
                Some(&len) => len as usize,
                None => return Ok(Parse::NeedMore),
            };
            let end = start + 1 + len;
            if buf.len() < end + 2 {
                return Ok(Parse::NeedMore);
            }
            let host = std::str::from_utf8(&buf[start + 1..end])
                .map_err(|_| Error::InvalidRequest("domain name is not valid UTF-8".into()))?;
            let host = Hostname::try_from(host.to_string())?;
            (Address::Domain(host), end)
        }
        t => {
            return Err(Error::InvalidRequest(format!(
                "unrecognized address type {}",
                t
            )))
        }
    };

    let port = u16::from_be_bytes([buf[end], buf[end + 1]]);
    Ok(Parse::Done((address, port), end + 2))
}

/*
+----+----------+----------+
|VER | NMETHODS | METHODS  |
+----+----------+----------+
| 1  |    1     | 1 to 255 |
+----+----------+----------+
*/
pub fn encode_method_negotiation(auth_available: bool) -> Vec<u8> {
    if auth_available {
        vec![
            VER,
            2,
            Method::USERNAME_PASSWORD.0,
            Method::NO_AUTH.0,
        ]
    } else {
        vec![VER, 1, Method::NO_AUTH.0]
    }
}

pub fn parse_method_negotiation(buf: &[u8]) -> Result<Parse<Vec<Method>>> {
    if buf.is_empty() {
        return Ok(Parse::NeedMore);
    }
    check_version(buf[0], VER)?;
    if buf.len() < 2 {
        return Ok(Parse::NeedMore);
    }

    let len = 2 + buf[1] as usize;
    if buf.len() < len {
        return Ok(Parse::NeedMore);
    }
    let methods = buf[2..len].iter().map(|&m| Method(m)).collect();
    Ok(Parse::Done(methods, len))
}

/*
+----+--------+
|VER | METHOD |
+----+--------+
| 1  |   1    |
+----+--------+
*/
pub fn encode_method_selection(method: Method) -> Vec<u8> {
    vec![VER, method.0]
}

pub fn parse_method_selection(buf: &[u8]) -> Result<Parse<Method>> {
    if buf.is_empty() {
        return Ok(Parse::NeedMore);
    }
    check_version(buf[0], VER)?;
    if buf.len() < 2 {
        return Ok(Parse::NeedMore);
    }
    Ok(Parse::Done(Method(buf[1]), 2))
}

/*
+----+-----+-------+------+----------+----------+
|VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
+----+-----+-------+------+----------+----------+
| 1  |  1  | X'00' |  1   | Variable |    2     |
+----+-----+-------+------+----------+----------+
*/
pub fn encode_connect_request(address: &Address, port: u16) -> Vec<u8> {
    let mut buf = vec![VER, Command::CONNECT.0, 0];
    put_address(&mut buf, address, port);
    buf
}

pub fn parse_connect_request(buf: &[u8]) -> Result<Parse<ConnectRequest>> {
    if buf.is_empty() {
        return Ok(Parse::NeedMore);
    }
    check_version(buf[0], VER)?;
    if buf.len() < 4 {
        return Ok(Parse::NeedMore);
    }

    let command = Command(buf[1]);
    match parse_address(buf, 3)? {
        Parse::Done((address, port), len) => Ok(Parse::Done(
            ConnectRequest {
                command,
                address,
                port,
            },
            len,
        )),
        Parse::NeedMore => Ok(Parse::NeedMore),
    }
}

/*
+----+-----+-------+------+----------+----------+
|VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
+----+-----+-------+------+----------+----------+
| 1  |  1  | X'00' |  1   | Variable |    2     |
+----+-----+-------+------+----------+----------+
*/
pub fn encode_reply(reply: Reply, address: &Address, port: u16) -> Vec<u8> {
    let mut buf = vec![VER, reply.0, 0];
    put_address(&mut buf, address, port);
    buf
}

/// A failed reply is always `CONNECTION_NOT_ALLOWED` with a zero address.
pub fn encode_connect_reply(success: bool, address: &Address, port: u16) -> Vec<u8> {
    if success {
        encode_reply(Reply::SUCCEEDED, address, port)
    } else {
        encode_reply(Reply::CONNECTION_NOT_ALLOWED, &Address::unspecified(), 0)
    }
}

/// For a failure reply the bind address is not decoded; whatever follows
/// the header is consumed with it.
pub fn parse_connect_reply(buf: &[u8]) -> Result<Parse<ConnectReply>> {
    if buf.is_empty() {
        return Ok(Parse::NeedMore);
    }
    check_version(buf[0], VER)?;
    if buf.len() < 5 {
        return Ok(Parse::NeedMore);
    }

    let reply = Reply(buf[1]);
    if reply != Reply::SUCCEEDED {
        let len = match parse_address(buf, 3) {
            Ok(Parse::Done(_, len)) => len,
            _ => buf.len(),
        };
        return Ok(Parse::Done(ConnectReply { reply, bind: None }, len));
    }

    match parse_address(buf, 3)? {
        Parse::Done(bind, len) => Ok(Parse::Done(
            ConnectReply {
                reply,
                bind: Some(bind),
            },
            len,
        )),
        Parse::NeedMore => Ok(Parse::NeedMore),
    }
}

/*
+----+------+----------+------+----------+
|VER | ULEN |  UNAME   | PLEN |  PASSWD  |
+----+------+----------+------+----------+
| 1  |  1   | 1 to 255 |  1   | 1 to 255 |
+----+------+----------+------+----------+
*/
pub fn encode_username_password_request(username: &str, password: &str) -> Result<Vec<u8>> {
    check_credential(username)?;
    check_credential(password)?;

    let mut buf = Vec::with_capacity(3 + username.len() + password.len());
    buf.push(AUTH_VER);
    buf.push(username.len() as u8);
    buf.extend_from_slice(username.as_bytes());
    buf.push(password.len() as u8);
    buf.extend_from_slice(password.as_bytes());
    Ok(buf)
}

pub fn parse_username_password_request(buf: &[u8]) -> Result<Parse<Credentials>> {
    if buf.is_empty() {
        return Ok(Parse::NeedMore);
    }
    check_version(buf[0], AUTH_VER)?;
    if buf.len() < 2 {
        return Ok(Parse::NeedMore);
    }

    // Both fields are 1 to 255 bytes.
    let ulen = buf[1] as usize;
    if ulen == 0 {
        return Err(Error::InvalidCredentials);
    }
    let i = 2 + ulen;
    if buf.len() < i + 1 {
        return Ok(Parse::NeedMore);
    }
    let plen = buf[i] as usize;
    if plen == 0 {
        return Err(Error::InvalidCredentials);
    }
    let len = i + 1 + plen;
    if buf.len() < len {
        return Ok(Parse::NeedMore);
    }

    let credentials = Credentials {
        username: String::from_utf8_lossy(&buf[2..i]).into_owned(),
        password: String::from_utf8_lossy(&buf[i + 1..len]).into_owned(),
    };
    Ok(Parse::Done(credentials, len))
}

/*
+----+--------+
|VER | STATUS |
+----+--------+
| 1  |   1    |
+----+--------+
*/
pub fn encode_username_password_reply(success: bool) -> Vec<u8> {
    let status = if success { AUTH_SUCCESS } else { AUTH_FAILURE };
    vec![AUTH_VER, status]
}

pub fn parse_username_password_reply(buf: &[u8]) -> Result<Parse<bool>> {
    if buf.is_empty() {
        return Ok(Parse::NeedMore);
    }
    check_version(buf[0], AUTH_VER)?;
    if buf.len() < 2 {
        return Ok(Parse::NeedMore);
    }
    Ok(Parse::Done(buf[1] == AUTH_SUCCESS, 2))
}
