// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of confab.
//
// confab is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// confab is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with confab.  If not,
// see <http://www.gnu.org/licenses/>.

//! Peer addresses
//!
//! A confab peer is addressed by `scheme://host:port`. I could just pass these around as
//! [String]s (or as [Url]s, which are too broad-- paths, queries, userinfo & "opaque" forms are
//! all meaningless here), but the roster is a *set*, and set membership under string equality is
//! only sound if every element is fully canonical. [PeerAddr] is therefore a refined type: the
//! scheme is an enum, the host is validated, and the port is always explicit. Defaults (scheme
//! `http`, port 1975) are applied once, at the parse boundary, so that `example.com`,
//! `http://example.com` & `http://example.com:1975` all land on the same element.
//!
//! [Url]: url::Url

use std::{
    fmt::Display,
    net::{Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {text} as a host: {source}"))]
    HostParse {
        text: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },
    #[snafu(display("{text} has no closing ']'"))]
    OpenBracket { text: String, backtrace: Backtrace },
    #[snafu(display("{text} can't be interpreted as a port"))]
    Port { text: String, backtrace: Backtrace },
    #[snafu(display("{text} can't be interpreted as a protocol"))]
    Protocol { text: String, backtrace: Backtrace },
    #[snafu(display("{text} can't be interpreted as a reg-name"))]
    RegName { text: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

pub type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            protocol                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Protocol {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "https")]
    Https,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Protocol::Http => "http",
                Protocol::Https => "https",
            }
        )
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        let t = s.to_lowercase();
        if &t == "http" {
            Ok(Protocol::Http)
        } else if &t == "https" {
            Ok(Protocol::Https)
        } else {
            ProtocolSnafu { text: s.to_owned() }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              host                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref REG_NAME: Regex = Regex::new("^([-._~a-zA-Z0-9!$&'()*+,;=]|%[0-9a-fA-F]{2})+$").unwrap(/* known good */);
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RegName(String);

impl RegName {
    pub fn new(s: &str) -> Result<RegName> {
        if REG_NAME.find(s).is_none() {
            RegNameSnafu { text: s.to_owned() }.fail()
        } else {
            Ok(RegName(s.to_owned()))
        }
    }
}

impl Display for RegName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated host: an IP literal or an [RFC-3986] reg-name. `IpvFuture` is not supported.
///
/// [RFC-3986]: https://www.rfc-editor.org/rfc/rfc3986
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Host {
    IpLiteral(Ipv6Addr),
    Ipv4Address(Ipv4Addr),
    RegName(RegName),
}

impl Host {
    pub fn new(s: &str) -> Result<Host> {
        match url::Host::parse(s).context(HostParseSnafu { text: s.to_owned() })? {
            url::Host::Domain(s) => Ok(Host::RegName(RegName::new(&s)?)),
            url::Host::Ipv4(ipv4_addr) => Ok(Host::Ipv4Address(ipv4_addr)),
            url::Host::Ipv6(ipv6_addr) => Ok(Host::IpLiteral(ipv6_addr)),
        }
    }
}

impl Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Host::IpLiteral(ipv6) => write!(f, "{}", ipv6),
            Host::Ipv4Address(ipv4) => write!(f, "{}", ipv4),
            Host::RegName(reg_name) => write!(f, "{}", reg_name),
        }
    }
}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Host::new(s)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            PeerAddr                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A canonical peer address: explicit scheme, validated host, explicit port.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PeerAddr {
    scheme: Protocol,
    host: Host,
    port: u16,
}

impl PeerAddr {
    /// The port a confab node listens on when told nothing else.
    pub const DEFAULT_PORT: u16 = 1975;

    pub fn new(scheme: Protocol, host: Host, port: u16) -> PeerAddr {
        PeerAddr { scheme, host, port }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse `text`, applying defaults for whatever it omits: a missing scheme becomes `http`, a
    /// missing port becomes `default_port`. This is the one place defaults are applied; every
    /// [PeerAddr] in the process is fully explicit.
    ///
    /// IPv6 hosts must be bracketed (`[::1]:1975`), as in a URL.
    pub fn canonical(text: &str, default_port: u16) -> Result<PeerAddr> {
        let (scheme, rest) = match text.split_once("://") {
            Some((scheme, rest)) => (scheme.parse::<Protocol>()?, rest),
            None => (Protocol::Http, text),
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let (host_text, port) = if rest.starts_with('[') {
            let close = rest.find(']').context(OpenBracketSnafu {
                text: text.to_owned(),
            })?;
            let tail = &rest[close + 1..];
            let port = match tail.strip_prefix(':') {
                Some(digits) => digits.parse::<u16>().ok().context(PortSnafu {
                    text: text.to_owned(),
                })?,
                None if tail.is_empty() => default_port,
                None => {
                    return PortSnafu {
                        text: text.to_owned(),
                    }
                    .fail()
                }
            };
            (&rest[..=close], port)
        } else {
            match rest.rsplit_once(':') {
                Some((host_text, digits)) => (
                    host_text,
                    digits.parse::<u16>().ok().context(PortSnafu {
                        text: text.to_owned(),
                    })?,
                ),
                None => (rest, default_port),
            }
        };
        Ok(PeerAddr {
            scheme,
            host: Host::new(host_text)?,
            port,
        })
    }

    /// Base URL for requests to this peer (no trailing slash).
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host {
            Host::IpLiteral(ipv6) => write!(f, "{}://[{}]:{}", self.scheme, ipv6, self.port),
            host => write!(f, "{}://{}:{}", self.scheme, host, self.port),
        }
    }
}

impl FromStr for PeerAddr {
    type Err = Error;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        PeerAddr::canonical(s, PeerAddr::DEFAULT_PORT)
    }
}

impl Serialize for PeerAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> StdResult<PeerAddr, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse::<PeerAddr>().map_err(serde::de::Error::custom)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Announce                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The body with which a peer announces itself (on `/ping` & `/fork`): host & port, scheme
/// implied `http`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Announce {
    pub ip: String,
    pub port: u16,
}

impl Announce {
    pub fn to_peer(&self) -> Result<PeerAddr> {
        Ok(PeerAddr {
            scheme: Protocol::Http,
            host: Host::new(&self.ip)?,
            port: self.port,
        })
    }
}

impl From<&PeerAddr> for Announce {
    fn from(addr: &PeerAddr) -> Announce {
        Announce {
            ip: match addr.host() {
                Host::IpLiteral(ipv6) => format!("[{}]", ipv6),
                host => host.to_string(),
            },
            port: addr.port(),
        }
    }
}
