//! Peer contact records and their URI form
//!
//! A contact is serialized on the wire and in seed lists as
//! `storj://host:port/<nodeIdHex>`.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::NodeId;

/// URI scheme for peer contacts.
pub const CONTACT_SCHEME: &str = "storj";

/// Network location plus identity of a peer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Contact {
    /// Hostname or IP address.
    pub address: String,
    /// TCP port of the peer's RPC endpoint.
    pub port: u16,
    /// Identity the peer must prove on every message.
    pub node_id: NodeId,
}

impl Contact {
    pub fn new(address: impl Into<String>, port: u16, node_id: NodeId) -> Self {
        Self {
            address: address.into(),
            port,
            node_id,
        }
    }

    /// Format as `storj://host:port/<nodeIdHex>`.
    pub fn to_uri(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            CONTACT_SCHEME,
            self.address,
            self.port,
            self.node_id.to_hex()
        )
    }

    /// Parse a seed URI of the form `scheme://host:port/<nodeIdHex>`.
    pub fn from_uri(uri: &str) -> Result<Self, String> {
        let rest = uri
            .split_once("://")
            .map(|(_, rest)| rest)
            .ok_or_else(|| format!("contact uri missing scheme: {}", uri))?;
        let (authority, id_hex) = rest
            .split_once('/')
            .ok_or_else(|| format!("contact uri missing node id: {}", uri))?;
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| format!("contact uri missing port: {}", uri))?;
        if host.is_empty() {
            return Err(format!("contact uri missing host: {}", uri));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("contact uri has invalid port: {}", uri))?;
        let node_id = NodeId::from_hex(id_hex.trim_end_matches('/'))
            .map_err(|e| format!("contact uri has invalid node id: {}", e))?;
        Ok(Self::new(host, port, node_id))
    }

    /// `host:port` pair used to open a connection.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Contact({})", self.to_uri())
    }
}

impl FromStr for Contact {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uri(s)
    }
}

impl Serialize for Contact {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_uri())
    }
}

impl<'de> Deserialize<'de> for Contact {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct UriVisitor;

        impl<'de> Visitor<'de> for UriVisitor {
            type Value = Contact;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a contact uri of the form scheme://host:port/<nodeIdHex>")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Contact::from_uri(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(UriVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 20])
    }

    #[test]
    fn test_uri_round_trip() {
        let contact = Contact::new("127.0.0.1", 4000, node_id(5));
        let uri = contact.to_uri();
        assert_eq!(
            uri,
            format!("storj://127.0.0.1:4000/{}", node_id(5).to_hex())
        );
        assert_eq!(Contact::from_uri(&uri).unwrap(), contact);
    }

    #[test]
    fn test_parse_rejects_malformed_uris() {
        assert!(Contact::from_uri("127.0.0.1:4000").is_err());
        assert!(Contact::from_uri("storj://127.0.0.1:4000").is_err());
        assert!(Contact::from_uri("storj://127.0.0.1/deadbeef").is_err());
        assert!(Contact::from_uri("storj://:4000/deadbeef").is_err());
        assert!(Contact::from_uri("storj://127.0.0.1:notaport/deadbeef").is_err());
        assert!(Contact::from_uri("storj://127.0.0.1:4000/nothex").is_err());
    }

    #[test]
    fn test_serde_as_uri_string() {
        let contact = Contact::new("seed.example.com", 4001, node_id(9));
        let json = serde_json::to_string(&contact).unwrap();
        assert_eq!(json, format!("\"{}\"", contact.to_uri()));
        let back: Contact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, contact);
    }

    #[test]
    fn test_endpoint() {
        let contact = Contact::new("10.0.0.2", 9000, node_id(1));
        assert_eq!(contact.endpoint(), "10.0.0.2:9000");
    }
}
