//! Broker frame protocol
//!
//! Carried as the payload of one `sensa_wire` frame:
//!
//! ```text
//! ┌─────────┬─────────────────┬────────────────────┬──────────────┐
//! │ op (u8) │ exchange \0     │ routing_key \0     │ body         │
//! └─────────┴─────────────────┴────────────────────┴──────────────┘
//! ```
//!
//! | op | Direction        | Body                               |
//! |----|------------------|------------------------------------|
//! | 1  | client → broker  | publish: message bytes             |
//! | 2  | client → broker  | subscribe: `\n`-separated bindings |
//! | 3  | broker → client  | deliver: message bytes             |
//! | 4  | broker → client  | ack: empty                         |
//! | 5  | broker → client  | nack: UTF-8 reason                 |

use super::Exchange;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Publish = 1,
    Subscribe = 2,
    Deliver = 3,
    Ack = 4,
    Nack = 5,
}

impl TryFrom<u8> for Op {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Op::Publish),
            2 => Ok(Op::Subscribe),
            3 => Ok(Op::Deliver),
            4 => Ok(Op::Ack),
            5 => Ok(Op::Nack),
            other => Err(Error::Broker(format!("unknown broker op {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerFrame {
    pub op: Op,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl BrokerFrame {
    pub fn publish(exchange: Exchange, routing_key: &str, body: &[u8]) -> Self {
        Self::with(Op::Publish, exchange.name(), routing_key, body.to_vec())
    }

    pub fn subscribe(exchange: Exchange, bindings: &[&str]) -> Self {
        Self::with(
            Op::Subscribe,
            exchange.name(),
            "",
            bindings.join("\n").into_bytes(),
        )
    }

    pub fn deliver(exchange: Exchange, routing_key: &str, body: &[u8]) -> Self {
        Self::with(Op::Deliver, exchange.name(), routing_key, body.to_vec())
    }

    pub fn ack() -> Self {
        Self::with(Op::Ack, "", "", Vec::new())
    }

    pub fn nack(reason: impl std::fmt::Display) -> Self {
        Self::with(Op::Nack, "", "", reason.to_string().into_bytes())
    }

    fn with(op: Op, exchange: &str, routing_key: &str, body: Vec<u8>) -> Self {
        Self {
            op,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
        }
    }

    /// Resolve the exchange name, rejecting unknown ones.
    pub fn exchange(&self) -> Result<Exchange> {
        Exchange::from_name(&self.exchange)
            .ok_or_else(|| Error::Broker(format!("unknown exchange \"{}\"", self.exchange)))
    }

    /// Bindings carried by a subscribe frame
    pub fn bindings(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.body)
            .split('\n')
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.exchange.contains('\0') || self.routing_key.contains('\0') {
            return Err(Error::Broker("names may not contain NUL".to_string()));
        }
        let mut out =
            Vec::with_capacity(3 + self.exchange.len() + self.routing_key.len() + self.body.len());
        out.push(self.op as u8);
        out.extend_from_slice(self.exchange.as_bytes());
        out.push(0);
        out.extend_from_slice(self.routing_key.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&op, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::Broker("empty broker frame".to_string()))?;
        let op = Op::try_from(op)?;
        let (exchange, rest) = split_name(rest)?;
        let (routing_key, body) = split_name(rest)?;
        Ok(Self {
            op,
            exchange,
            routing_key,
            body: body.to_vec(),
        })
    }
}

fn split_name(bytes: &[u8]) -> Result<(String, &[u8])> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::Broker("unterminated name in broker frame".to_string()))?;
    let name = std::str::from_utf8(&bytes[..end])
        .map_err(|e| Error::Broker(format!("name is not UTF-8: {}", e)))?;
    Ok((name.to_string(), &bytes[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_layout() {
        let frame = BrokerFrame::publish(Exchange::ParseResults, "pose", b"{}");
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, b"\x01parse_results\0pose\0{}".to_vec());
        assert_eq!(BrokerFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_body_may_contain_nul() {
        let frame = BrokerFrame::deliver(Exchange::RawSnapshot, "", &[0, 1, 0, 2]);
        let back = BrokerFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(back.body, vec![0, 1, 0, 2]);
        assert_eq!(back.exchange().unwrap(), Exchange::RawSnapshot);
    }

    #[test]
    fn test_subscribe_bindings() {
        let frame = BrokerFrame::subscribe(Exchange::ParseResults, &["users", "pose"]);
        let back = BrokerFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(back.op, Op::Subscribe);
        assert_eq!(back.bindings(), vec!["users", "pose"]);
        assert!(BrokerFrame::subscribe(Exchange::RawSnapshot, &[]).bindings().is_empty());
    }

    #[test]
    fn test_malformed_frames() {
        assert!(BrokerFrame::decode(&[]).is_err());
        assert!(BrokerFrame::decode(&[9, 0, 0]).is_err());
        assert!(BrokerFrame::decode(b"\x01parse_results").is_err());
        let unknown = BrokerFrame::with(Op::Publish, "logs", "", Vec::new());
        assert!(unknown.exchange().is_err());
    }
}
