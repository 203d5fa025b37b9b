// Copyright (c) 2024 Botho Foundation

//! Reply grammar.
//!
//! A bridge reply is a line of whitespace-separated tokens: a topic, a kind,
//! and `KEY=VALUE` pairs. Values may be double-quoted to carry spaces, as in
//! `MESSAGE="tunnel build failed"`.
//!
//! ```text
//! SESSION STATUS RESULT=OK DESTINATION=...
//! STREAM STATUS RESULT=CANT_REACH_PEER MESSAGE="..."
//! NAMING REPLY RESULT=OK NAME=example.i2p VALUE=...
//! ```

use std::borrow::Cow;

use crate::error::ProtocolError;

/// A tokenized bridge reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    raw: String,
    topic: String,
    kind: String,
    pairs: Vec<(String, String)>,
}

impl Reply {
    /// Tokenize a raw reply. Never fails; malformed input simply yields a
    /// reply that classifies as unparsed.
    pub fn parse(raw: &str) -> Self {
        let mut words = tokenize(raw).into_iter();
        let topic = words.next().unwrap_or_default();
        let kind = words.next().unwrap_or_default();
        let pairs = words
            .map(|word| match word.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (word, String::new()),
            })
            .collect();

        Self {
            raw: raw.to_string(),
            topic,
            kind,
            pairs,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Value of the first `key=` pair.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `RESULT=` value.
    pub fn result(&self) -> Option<&str> {
        self.get("RESULT")
    }

    /// Classify the reply as the answer to a command expecting
    /// `<topic> <kind> RESULT=OK`.
    ///
    /// A reply with a different topic or kind, or an unknown result, is
    /// [`ProtocolError::UnparsedReply`].
    pub fn classify(self, topic: &str, kind: &str) -> Result<Reply, ProtocolError> {
        if self.topic != topic || self.kind != kind {
            return Err(ProtocolError::UnparsedReply(self.raw));
        }

        let result = self.result().unwrap_or_default().to_string();
        let error = match result.as_str() {
            "OK" => return Ok(self),
            "DUPLICATED_ID" => ProtocolError::DuplicateId,
            "DUPLICATED_DEST" => ProtocolError::DuplicateDestination,
            "INVALID_KEY" => ProtocolError::InvalidKey,
            "INVALID_ID" => ProtocolError::InvalidId,
            "CANT_REACH_PEER" => ProtocolError::CantReachPeer,
            "TIMEOUT" => ProtocolError::Timeout,
            "I2P_ERROR" => ProtocolError::I2pError(self.error_detail()),
            "KEY_NOT_FOUND" => {
                ProtocolError::KeyNotFound(self.get("NAME").unwrap_or_default().to_string())
            }
            _ => ProtocolError::UnparsedReply(self.raw),
        };
        Err(error)
    }

    /// `MESSAGE=` if present, else everything after the result token.
    fn error_detail(&self) -> String {
        if let Some(message) = self.get("MESSAGE") {
            return message.to_string();
        }
        self.raw
            .split_once("RESULT=I2P_ERROR")
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default()
    }
}

/// Split on whitespace, keeping double-quoted runs together and dropping the
/// quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Hide private key material in a command or reply line before it is traced.
pub(crate) fn redact(line: &str) -> Cow<'_, str> {
    // SESSION CREATE sends the combined blob and SESSION STATUS echoes it.
    let session_keys = line.starts_with("SESSION ") && line.contains("DESTINATION=");
    if !session_keys && !line.contains(" PRIV=") {
        return Cow::Borrowed(line);
    }

    let redacted: Vec<&str> = line
        .split_whitespace()
        .map(|word| {
            if word.starts_with("PRIV=") {
                "PRIV=<redacted>"
            } else if word.starts_with("DESTINATION=") && session_keys {
                "DESTINATION=<redacted>"
            } else {
                word
            }
        })
        .collect();
    Cow::Owned(redacted.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let reply = Reply::parse("NAMING REPLY RESULT=OK NAME=example.i2p VALUE=abc==\n");
        assert_eq!(reply.topic(), "NAMING");
        assert_eq!(reply.kind(), "REPLY");
        assert_eq!(reply.result(), Some("OK"));
        assert_eq!(reply.get("NAME"), Some("example.i2p"));
        assert_eq!(reply.get("VALUE"), Some("abc=="));
        assert_eq!(reply.get("MISSING"), None);
    }

    #[test]
    fn test_quoted_values() {
        let reply =
            Reply::parse("SESSION STATUS RESULT=I2P_ERROR MESSAGE=\"tunnel build failed\"\n");
        assert_eq!(reply.get("MESSAGE"), Some("tunnel build failed"));
        assert_eq!(
            reply.classify("SESSION", "STATUS"),
            Err(ProtocolError::I2pError("tunnel build failed".into()))
        );
    }

    #[test]
    fn test_i2p_error_without_message() {
        let reply = Reply::parse("STREAM STATUS RESULT=I2P_ERROR router gone\n");
        assert_eq!(
            reply.classify("STREAM", "STATUS"),
            Err(ProtocolError::I2pError("router gone".into()))
        );
    }

    #[test]
    fn test_classification() {
        let cases = [
            ("SESSION STATUS RESULT=OK\n", None),
            (
                "SESSION STATUS RESULT=DUPLICATED_ID\n",
                Some(ProtocolError::DuplicateId),
            ),
            (
                "SESSION STATUS RESULT=DUPLICATED_DEST\n",
                Some(ProtocolError::DuplicateDestination),
            ),
            (
                "SESSION STATUS RESULT=INVALID_KEY\n",
                Some(ProtocolError::InvalidKey),
            ),
            (
                "SESSION STATUS RESULT=INVALID_ID\n",
                Some(ProtocolError::InvalidId),
            ),
            (
                "SESSION STATUS RESULT=CANT_REACH_PEER\n",
                Some(ProtocolError::CantReachPeer),
            ),
            (
                "SESSION STATUS RESULT=TIMEOUT\n",
                Some(ProtocolError::Timeout),
            ),
        ];
        for (raw, expected) in cases {
            let result = Reply::parse(raw).classify("SESSION", "STATUS");
            match expected {
                None => assert!(result.is_ok(), "{raw}"),
                Some(err) => assert_eq!(result.unwrap_err(), err, "{raw}"),
            }
        }
    }

    #[test]
    fn test_unknown_result_is_unparsed() {
        let raw = "SESSION STATUS RESULT=WHATEVER\n";
        assert_eq!(
            Reply::parse(raw).classify("SESSION", "STATUS"),
            Err(ProtocolError::UnparsedReply(raw.into()))
        );
        assert!(matches!(
            Reply::parse("garbage").classify("SESSION", "STATUS"),
            Err(ProtocolError::UnparsedReply(_))
        ));
        assert!(matches!(
            Reply::parse("").classify("SESSION", "STATUS"),
            Err(ProtocolError::UnparsedReply(_))
        ));
    }

    #[test]
    fn test_topic_mismatch_is_unparsed() {
        assert!(matches!(
            Reply::parse("STREAM STATUS RESULT=OK\n").classify("SESSION", "STATUS"),
            Err(ProtocolError::UnparsedReply(_))
        ));
    }

    #[test]
    fn test_key_not_found_carries_name() {
        let reply = Reply::parse("NAMING REPLY RESULT=KEY_NOT_FOUND NAME=nope.i2p\n");
        assert_eq!(
            reply.classify("NAMING", "REPLY"),
            Err(ProtocolError::KeyNotFound("nope.i2p".into()))
        );
    }

    #[test]
    fn test_redact() {
        assert_eq!(
            redact("SESSION CREATE STYLE=STREAM ID=a DESTINATION=secret i2cp.x=1\n"),
            "SESSION CREATE STYLE=STREAM ID=a DESTINATION=<redacted> i2cp.x=1"
        );
        assert_eq!(
            redact("DEST REPLY PUB=pub PRIV=secret\n"),
            "DEST REPLY PUB=pub PRIV=<redacted>"
        );
        let connect = "STREAM CONNECT ID=a DESTINATION=pub SILENT=false\n";
        assert_eq!(redact(connect), connect);
    }

    #[test]
    fn test_redact_session_status_echo() {
        let traced = redact("SESSION STATUS RESULT=OK DESTINATION=privateblob~~\n");
        assert!(!traced.contains("privateblob"));
        assert_eq!(traced, "SESSION STATUS RESULT=OK DESTINATION=<redacted>");

        let plain = "SESSION STATUS RESULT=OK\n";
        assert_eq!(redact(plain), plain);
    }
}
