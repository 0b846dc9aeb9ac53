// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stanza tree exchanged between agents and controllers.
//!
//! A stanza is a named element with ordered attributes, ordered children and
//! optional text. Stanzas travel as JSON payloads inside [`crate::frame::Frame`]s.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ad-hoc command namespace.
pub const NS_COMMANDS: &str = "http://jabber.org/protocol/commands";
/// Software version query namespace.
pub const NS_VERSION: &str = "jabber:iq:version";
/// Service discovery (items) namespace.
pub const NS_DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
/// Data forms namespace.
pub const NS_DATA: &str = "jabber:x:data";
/// Stanza error conditions namespace.
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
/// Publish/subscribe event namespace.
pub const NS_PUBSUB_EVENT: &str = "http://jabber.org/protocol/pubsub#event";
/// Agent alarm namespace.
pub const NS_ALARM: &str = "http://northscale.net/protocol/alarms";

/// Errors raised while encoding or decoding stanzas.
#[derive(Debug, Error)]
pub enum StanzaError {
    #[error("stanza encode error: {0}")]
    Encode(serde_json::Error),

    #[error("stanza decode error: {0}")]
    Decode(serde_json::Error),
}

/// A protocol-level error condition carried by `type="error"` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCondition {
    /// Condition element name, e.g. `item-not-found`.
    pub name: &'static str,
    /// Legacy numeric code.
    pub code: u16,
    /// Error type attribute (`modify`, `cancel`, `wait`).
    pub kind: &'static str,
}

impl ErrorCondition {
    pub const BAD_REQUEST: ErrorCondition = ErrorCondition {
        name: "bad-request",
        code: 400,
        kind: "modify",
    };

    pub const ITEM_NOT_FOUND: ErrorCondition = ErrorCondition {
        name: "item-not-found",
        code: 404,
        kind: "modify",
    };

    pub const RESOURCE_CONSTRAINT: ErrorCondition = ErrorCondition {
        name: "resource-constraint",
        code: 500,
        kind: "wait",
    };

    pub const INTERNAL_SERVER_ERROR: ErrorCondition = ErrorCondition {
        name: "internal-server-error",
        code: 500,
        kind: "wait",
    };
}

/// A single stanza element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stanza {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Stanza>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Stanza {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child insertion.
    pub fn with_child(mut self, child: Stanza) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Look up an attribute value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing any existing value for the key.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn add_child(&mut self, child: Stanza) -> &mut Stanza {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// First child with the given element name.
    pub fn child(&self, name: &str) -> Option<&Stanza> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Stanza> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn first_child(&self) -> Option<&Stanza> {
        self.children.first()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The `xmlns` attribute.
    pub fn ns(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    /// The `type` attribute.
    pub fn kind(&self) -> Option<&str> {
        self.attr("type")
    }

    /// Build an empty `iq` result addressed back to the sender of `request`.
    pub fn result_for(request: &Stanza) -> Stanza {
        Self::reply_for(request, "result")
    }

    /// Build an `iq` error reply carrying the given condition.
    pub fn error_for(request: &Stanza, condition: ErrorCondition) -> Stanza {
        let error = Stanza::new("error")
            .with_attr("code", condition.code.to_string())
            .with_attr("type", condition.kind)
            .with_child(Stanza::new(condition.name).with_attr("xmlns", NS_STANZAS));

        Self::reply_for(request, "error").with_child(error)
    }

    fn reply_for(request: &Stanza, kind: &str) -> Stanza {
        let mut reply = Stanza::new("iq").with_attr("type", kind);
        if let Some(id) = request.id() {
            reply.set_attr("id", id);
        }
        if let Some(from) = request.attr("from") {
            reply.set_attr("to", from);
        }
        reply
    }

    pub fn to_json(&self) -> Result<Vec<u8>, StanzaError> {
        serde_json::to_vec(self).map_err(StanzaError::Encode)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, StanzaError> {
        serde_json::from_slice(bytes).map_err(StanzaError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_attr_replaces_existing() {
        let mut stanza = Stanza::new("iq").with_attr("type", "get");
        stanza.set_attr("type", "set");

        assert_eq!(stanza.kind(), Some("set"));
        assert_eq!(stanza.attributes.len(), 1);
    }

    #[test]
    fn test_child_returns_first_match() {
        let stanza = Stanza::new("x")
            .with_child(Stanza::new("field").with_attr("var", "a"))
            .with_child(Stanza::new("field").with_attr("var", "b"));

        assert_eq!(stanza.child("field").and_then(|f| f.attr("var")), Some("a"));
        assert_eq!(stanza.children_named("field").count(), 2);
        assert!(stanza.child("missing").is_none());
    }

    #[test]
    fn test_result_for_swaps_addressing() {
        let request = Stanza::new("iq")
            .with_attr("type", "set")
            .with_attr("id", "cmd1")
            .with_attr("from", "controller@example.com/admin")
            .with_attr("to", "agent@example.com/box");

        let reply = Stanza::result_for(&request);

        assert_eq!(reply.name, "iq");
        assert_eq!(reply.kind(), Some("result"));
        assert_eq!(reply.id(), Some("cmd1"));
        assert_eq!(reply.attr("to"), Some("controller@example.com/admin"));
    }

    #[test]
    fn test_error_for_item_not_found() {
        let request = Stanza::new("iq").with_attr("id", "7").with_attr("from", "ctl");
        let reply = Stanza::error_for(&request, ErrorCondition::ITEM_NOT_FOUND);

        assert_eq!(reply.kind(), Some("error"));
        let error = reply.child("error").unwrap();
        assert_eq!(error.attr("code"), Some("404"));
        assert_eq!(error.attr("type"), Some("modify"));
        let condition = error.child("item-not-found").unwrap();
        assert_eq!(condition.ns(), Some(NS_STANZAS));
    }

    #[test]
    fn test_json_payload_decodes_back() {
        let stanza = Stanza::new("message")
            .with_attr("to", "ctl")
            .with_child(Stanza::new("body").with_text("hello"));

        let bytes = stanza.to_json().unwrap();
        assert_eq!(Stanza::from_json(&bytes).unwrap(), stanza);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = Stanza::from_json(b"not json").unwrap_err();
        assert!(err.to_string().contains("decode"));
    }
}
