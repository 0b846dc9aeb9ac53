// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversion between stanzas and commands, replies and alarms.

use conflate_protocol::stanza::{
    NS_ALARM, NS_COMMANDS, NS_DATA, NS_DISCO_ITEMS, NS_PUBSUB_EVENT, NS_VERSION,
};
use conflate_protocol::Stanza;

use crate::alarm::Alarm;
use crate::dispatch::{Command, FieldSet, ResultBuilder};
use crate::kvlist::{KvList, KvPair};

/// Presence priority announced on connect.
pub const PRESENCE_PRIORITY: &str = "5";

/// What an inbound stanza asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `jabber:iq:version` query.
    Version,
    /// Ad-hoc command expecting a reply.
    Command,
    /// Service discovery of the command list.
    Disco,
    /// Message, possibly a pubsub event carrying a command.
    Event,
    Ignore,
}

/// Route an inbound stanza by element name and payload namespace.
pub fn route(stanza: &Stanza) -> Route {
    match stanza.name.as_str() {
        "iq" => {
            if matches!(stanza.kind(), Some("result") | Some("error")) {
                return Route::Ignore;
            }
            stanza
                .children
                .iter()
                .find_map(|child| match child.ns() {
                    Some(NS_VERSION) => Some(Route::Version),
                    Some(NS_COMMANDS) => Some(Route::Command),
                    Some(NS_DISCO_ITEMS) => Some(Route::Disco),
                    _ => None,
                })
                .unwrap_or(Route::Ignore)
        }
        "message" => Route::Event,
        _ => Route::Ignore,
    }
}

/// Read the `<field var>` children of a data form.
///
/// Each field becomes one entry, linked in at the head, so the list comes
/// out in reverse document order. Fields without a `var` are skipped.
pub fn form_to_kvlist(x: &Stanza) -> KvList {
    let mut list = KvList::new();
    for field in x.children_named("field") {
        let Some(var) = field.attr("var") else {
            continue;
        };
        let values = field
            .children_named("value")
            .map(|value| value.text().unwrap_or_default());
        if let Ok(pair) = KvPair::new(var, values) {
            list.push_front(pair);
        }
    }
    list
}

fn command_args(command: &Stanza) -> KvList {
    command
        .child("x")
        .map(form_to_kvlist)
        .unwrap_or_default()
}

/// Decode `iq/command[@node]` into a direct command.
pub fn command_from_iq(iq: &Stanza) -> Option<Command> {
    let command = iq
        .children_named("command")
        .find(|c| c.ns() == Some(NS_COMMANDS))?;
    let name = command.attr("node")?;
    Some(Command::direct(name, command_args(command)))
}

/// Decode `message/event/items/item/command[@command]` into a notification.
///
/// Returns `None` for messages that are not pubsub events or whose event
/// carries no item.
pub fn command_from_event(message: &Stanza) -> Option<Command> {
    let event = message
        .children_named("event")
        .find(|e| e.ns().is_none_or(|ns| ns == NS_PUBSUB_EVENT))?;
    let command = event.child("items")?.child("item")?.child("command")?;
    let name = command.attr("command")?;
    Some(Command::notification(name, command_args(command)))
}

fn field_stanza(key: &str, values: &[String]) -> Stanza {
    let mut field = Stanza::new("field").with_attr("var", key);
    for value in values {
        field.add_child(Stanza::new("value").with_text(value.as_str()));
    }
    field
}

fn push_fields(parent: &mut Stanza, set: &FieldSet) {
    for (key, values) in set.fields() {
        parent.add_child(field_stanza(key, values));
    }
}

/// Render a result as `<x xmlns="jabber:x:data" type="result">`.
///
/// Top-level fields sit directly inside `x`; each field-set becomes an
/// `<item>` child. Returns `None` for an empty result.
pub fn result_form(result: &ResultBuilder) -> Option<Stanza> {
    if result.is_empty() {
        return None;
    }

    let mut x = Stanza::new("x")
        .with_attr("xmlns", NS_DATA)
        .with_attr("type", "result");
    push_fields(&mut x, result.top());
    for set in result.fieldsets() {
        let item = x.add_child(Stanza::new("item"));
        push_fields(item, set);
    }
    Some(x)
}

/// The `completed` reply to an ad-hoc command request.
pub fn command_reply(request: &Stanza, result: &ResultBuilder) -> Stanza {
    let mut command = Stanza::new("command").with_attr("xmlns", NS_COMMANDS);
    if let Some(req) = request.children_named("command").next() {
        for attr in ["node", "sessionid"] {
            if let Some(value) = req.attr(attr) {
                command.set_attr(attr, value);
            }
        }
    }
    command.set_attr("status", "completed");
    if let Some(x) = result_form(result) {
        command.add_child(x);
    }

    Stanza::result_for(request).with_child(command)
}

/// Answer a `jabber:iq:version` query.
pub fn version_reply(request: &Stanza, software: &str, version: &str) -> Stanza {
    let query = Stanza::new("query")
        .with_attr("xmlns", NS_VERSION)
        .with_child(Stanza::new("name").with_text(software))
        .with_child(Stanza::new("version").with_text(version));
    Stanza::result_for(request).with_child(query)
}

/// Answer a `disco#items` query with one item per command.
pub fn disco_reply(request: &Stanza, jid: &str, commands: &[(&str, &str)]) -> Stanza {
    let mut query = Stanza::new("query")
        .with_attr("xmlns", NS_DISCO_ITEMS)
        .with_attr("node", NS_COMMANDS);
    for (node, name) in commands {
        query.add_child(
            Stanza::new("item")
                .with_attr("jid", jid)
                .with_attr("node", *node)
                .with_attr("name", *name),
        );
    }
    Stanza::result_for(request)
        .with_attr("from", jid)
        .with_child(query)
}

/// Initial presence announcement.
pub fn presence() -> Stanza {
    Stanza::new("presence").with_child(Stanza::new("priority").with_text(PRESENCE_PRIORITY))
}

/// Wrap an open alarm in a message addressed to `to`.
pub fn alarm_message(alarm: &Alarm, to: &str) -> Stanza {
    let mut body = Stanza::new("alarm")
        .with_attr("xmlns", NS_ALARM)
        .with_attr("sequence", alarm.sequence.to_string())
        .with_attr("name", alarm.name.as_str())
        .with_text(alarm.message.as_str());
    if let Some(raised_at) = alarm.raised_at {
        body.set_attr("raised_at", raised_at.to_rfc3339());
    }

    Stanza::new("message")
        .with_attr("to", to)
        .with_attr("type", "normal")
        .with_child(body)
}
