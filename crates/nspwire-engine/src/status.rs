//! Connection status mirrored into component data.
//!
//! Only components that declare the status key (`socketStatus` unless the
//! connect request names another) receive it: `connectUrl` is written on
//! connect, and each transport status event keeps its camelCased slot
//! current.

use std::sync::Arc;

use nspwire_core::{event_handler, Subscription};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::wiring::{Wired, WiringContext};

/// Transport status events and the data keys they land under.
pub const STATUS_EVTS: &[(&str, &str)] = &[
    ("connect_error", "connectError"),
    ("connect_timeout", "connectTimeout"),
    ("reconnect", "reconnect"),
    ("reconnect_attempt", "reconnectAttempt"),
    ("reconnecting", "reconnecting"),
    ("reconnect_error", "reconnectError"),
    ("reconnect_failed", "reconnectFailed"),
    ("ping", "ping"),
    ("pong", "pong"),
];

pub fn wire_status(ctx: &WiringContext<'_>, prop: &str, url: &str) -> Wired {
    let data = ctx.component.data();
    if !data.contains(prop) {
        return Wired::default();
    }

    let mut fields = Map::new();
    fields.insert("connectUrl".to_owned(), json!(url));
    for (_, key) in STATUS_EVTS {
        fields.insert((*key).to_owned(), Value::String(String::new()));
    }
    data.merge(prop, fields);

    let mut wired = Wired::default();
    for (evt, key) in STATUS_EVTS {
        let data = data.clone();
        let path = format!("{prop}.{key}");
        let token = ctx.token.clone();
        let conn = Arc::clone(&ctx.channel.conn);
        let id = conn.on(
            evt,
            event_handler(move |payload, _ack| {
                if !token.is_cancelled() {
                    data.set(&path, payload);
                }
            }),
        );
        wired
            .subscriptions
            .push(Subscription::new(move || conn.off_listener(id)));
    }
    debug!(prop, url, scope = %ctx.channel.scope, "connection status attached");
    wired
}
