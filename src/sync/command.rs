// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Commands processed by the engine task.

use tokio::sync::oneshot;

use crate::capability::Value;
use crate::event::DeviceId;
use crate::protocol::BrokerEvent;

/// Everything the engine task reacts to, in one queue.
#[derive(Debug)]
pub(crate) enum Command {
    /// Connection change or message from the broker.
    Broker(BrokerEvent),
    /// Validated write from a proxy generated at `epoch`.
    Write {
        device: DeviceId,
        epoch: u64,
        capability: String,
        value: Value,
    },
    /// Toggle request from a proxy; published once, never retried.
    Toggle {
        device: DeviceId,
        epoch: u64,
        capability: String,
    },
    /// `/get` request from a proxy; `None` queries every queryable capability.
    Query {
        device: DeviceId,
        epoch: u64,
        capability: Option<String>,
    },
    /// Debounce window of the write `token` has elapsed.
    Flush {
        device: DeviceId,
        capability: String,
        token: u64,
    },
    /// Confirmation wait of the write `token` has elapsed.
    Retry {
        device: DeviceId,
        capability: String,
        token: u64,
    },
    /// Acknowledged once every earlier command has been processed.
    Barrier(oneshot::Sender<()>),
    /// Stops the engine.
    Shutdown(oneshot::Sender<()>),
}
