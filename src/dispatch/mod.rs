// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivery of state changes to automation callbacks.
//!
//! Callbacks are registered in a [`CallbackRegistry`] and invoked by a
//! [`Dispatcher`] running on the engine task. Delivery is strictly ordered
//! and a failing callback never prevents the others from running.
//!
//! Callbacks are synchronous and may call typed setters on device proxies;
//! those writes are queued and processed after the current notification.

mod callback;
mod dispatcher;

pub use callback::{
    CallbackError, CallbackRegistry, CallbackResult, DeviceSelector, SubscriptionId,
};
pub use dispatcher::{DispatchError, Dispatcher, Notification};
