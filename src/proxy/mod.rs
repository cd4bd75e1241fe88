// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed device proxies.
//!
//! [`generate`] turns a [`DeviceDescriptor`](crate::capability::DeviceDescriptor)
//! into a [`ProxyBinding`] owned by the engine. Automation code receives
//! [`DeviceProxy`] handles pointing at that binding; once the descriptor is
//! replaced the binding is retired and every handle fails with
//! [`StaleProxyError`](crate::error::StaleProxyError).
//!
//! ```no_run
//! # async fn demo(handle: z2m_lib::SyncHandle) -> z2m_lib::Result<()> {
//! let lamp = handle.proxy("hall_lamp")?;
//! lamp.set("state", true)?;
//! lamp.numeric("brightness")?.set(128.0)?;
//! # Ok(())
//! # }
//! ```

mod accessor;
mod binding;
mod device_proxy;

pub use accessor::{
    Accessor, Binary, CapabilityType, Composite, Enumerated, List, Numeric, Text,
};
pub use binding::{ProxyBinding, generate};
pub use device_proxy::DeviceProxy;
