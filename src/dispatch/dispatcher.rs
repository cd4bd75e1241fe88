// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordered, failure-isolating delivery of notifications.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use super::{CallbackRegistry, CallbackResult, SubscriptionId};
use crate::event::DeviceId;
use crate::state::StateChange;
use crate::sync::WriteFailure;

/// Something automation callbacks must hear about.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A capability value was applied.
    Change(StateChange),
    /// A write exhausted its retries.
    WriteFailure(WriteFailure),
}

impl Notification {
    /// The device concerned.
    #[must_use]
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Change(change) => &change.device,
            Self::WriteFailure(failure) => &failure.device,
        }
    }

    /// The capability concerned.
    #[must_use]
    pub fn capability(&self) -> &str {
        match self {
            Self::Change(change) => &change.capability,
            Self::WriteFailure(failure) => &failure.capability,
        }
    }
}

/// A callback that failed while handling a notification.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The callback returned an error.
    #[error("callback {subscription} failed on {device}/{capability}: {message}")]
    Failed {
        /// The failing registration.
        subscription: SubscriptionId,
        /// Device of the notification.
        device: DeviceId,
        /// Capability of the notification.
        capability: String,
        /// The error's message.
        message: String,
    },

    /// The callback panicked.
    #[error("callback {subscription} panicked on {device}/{capability}: {message}")]
    Panicked {
        /// The failing registration.
        subscription: SubscriptionId,
        /// Device of the notification.
        device: DeviceId,
        /// Capability of the notification.
        capability: String,
        /// The panic message, if it was a string.
        message: String,
    },
}

impl DispatchError {
    /// The registration whose callback failed.
    #[must_use]
    pub fn subscription(&self) -> SubscriptionId {
        match self {
            Self::Failed { subscription, .. } | Self::Panicked { subscription, .. } => *subscription,
        }
    }

    /// The device of the notification being handled.
    #[must_use]
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Failed { device, .. } | Self::Panicked { device, .. } => device,
        }
    }

    /// Returns `true` if the callback panicked.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }
}

enum Outcome {
    Failed(String),
    Panicked(String),
}

/// FIFO queue of notifications delivered to registered callbacks.
///
/// Notifications are delivered in the order they were queued, and for each
/// notification the matching callbacks run in registration order. A
/// callback that returns an error or panics is reported to the registered
/// error sinks and delivery carries on with the next callback.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use z2m_lib::dispatch::{CallbackRegistry, DeviceSelector, Dispatcher};
///
/// let registry = Arc::new(CallbackRegistry::new());
/// let calls = Arc::new(AtomicUsize::new(0));
/// let seen = Arc::clone(&calls);
/// registry.on_change(DeviceSelector::Any, None, move |_| {
///     seen.fetch_add(1, Ordering::SeqCst);
///     Ok(())
/// });
///
/// let mut dispatcher = Dispatcher::new(registry);
/// assert_eq!(dispatcher.drain(), 0);
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<CallbackRegistry>,
    queue: VecDeque<Notification>,
}

impl Dispatcher {
    /// Creates a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<CallbackRegistry>) -> Self {
        Self {
            registry,
            queue: VecDeque::new(),
        }
    }

    /// Queues a notification.
    pub fn enqueue(&mut self, notification: Notification) {
        self.queue.push_back(notification);
    }

    /// Number of queued notifications.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Delivers every queued notification; returns how many were delivered.
    pub fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(notification) = self.queue.pop_front() {
            self.deliver(&notification);
            delivered += 1;
        }
        delivered
    }

    fn deliver(&self, notification: &Notification) {
        match notification {
            Notification::Change(change) => {
                for (id, callback) in self.registry.change_callbacks_for(change) {
                    if let Err(outcome) = invoke(|| callback(change)) {
                        self.report(id, notification, outcome);
                    }
                }
            }
            Notification::WriteFailure(failure) => {
                for (id, callback) in self.registry.failure_callbacks_for(failure) {
                    if let Err(outcome) = invoke(|| callback(failure)) {
                        self.report(id, notification, outcome);
                    }
                }
            }
        }
    }

    fn report(&self, subscription: SubscriptionId, notification: &Notification, outcome: Outcome) {
        let device = notification.device().clone();
        let capability = notification.capability().to_string();
        let error = match outcome {
            Outcome::Failed(message) => DispatchError::Failed {
                subscription,
                device,
                capability,
                message,
            },
            Outcome::Panicked(message) => DispatchError::Panicked {
                subscription,
                device,
                capability,
                message,
            },
        };

        let sinks = self.registry.error_sinks();
        if sinks.is_empty() {
            tracing::error!(
                subscription = %subscription,
                device = %error.device(),
                error = %error,
                "Automation callback failed"
            );
            return;
        }
        for sink in sinks {
            if panic::catch_unwind(AssertUnwindSafe(|| sink(&error))).is_err() {
                tracing::error!(error = %error, "Callback error sink panicked");
            }
        }
    }
}

fn invoke(f: impl FnOnce() -> CallbackResult) -> Result<(), Outcome> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Outcome::Failed(e.to_string())),
        Err(payload) => Err(Outcome::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Value;
    use crate::dispatch::DeviceSelector;
    use crate::state::StateSnapshot;
    use parking_lot::Mutex;

    fn change(capability: &str, value: i32) -> Notification {
        let id = DeviceId::new("0x01");
        Notification::Change(StateChange {
            snapshot: Arc::new(StateSnapshot::empty(id.clone(), "lamp")),
            device: id,
            friendly_name: "lamp".to_string(),
            capability: capability.to_string(),
            value: Value::from(value),
            previous: None,
            changed: true,
            confirmed: false,
        })
    }

    #[test]
    fn delivers_in_queue_and_registration_order() {
        let registry = Arc::new(CallbackRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            registry.on_change(DeviceSelector::Any, None, move |c| {
                log.lock().push(format!("{tag}:{}", c.value));
                Ok(())
            });
        }

        let mut dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.enqueue(change("brightness", 1));
        dispatcher.enqueue(change("brightness", 2));
        assert_eq!(dispatcher.pending(), 2);
        assert_eq!(dispatcher.drain(), 2);
        assert_eq!(dispatcher.pending(), 0);

        assert_eq!(
            *log.lock(),
            ["first:1", "second:1", "first:2", "second:2"]
        );
    }

    #[test]
    fn failing_callback_does_not_stop_delivery() {
        let registry = Arc::new(CallbackRegistry::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let reached = Arc::new(Mutex::new(0));

        let failing = registry.on_change(DeviceSelector::Any, None, |_| Err("boom".into()));
        let panicking = registry.on_change(DeviceSelector::Any, None, |_| panic!("kaboom"));
        {
            let reached = Arc::clone(&reached);
            registry.on_change(DeviceSelector::Any, None, move |_| {
                *reached.lock() += 1;
                Ok(())
            });
        }
        {
            let errors = Arc::clone(&errors);
            registry.on_callback_error(move |e| errors.lock().push(e.clone()));
        }

        let mut dispatcher = Dispatcher::new(registry);
        dispatcher.enqueue(change("state", 1));
        dispatcher.drain();

        assert_eq!(*reached.lock(), 1);
        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].subscription(), failing);
        assert!(!errors[0].is_panic());
        assert!(errors[0].to_string().contains("boom"));
        assert_eq!(errors[1].subscription(), panicking);
        assert!(errors[1].is_panic());
        assert!(errors[1].to_string().contains("kaboom"));
    }

    #[test]
    fn unsubscribed_callback_is_not_called() {
        let registry = Arc::new(CallbackRegistry::new());
        let calls = Arc::new(Mutex::new(0));
        let id = {
            let calls = Arc::clone(&calls);
            registry.on_change("lamp", Some("brightness"), move |_| {
                *calls.lock() += 1;
                Ok(())
            })
        };

        let mut dispatcher = Dispatcher::new(Arc::clone(&registry));
        dispatcher.enqueue(change("brightness", 1));
        dispatcher.drain();
        registry.unsubscribe(id);
        dispatcher.enqueue(change("brightness", 2));
        dispatcher.drain();

        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
