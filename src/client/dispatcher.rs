//! Asynchronous delivery to message listeners.
//!
//! Each session with at least one listener runs one dispatcher task. The task
//! delivers one message at a time under the session's delivery lock, so
//! listener calls never overlap with each other or with a synchronous
//! receive on the same session. Consumers are served round-robin.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::futures::Notified;
use tracing::debug;

use crate::broker::MessageStore;
use crate::client::consumer::ConsumerInner;
use crate::client::session::SessionInner;
use crate::utils::now_millis;

pub(crate) async fn run(session: Arc<SessionInner>) {
    debug!("Dispatcher started for session {}", session.id);
    let mut started = session.connection.started.subscribe();
    let mut cursor = 0;

    loop {
        if session.cancel.is_cancelled() {
            break;
        }
        let consumers = session.listening_consumers();
        let stores: Vec<Arc<MessageStore>> =
            consumers.iter().map(|c| c.store().clone()).collect();
        let wakeups: Vec<Pin<Box<Notified<'_>>>> = stores
            .iter()
            .map(|store| {
                let mut wakeup = Box::pin(store.notified());
                wakeup.as_mut().enable();
                wakeup
            })
            .collect();

        let running = *started.borrow_and_update();
        if running
            && !consumers.is_empty()
            && dispatch_one(&session, &consumers, &mut cursor).await
        {
            continue;
        }

        let now = now_millis();
        let nap = stores
            .iter()
            .filter_map(|s| s.next_delivery_time(now))
            .min()
            .map(|due| Duration::from_millis(due.saturating_sub(now).max(0) as u64));
        let any_store = async move {
            if wakeups.is_empty() {
                pending::<()>().await;
            } else {
                select_all(wakeups).await;
            }
        };

        tokio::select! {
            _ = session.cancel.cancelled() => break,
            _ = any_store => {}
            _ = session.listener_changed.notified() => {}
            _ = started.changed() => {}
            _ = async {
                match nap {
                    Some(nap) => tokio::time::sleep(nap).await,
                    None => pending::<()>().await,
                }
            } => {}
        }
    }
    debug!("Dispatcher stopped for session {}", session.id);
}

/// Delivers at most one message. Returns whether a listener was called.
async fn dispatch_one(
    session: &Arc<SessionInner>,
    consumers: &[Arc<ConsumerInner>],
    cursor: &mut usize,
) -> bool {
    let _delivery = session.delivery_lock.lock().await;
    if session.cancel.is_cancelled() || !session.connection.is_started() {
        return false;
    }

    let count = consumers.len();
    for offset in 0..count {
        let index = (*cursor + offset) % count;
        let consumer = &consumers[index];
        if consumer.is_closed() {
            continue;
        }
        let Some(listener) = consumer.listener() else {
            continue;
        };
        if let Some(message) = session.take_next(consumer) {
            *cursor = index + 1;
            session.deliver_to_listener(listener, message).await;
            return true;
        }
    }
    false
}
