//! Change notification for the execution envelope.
//!
//! Only changes made elsewhere (another context of the same area, or
//! another process through the storage watcher) are reported. Writes made
//! through the subscribing context are not, so consumers that also write
//! should keep a poll loop as a same-context catch-all.

use super::EXECUTIONS_KEY;
use crate::storage::{StorageContext, Subscription};

pub struct ChangeNotifier {
    ctx: StorageContext,
}

impl ChangeNotifier {
    pub fn new(ctx: StorageContext) -> Self {
        Self { ctx }
    }

    /// Invoke `callback` whenever the execution envelope changes elsewhere.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ctx.subscribe(move |event| {
            if event.key == EXECUTIONS_KEY {
                callback();
            }
        })
    }
}
