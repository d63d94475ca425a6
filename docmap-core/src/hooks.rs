//! Class-level lifecycle handlers.
//!
//! Handlers registered on a [`RecordService`](crate::service::RecordService) run for every record
//! of the model, before the record's own [`Model`] hook methods.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{error::MapperResult, model::Model};

/// The fixed points at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeSave,
    AfterSave,
    BeforeRemove,
    AfterRemove,
}

/// A class-level handler. The flag is the record's "new" state for save hooks and always `false`
/// for remove hooks.
pub type Handler<M> = Arc<dyn Fn(&mut M, bool) -> MapperResult<()> + Send + Sync>;

pub(crate) struct HookRegistry<M> {
    handlers: RwLock<Vec<(HookPoint, Handler<M>)>>,
}

impl<M> Default for HookRegistry<M> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<M> fmt::Debug for HookRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("HookRegistry").field("handlers", &count).finish()
    }
}

impl<M: Model> HookRegistry<M> {
    pub(crate) fn add(&self, point: HookPoint, handler: Handler<M>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((point, handler));
    }

    fn snapshot(&self, point: HookPoint) -> Vec<Handler<M>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(registered, _)| *registered == point)
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    /// Runs the class handlers for `point` in registration order, then the record's own hook.
    /// The first error stops dispatch.
    ///
    /// Handlers run outside the registry lock, so a handler may register further handlers. Those
    /// take effect from the next dispatch.
    pub(crate) fn dispatch(&self, point: HookPoint, record: &mut M, is_new: bool) -> MapperResult<()> {
        for handler in self.snapshot(point) {
            handler(record, is_new)?;
        }

        match point {
            HookPoint::BeforeSave => record.before_save(is_new),
            HookPoint::AfterSave => record.after_save(is_new),
            HookPoint::BeforeRemove => record.before_remove(),
            HookPoint::AfterRemove => record.after_remove(),
        }
    }
}
