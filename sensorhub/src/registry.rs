//! 回调注册表
//!
//! - [`PanicRegistry`]：按优先级槽位保存 panic 恢复回调
//! - [`InitCallRegistry`]：固件首次加载后执行一次的初始化回调，后注册先执行

use alloc::{sync::Arc, vec::Vec};

use log::{error, info};
use spin::Mutex;

use crate::{PanicSlot, SensorHub, err::*};

/// Feature logic re-establishing hub side state after a panic reset.
pub trait PanicHandler: Send + Sync + 'static {
    fn restore(&self, hub: &SensorHub);
}

impl<F> PanicHandler for F
where
    F: Fn(&SensorHub) + Send + Sync + 'static,
{
    fn restore(&self, hub: &SensorHub) {
        self(hub)
    }
}

/// One-time feature bring-up, run once hub firmware is up.
pub trait InitCall: Send + Sync + 'static {
    fn init(&self, hub: &SensorHub) -> Result;
}

impl<F> InitCall for F
where
    F: Fn(&SensorHub) -> Result + Send + Sync + 'static,
{
    fn init(&self, hub: &SensorHub) -> Result {
        self(hub)
    }
}

/// Panic 回调表，每个优先级一个槽位
pub struct PanicRegistry {
    slots: Mutex<[Option<Arc<dyn PanicHandler>>; PanicSlot::COUNT]>,
}

impl PanicRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(core::array::from_fn(|_| None)),
        }
    }

    pub fn register(&self, slot: PanicSlot, handler: Arc<dyn PanicHandler>) -> Result {
        let mut slots = self.slots.lock();
        let entry = &mut slots[slot.index()];
        if entry.is_some() {
            error!("{} callback registration failed", slot.name());
            return Err(HubError::SlotOccupied(slot));
        }
        *entry = Some(handler);
        info!("{} callback registered", slot.name());
        Ok(())
    }

    pub fn unregister(&self, slot: PanicSlot) {
        self.slots.lock()[slot.index()] = None;
        info!("{} callback un-registered", slot.name());
    }

    pub fn get(&self, slot: PanicSlot) -> Option<Arc<dyn PanicHandler>> {
        self.slots.lock()[slot.index()].clone()
    }

    pub fn is_registered(&self, slot: PanicSlot) -> bool {
        self.slots.lock()[slot.index()].is_some()
    }

    pub fn clear(&self) {
        for entry in self.slots.lock().iter_mut() {
            *entry = None;
        }
    }
}

impl Default for PanicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 初始化回调栈
///
/// 固件首次加载完成后整体取出执行一次，之后关闭；关闭状态下的注册会被退回，
/// 由调用者立即执行。
pub struct InitCallRegistry {
    inner: Mutex<InitCalls>,
}

#[derive(Default)]
struct InitCalls {
    /// 栈顶在末尾
    calls: Vec<Arc<dyn InitCall>>,
    closed: bool,
}

impl InitCallRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InitCalls::default()),
        }
    }

    /// Push `call` on the stack. Once the stack has been drained the call is
    /// handed back for the caller to run right away.
    #[must_use]
    pub fn register(&self, call: Arc<dyn InitCall>) -> Option<Arc<dyn InitCall>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Some(call);
        }
        inner.calls.push(call);
        None
    }

    /// Remove every entry backed by the same object as `call`.
    pub fn unregister(&self, call: &Arc<dyn InitCall>) {
        self.inner.lock().calls.retain(|c| !same_call(c, call));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().calls.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Take all entries, most recently registered first, and close the stack.
    pub fn take(&self) -> Vec<Arc<dyn InitCall>> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let mut calls = core::mem::take(&mut inner.calls);
        calls.reverse();
        calls
    }

    /// Accept registrations again, used when the hub is torn down.
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    /// Run and free every entry, most recently registered first. A failing
    /// entry is logged and the rest still run. Returns the number of
    /// failures.
    pub fn drain(&self, hub: &SensorHub) -> usize {
        let mut failed = 0;
        for call in self.take() {
            if let Err(e) = call.init(hub) {
                error!("init call failed: {e}");
                failed += 1;
            }
        }
        failed
    }
}

impl Default for InitCallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn same_call(a: &Arc<dyn InitCall>, b: &Arc<dyn InitCall>) -> bool {
    core::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl PanicHandler for Nop {
        fn restore(&self, _hub: &SensorHub) {}
    }

    impl InitCall for Nop {
        fn init(&self, _hub: &SensorHub) -> Result {
            Ok(())
        }
    }

    #[test]
    fn occupied_slot_is_not_overwritten() {
        let registry = PanicRegistry::new();
        let first: Arc<dyn PanicHandler> = Arc::new(Nop);
        registry
            .register(PanicSlot::AccelRestore, first.clone())
            .unwrap();
        let err = registry
            .register(PanicSlot::AccelRestore, Arc::new(Nop))
            .unwrap_err();
        assert!(matches!(err, HubError::SlotOccupied(PanicSlot::AccelRestore)));

        let kept = registry.get(PanicSlot::AccelRestore).unwrap();
        assert!(core::ptr::addr_eq(Arc::as_ptr(&kept), Arc::as_ptr(&first)));

        registry.unregister(PanicSlot::AccelRestore);
        assert!(!registry.is_registered(PanicSlot::AccelRestore));
        registry
            .register(PanicSlot::AccelRestore, Arc::new(Nop))
            .unwrap();
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = PanicRegistry::new();
        registry.unregister(PanicSlot::GyroRestore);
        registry.unregister(PanicSlot::GyroRestore);
        assert!(registry.get(PanicSlot::GyroRestore).is_none());
    }

    #[test]
    fn init_calls_come_out_last_first() {
        let registry = InitCallRegistry::new();
        let a: Arc<dyn InitCall> = Arc::new(Nop);
        let b: Arc<dyn InitCall> = Arc::new(Nop);
        let c: Arc<dyn InitCall> = Arc::new(Nop);
        assert!(registry.register(a.clone()).is_none());
        assert!(registry.register(b.clone()).is_none());
        assert!(registry.register(c.clone()).is_none());

        let order = registry.take();
        assert_eq!(order.len(), 3);
        assert!(same_call(&order[0], &c));
        assert!(same_call(&order[1], &b));
        assert!(same_call(&order[2], &a));
        assert!(registry.is_empty());
    }

    #[test]
    fn drained_stack_hands_calls_back() {
        let registry = InitCallRegistry::new();
        assert!(registry.take().is_empty());
        assert!(registry.is_closed());

        let late: Arc<dyn InitCall> = Arc::new(Nop);
        let back = registry.register(late.clone()).unwrap();
        assert!(same_call(&back, &late));
        assert!(registry.is_empty());

        registry.reopen();
        assert!(registry.register(late).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_every_matching_node() {
        let registry = InitCallRegistry::new();
        let a: Arc<dyn InitCall> = Arc::new(Nop);
        let b: Arc<dyn InitCall> = Arc::new(Nop);
        assert!(registry.register(a.clone()).is_none());
        assert!(registry.register(b.clone()).is_none());
        assert!(registry.register(a.clone()).is_none());

        registry.unregister(&a);
        assert_eq!(registry.len(), 1);
        assert!(same_call(&registry.take()[0], &b));
    }
}
