//! 中断下半部工作队列
//!
//! 硬中断上下文只负责入队和唤醒，读状态寄存器、分发以及 panic 检查都在
//! 工作线程里通过 [`SensorHub::process_work`](crate::SensorHub::process_work) 完成。

use core::{
    pin::Pin,
    task::{Context, Poll, Waker},
};

use crossbeam::queue::SegQueue;
use futures::task::AtomicWaker;

/// 待处理的工作项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqRequest {
    /// 中断线被拉起
    Interrupt,
    /// 客户端请求确认 hub 是否 panic
    PanicCheck,
}

/// 中断工作队列
///
/// 使用无锁队列，`raise` 可在硬中断上下文调用。
pub struct IrqWork {
    /// 工作项队列（无锁）
    requests: SegQueue<IrqRequest>,

    /// 工作线程通知
    waker: AtomicWaker,
}

impl IrqWork {
    pub fn new() -> Self {
        Self {
            requests: SegQueue::new(),
            waker: AtomicWaker::new(),
        }
    }

    /// 中断上半部：记录一次中断
    pub fn raise(&self) {
        self.push(IrqRequest::Interrupt);
    }

    /// 请求一次 panic 检查
    pub fn request_panic_check(&self) {
        self.push(IrqRequest::PanicCheck);
    }

    pub fn push(&self, request: IrqRequest) {
        self.requests.push(request);
        self.waker.wake();
    }

    pub fn pop(&self) -> Option<IrqRequest> {
        self.requests.pop()
    }

    pub fn has_work(&self) -> bool {
        !self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// 注册 Waker
    pub fn register(&self, waker: &Waker) {
        self.waker.register(waker);
    }

    /// 等待队列非空
    pub fn wait(&self) -> WaitWork<'_> {
        WaitWork { work: self }
    }
}

impl Default for IrqWork {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WaitWork<'a> {
    work: &'a IrqWork,
}

impl Future for WaitWork<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.work.has_work() {
            return Poll::Ready(());
        }
        self.work.register(cx.waker());
        // 注册后再检查一次，避免丢失注册前到达的唤醒
        if self.work.has_work() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
