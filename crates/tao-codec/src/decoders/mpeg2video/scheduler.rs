//! 依赖感知的条带任务调度器
//!
//! 固定数量的图像槽位组成环, 每个槽位持有一个负载 (帧单元). 图像声明 0..=2 个
//! 依赖 (参考图像), 其条带任务只有在全部依赖解码完成后才会分发. 任务按图像
//! 提交顺序 FIFO 分发, 输出队列按入队顺序 FIFO 交付.
//!
//! 槽位只有在满足以下全部条件后才会被回收:
//! - 本图像全部条带已完成;
//! - 输出端已消费 (或被显式释放);
//! - 所有依赖本图像的后续图像都已解码完成;
//! - 没有持有者 (参考窗口) 保留它.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use log::trace;
use tao_core::{TaoError, TaoResult};

/// 图像句柄: 槽位下标 + 代数, 槽位复用后旧句柄自动失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PictureId {
    slot: usize,
    generation: u64,
}

impl PictureId {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Free,
    /// 已创建, 正在收集条带
    Building,
    /// 已提交, 等待或正在解码
    Queued,
    /// 全部条带完成
    Done,
}

struct Slot<T, P> {
    phase: Phase,
    generation: u64,
    deps: Vec<PictureId>,
    /// 尚未完成解码的依赖者数量
    waiters: usize,
    holds: usize,
    consumed: bool,
    pending: VecDeque<T>,
    outstanding: usize,
    payload: P,
}

struct State<T, P> {
    slots: Vec<Slot<T, P>>,
    /// 待分发任务的图像, 按提交顺序
    ready: VecDeque<PictureId>,
    output: VecDeque<PictureId>,
    next_generation: u64,
    killed: bool,
}

impl<T, P> State<T, P> {
    fn slot(&self, id: PictureId) -> Option<&Slot<T, P>> {
        self.slots
            .get(id.slot)
            .filter(|s| s.generation == id.generation && s.phase != Phase::Free)
    }

    fn slot_mut(&mut self, id: PictureId) -> TaoResult<&mut Slot<T, P>> {
        self.slots
            .get_mut(id.slot)
            .filter(|s| s.generation == id.generation && s.phase != Phase::Free)
            .ok_or_else(|| TaoError::Internal(format!("无效的图像句柄: {id:?}")))
    }

    fn deps_done(&self, id: PictureId) -> bool {
        self.slot(id).is_none_or(|s| {
            s.deps
                .iter()
                .all(|&d| self.slot(d).is_none_or(|dep| dep.phase == Phase::Done))
        })
    }

    /// 满足回收条件时释放槽位, 返回是否释放
    fn try_free(&mut self, index: usize) -> bool {
        let s = &mut self.slots[index];
        if s.phase == Phase::Done && s.consumed && s.waiters == 0 && s.holds == 0 {
            s.phase = Phase::Free;
            s.deps.clear();
            trace!("调度器: 回收槽位 {index}");
            true
        } else {
            false
        }
    }

    /// 图像全部条带完成: 通知依赖并尝试回收
    fn complete(&mut self, id: PictureId) {
        let deps = match self.slots.get_mut(id.slot) {
            Some(s) => {
                s.phase = Phase::Done;
                std::mem::take(&mut s.deps)
            }
            None => return,
        };
        for dep in &deps {
            if let Some(s) = self
                .slots
                .get_mut(dep.slot)
                .filter(|s| s.generation == dep.generation && s.phase != Phase::Free)
            {
                s.waiters = s.waiters.saturating_sub(1);
            }
            self.try_free(dep.slot);
        }
        self.try_free(id.slot);
    }

    fn all_free(&self) -> bool {
        self.slots.iter().all(|s| s.phase == Phase::Free)
    }
}

/// 调度器
pub struct TaskScheduler<T, P> {
    state: Mutex<State<T, P>>,
    /// 工作线程: 新任务或依赖完成
    work: Condvar,
    /// 输出线程: 队首图像完成
    output: Condvar,
    /// 创建者与 flush: 槽位释放
    freed: Condvar,
}

fn poisoned() -> TaoError {
    TaoError::Internal("调度器锁已中毒".into())
}

impl<T, P: Clone> TaskScheduler<T, P> {
    /// 创建 `depth` 个槽位, `payload(i)` 为第 i 个槽位生成负载
    pub fn new(depth: usize, mut payload: impl FnMut(usize) -> P) -> Self {
        let slots = (0..depth)
            .map(|i| Slot {
                phase: Phase::Free,
                generation: 0,
                deps: Vec::new(),
                waiters: 0,
                holds: 0,
                consumed: false,
                pending: VecDeque::new(),
                outstanding: 0,
                payload: payload(i),
            })
            .collect();
        Self {
            state: Mutex::new(State {
                slots,
                ready: VecDeque::new(),
                output: VecDeque::new(),
                next_generation: 1,
                killed: false,
            }),
            work: Condvar::new(),
            output: Condvar::new(),
            freed: Condvar::new(),
        }
    }

    fn lock(&self) -> TaoResult<MutexGuard<'_, State<T, P>>> {
        self.state.lock().map_err(|_| poisoned())
    }

    pub fn depth(&self) -> TaoResult<usize> {
        Ok(self.lock()?.slots.len())
    }

    /// 取得一个空闲槽位, 池满时阻塞; 调度器已终止时返回错误
    pub fn create(&self) -> TaoResult<PictureId> {
        let mut st = self.lock()?;
        loop {
            if st.killed {
                return Err(TaoError::Internal("调度器已终止".into()));
            }
            if let Some(index) = st.slots.iter().position(|s| s.phase == Phase::Free) {
                let generation = st.next_generation;
                st.next_generation += 1;
                let s = &mut st.slots[index];
                s.phase = Phase::Building;
                s.generation = generation;
                s.deps.clear();
                s.waiters = 0;
                s.holds = 0;
                s.consumed = false;
                s.pending.clear();
                s.outstanding = 0;
                trace!("调度器: 创建图像 槽位={index}, 代数={generation}");
                return Ok(PictureId {
                    slot: index,
                    generation,
                });
            }
            st = self.freed.wait(st).map_err(|_| poisoned())?;
        }
    }

    /// 声明 `id` 依赖 `dep`; `dep` 已被回收时视为已满足
    pub fn add_dependency(&self, id: PictureId, dep: PictureId) -> TaoResult<()> {
        let mut st = self.lock()?;
        if st.slot(dep).is_none() {
            return Ok(());
        }
        st.slot_mut(id)?.deps.push(dep);
        st.slot_mut(dep)?.waiters += 1;
        Ok(())
    }

    pub fn add_slice(&self, id: PictureId, task: T) -> TaoResult<()> {
        let mut st = self.lock()?;
        st.slot_mut(id)?.pending.push_back(task);
        Ok(())
    }

    /// 图像的全部条带已加入, 开始参与分发
    pub fn submit(&self, id: PictureId) -> TaoResult<()> {
        let mut st = self.lock()?;
        let slot = st.slot_mut(id)?;
        slot.phase = Phase::Queued;
        if slot.pending.is_empty() && st.deps_done(id) {
            st.complete(id);
            self.output.notify_all();
            self.freed.notify_all();
        } else {
            // 无条带但依赖未完成的图像同样排队, 由工作线程在依赖完成后结束
            st.ready.push_back(id);
        }
        self.work.notify_all();
        Ok(())
    }

    /// 工作线程取任务; 调度器终止后返回 None
    pub fn get_task(&self) -> Option<(PictureId, T)> {
        let mut st = self.state.lock().ok()?;
        loop {
            if st.killed {
                return None;
            }
            if let Some(&front) = st.ready.front() {
                if st.deps_done(front) {
                    let task = st.slot_mut(front).ok().and_then(|s| {
                        let task = s.pending.pop_front();
                        if task.is_some() {
                            s.outstanding += 1;
                        }
                        task
                    });
                    let drained = st.slot(front).is_none_or(|s| s.pending.is_empty());
                    if drained {
                        st.ready.pop_front();
                        let idle = st
                            .slot(front)
                            .is_some_and(|s| s.phase == Phase::Queued && s.outstanding == 0);
                        if task.is_none() && idle {
                            st.complete(front);
                            self.output.notify_all();
                            self.freed.notify_all();
                        }
                        self.work.notify_all();
                    }
                    if let Some(task) = task {
                        return Some((front, task));
                    }
                    continue;
                }
            }
            st = self.work.wait(st).ok()?;
        }
    }

    /// 工作线程完成一个任务
    pub fn done(&self, id: PictureId) -> TaoResult<()> {
        let mut st = self.lock()?;
        let slot = st.slot_mut(id)?;
        slot.outstanding = slot.outstanding.saturating_sub(1);
        if slot.outstanding == 0 && slot.pending.is_empty() && slot.phase == Phase::Queued {
            trace!("调度器: 图像完成 槽位={}", id.slot);
            st.complete(id);
            self.work.notify_all();
            self.output.notify_all();
            self.freed.notify_all();
        }
        Ok(())
    }

    /// 把图像加入输出队列
    pub fn enqueue_output(&self, id: PictureId) -> TaoResult<()> {
        let mut st = self.lock()?;
        st.slot_mut(id)?;
        st.output.push_back(id);
        self.output.notify_all();
        Ok(())
    }

    /// 输出线程按入队顺序取已完成的图像; 终止且队列排空后返回 None
    pub fn get_decoded(&self) -> Option<(PictureId, P)> {
        let mut st = self.state.lock().ok()?;
        loop {
            if let Some(&front) = st.output.front() {
                let ready = st
                    .slot(front)
                    .map(|s| (s.phase == Phase::Done).then(|| s.payload.clone()));
                match ready {
                    Some(Some(payload)) => {
                        st.output.pop_front();
                        return Some((front, payload));
                    }
                    None => {
                        st.output.pop_front();
                        continue;
                    }
                    Some(None) if st.killed => return None,
                    Some(None) => {}
                }
            } else if st.killed {
                return None;
            }
            st = self.output.wait(st).ok()?;
        }
    }

    /// 输出端消费完毕
    pub fn release(&self, id: PictureId) -> TaoResult<()> {
        let mut st = self.lock()?;
        st.slot_mut(id)?.consumed = true;
        if st.try_free(id.slot) {
            self.freed.notify_all();
        }
        Ok(())
    }

    /// 参考窗口保留图像
    pub fn hold(&self, id: PictureId) -> TaoResult<()> {
        self.lock()?.slot_mut(id)?.holds += 1;
        Ok(())
    }

    pub fn unhold(&self, id: PictureId) -> TaoResult<()> {
        let mut st = self.lock()?;
        let slot = st.slot_mut(id)?;
        slot.holds = slot.holds.saturating_sub(1);
        if st.try_free(id.slot) {
            self.freed.notify_all();
        }
        Ok(())
    }

    pub fn payload(&self, id: PictureId) -> TaoResult<P> {
        Ok(self.lock()?.slot_mut(id)?.payload.clone())
    }

    /// 交换两个槽位的负载 (场对共用一帧)
    pub fn swap_payloads(&self, a: PictureId, b: PictureId) -> TaoResult<()> {
        let mut st = self.lock()?;
        st.slot_mut(a)?;
        st.slot_mut(b)?;
        if a.slot != b.slot {
            let (lo, hi) = (a.slot.min(b.slot), a.slot.max(b.slot));
            let (left, right) = st.slots.split_at_mut(hi);
            std::mem::swap(&mut left[lo].payload, &mut right[0].payload);
        }
        Ok(())
    }

    /// 阻塞直到所有槽位都已回收
    pub fn flush(&self) -> TaoResult<()> {
        let mut st = self.lock()?;
        while !st.all_free() && !st.killed {
            st = self.freed.wait(st).map_err(|_| poisoned())?;
        }
        Ok(())
    }

    /// 排空后终止: 唤醒所有阻塞的调用者
    pub fn kill(&self) -> TaoResult<()> {
        self.flush()?;
        self.abort();
        Ok(())
    }

    /// 立即终止, 不等待未完成的图像
    pub fn abort(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.killed = true;
        }
        self.work.notify_all();
        self.output.notify_all();
        self.freed.notify_all();
    }
}
