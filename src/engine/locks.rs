// ==========================================
// 物料库存预留系统 - 键控互斥锁注册表
// ==========================================
// 职责: 为每个键（库存批次 / 项目）提供一把异步互斥锁
// 约束: 同一键的所有读-检查-写必须在持锁期间完成
// 回收: 注册表增长到阈值时清理无人持有/等待的条目
// ==========================================

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const MIN_PRUNE_THRESHOLD: usize = 256;

struct Registry<K> {
    locks: HashMap<K, Arc<AsyncMutex<()>>>,
    // 条目数达到该值时触发清理
    prune_at: usize,
    prune_floor: usize,
}

/// 键控锁注册表
///
/// 锁条目按需创建。Arc 强引用计数为 1 的条目只被注册表引用，
/// 既无持有者也无等待者，可安全移除；下次获取时重新创建。
pub struct KeyedLocks<K> {
    entries: Mutex<Registry<K>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_prune_threshold(MIN_PRUNE_THRESHOLD)
    }

    fn with_prune_threshold(threshold: usize) -> Self {
        Self {
            entries: Mutex::new(Registry {
                locks: HashMap::new(),
                prune_at: threshold,
                prune_floor: threshold,
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry<K>> {
        // 注册表内部操作不会 panic，中毒时直接接管内部数据
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 取得（必要时创建）某键对应的锁
    fn entry(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut registry = self.registry();

        if !registry.locks.contains_key(key) && registry.locks.len() >= registry.prune_at {
            registry.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            // 阈值随存活条目翻倍，清理成本均摊到每次插入
            registry.prune_at = (registry.locks.len() * 2).max(registry.prune_floor);
        }

        registry
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 等待并获取某键的独占锁
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// 已登记的键数量
    pub fn len(&self) -> usize {
        self.registry().locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
