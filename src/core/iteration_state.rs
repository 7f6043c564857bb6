//! 批处理迭代状态
//!
//! 按目录记录当前的索引、图片总数和处理状态, 在多次执行之间保持。
//! 状态只保存在内存中, ComfyUI 重启后重置。

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockWriteGuard},
};

use lazy_static::lazy_static;
use log::{debug, info};
use strum_macros::{Display, EnumString};

use crate::{core::utils::directory::normalize_path, error::Error};

lazy_static! {
    /// 全局迭代状态, 生命周期与宿主进程一致
    static ref ITERATION_STORE: IterationStore = IterationStore::default();
}

/// 获取全局迭代状态
pub fn iteration_store() -> &'static IterationStore {
    &ITERATION_STORE
}

/// 迭代状态
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum IterationStatus {
    #[default]
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "processing")]
    Processing,
    #[strum(to_string = "completed")]
    Completed,
}

/// 单个目录的迭代记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    pub index: usize,
    pub total_count: usize,
    pub directory: String,
    pub status: IterationStatus,
}

impl IterationRecord {
    fn new(directory: String) -> Self {
        Self {
            index: 0,
            total_count: 0,
            directory,
            status: IterationStatus::Idle,
        }
    }

    /// 保证 0 <= index < max(total_count, 1)
    fn fit_index(&mut self) {
        if self.index >= self.total_count.max(1) {
            self.index = 0;
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<PathBuf, IterationRecord>,
    last_directory: Option<PathBuf>,
}

impl StoreInner {
    fn record_mut(&mut self, key: &Path) -> &mut IterationRecord {
        self.records
            .entry(key.to_path_buf())
            .or_insert_with(|| IterationRecord::new(key.to_string_lossy().to_string()))
    }
}

/// 迭代状态存储
///
/// 以规范化后的目录路径为键
#[derive(Debug, Default)]
pub struct IterationStore {
    inner: RwLock<StoreInner>,
}

impl IterationStore {
    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, Error> {
        self.inner
            .write()
            .map_err(|e| Error::LockError(e.to_string()))
    }

    /// 获取目录的状态快照, 首次访问时初始化
    pub fn get_state(&self, directory: &str) -> Result<IterationRecord, Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;
        Ok(inner.record_mut(&key).clone())
    }

    /// 重置索引与状态, 保留图片总数
    pub fn reset(&self, directory: &str) -> Result<(), Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;
        let record = inner.record_mut(&key);
        record.index = 0;
        record.status = IterationStatus::Idle;
        info!("iteration reset: {}", record.directory);
        Ok(())
    }

    /// 索引加一, 到达末尾时回到 0
    pub fn advance(&self, directory: &str) -> Result<usize, Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;
        let record = inner.record_mut(&key);
        record.index += 1;
        if record.index >= record.total_count {
            record.index = 0;
        }
        Ok(record.index)
    }

    /// 批次结束后索引回到 0, 不修改状态
    pub fn wrap_index(&self, directory: &str) -> Result<(), Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;
        inner.record_mut(&key).index = 0;
        Ok(())
    }

    /// 设置图片总数, 索引越界时回到 0
    pub fn set_total_count(&self, directory: &str, total_count: usize) -> Result<(), Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;
        let record = inner.record_mut(&key);
        record.total_count = total_count;
        record.fit_index();
        Ok(())
    }

    /// 设置索引, 越界时回到 0
    pub fn set_index(&self, directory: &str, index: usize) -> Result<(), Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;
        let record = inner.record_mut(&key);
        record.index = index;
        record.fit_index();
        Ok(())
    }

    pub fn set_status(&self, directory: &str, status: IterationStatus) -> Result<(), Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;
        inner.record_mut(&key).status = status;
        Ok(())
    }

    pub fn is_complete(&self, directory: &str) -> Result<bool, Error> {
        Ok(self.get_state(directory)?.status == IterationStatus::Completed)
    }

    /// 比较两个目录规范化后是否不同
    ///
    /// 没有上一次的目录时视为未变化
    pub fn check_directory_change(current: &str, previous: Option<&str>) -> bool {
        match previous {
            Some(previous) => normalize_path(current) != normalize_path(previous),
            None => false,
        }
    }

    /// 记录本次使用的目录
    ///
    /// 与上一次的目录不同时完全重置该目录的状态, 返回是否发生变化
    pub fn observe_directory(&self, directory: &str) -> Result<bool, Error> {
        let key = normalize_path(directory);
        let mut inner = self.write()?;

        let changed = matches!(&inner.last_directory, Some(last) if *last != key);
        if changed {
            debug!(
                "directory changed: {:?} -> {}",
                inner.last_directory,
                key.display()
            );
            inner.records.insert(
                key.clone(),
                IterationRecord::new(key.to_string_lossy().to_string()),
            );
        }
        inner.last_directory = Some(key);

        Ok(changed)
    }

    /// 清空所有状态
    pub fn clear_all(&self) -> Result<(), Error> {
        let mut inner = self.write()?;
        inner.records.clear();
        inner.last_directory = None;
        Ok(())
    }
}
