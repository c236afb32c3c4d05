use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use ndarray::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{EmbeddingEntry, ImageId};

/// 排序结果中的一项
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: ImageId,
    /// 与查询向量的 L2 距离
    pub distance: f32,
    /// 展示用评分，见 [`score`]
    pub score: f32,
}

/// 由 L2 距离换算的展示评分：`(1 - distance) * 100`
///
/// 距离没有上界，因此评分可能为负数，不是相似度百分比。
/// 唯一可以依赖的性质是距离越小评分越高。
pub fn score(distance: f32) -> f32 {
    (1.0 - distance) * 100.0
}

/// 某一时刻全部缓存特征的只读快照，第 i 行对应 `ids[i]`
#[derive(Debug, Clone)]
pub struct Snapshot {
    features: Array2<f32>,
    ids: Vec<ImageId>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self { features: Array2::zeros((0, 0)), ids: vec![] }
    }

    /// 从缓存条目构建快照，所有条目的维度必须一致
    pub fn from_entries(entries: Vec<EmbeddingEntry>) -> Result<Self> {
        let Some(first) = entries.first() else {
            return Ok(Self::empty());
        };
        let dim = first.vector.len();
        let mut features = Array2::zeros((entries.len(), dim));
        let mut ids = Vec::with_capacity(entries.len());
        for (mut row, entry) in features.outer_iter_mut().zip(entries) {
            if entry.vector.len() != dim {
                return Err(Error::DimensionMismatch {
                    id: entry.id,
                    expected: dim,
                    actual: entry.vector.len(),
                });
            }
            row.assign(&entry.vector);
            ids.push(entry.id);
        }
        Ok(Self { features, ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 特征维度，快照为空时返回 `None`
    pub fn dim(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.features.ncols())
    }

    pub fn ids(&self) -> &[ImageId] {
        &self.ids
    }

    /// 返回距离 `query` 最近的至多 `k` 个结果，按距离升序排列
    ///
    /// 距离相同时保持快照中的顺序。
    ///
    /// # Panics
    ///
    /// 快照非空且 `query` 的维度与快照不一致时 panic。
    pub fn rank(&self, query: ArrayView1<f32>, k: usize) -> Vec<Neighbor> {
        if self.is_empty() || k == 0 {
            return vec![];
        }
        assert_eq!(query.len(), self.features.ncols(), "query dimension mismatch");

        let distances = self.features.outer_iter().map(|row| l2(row, query)).collect::<Vec<_>>();

        let mut order = (0..distances.len()).collect::<Vec<_>>();
        // sort_by 是稳定排序
        order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
        order.truncate(k);

        order
            .into_iter()
            .map(|i| {
                let distance = distances[i];
                Neighbor { id: self.ids[i], distance, score: score(distance) }
            })
            .collect()
    }
}

fn l2(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// 进程内共享的快照
///
/// 单写多读：写入新特征后调用 [`SharedSnapshot::invalidate`]，
/// 下一次读取时在写锁内重建。
#[derive(Debug, Default)]
pub struct SharedSnapshot {
    current: RwLock<Option<Arc<Snapshot>>>,
    stale: AtomicBool,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// 获取当前快照，过期或尚未构建时调用 `rebuild` 重新构建
    pub fn get_or_rebuild<F>(&self, rebuild: F) -> Result<Arc<Snapshot>>
    where
        F: FnOnce() -> Result<Snapshot>,
    {
        if !self.stale.load(Ordering::Acquire) {
            let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = current.as_ref() {
                return Ok(snapshot.clone());
            }
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // 先清除标记再重建，重建期间的写入会再次标记
        let stale = self.stale.swap(false, Ordering::AcqRel);
        match current.as_ref() {
            Some(snapshot) if !stale => Ok(snapshot.clone()),
            _ => match rebuild() {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    *current = Some(snapshot.clone());
                    Ok(snapshot)
                }
                Err(e) => {
                    self.stale.store(true, Ordering::Release);
                    Err(e)
                }
            },
        }
    }
}
