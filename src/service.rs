use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use ndarray::Array1;
use rayon::prelude::*;
use serde::Serialize;

use crate::cache::{FeatureCache, validate};
use crate::config::{ConfDir, SearchOptions, SnapshotPolicy};
use crate::error::{Error, Result};
use crate::extractor::FeatureExtractor;
use crate::index::{Neighbor, SharedSnapshot, Snapshot};
use crate::metrics;
use crate::model::{ImageId, ImageRecord};
use crate::store::ImageStore;

/// 一条检索结果
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub id: ImageId,
    /// 原图路径
    pub path: String,
    pub distance: f32,
    pub score: f32,
}

/// 一次查询的结果
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// 查询图片本身入库后的记录
    pub query: ImageRecord,
    /// 按距离升序排列的结果，至多 k 个
    pub results: Vec<Match>,
    /// 精简结果，即 `results` 的前若干个
    pub summary: Vec<Match>,
}

/// 补充计算特征的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// 缺少特征的图片数量
    pub scanned: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// 检索服务，串联图片存储、特征缓存与相似度索引
///
/// 自身不持有持久状态，可以通过 `Arc` 在多个线程间共享。
pub struct SearchService {
    store: ImageStore,
    cache: FeatureCache,
    extractor: Arc<dyn FeatureExtractor>,
    snapshot: SharedSnapshot,
    options: SearchOptions,
}

impl SearchService {
    /// 打开数据目录，不存在的子目录会被创建
    ///
    /// 特征提取器的维度必须与图库中已有特征的维度一致。
    pub fn open(
        conf_dir: &ConfDir,
        extractor: Arc<dyn FeatureExtractor>,
        options: SearchOptions,
    ) -> Result<Self> {
        info!("打开图库: {}", conf_dir.path().display());
        let cache = FeatureCache::open(conf_dir)?;
        if let Some(dim) = cache.dim()? {
            if dim != extractor.dim() {
                return Err(Error::Embedding(format!(
                    "特征提取器的维度 {} 与图库的特征维度 {} 不一致",
                    extractor.dim(),
                    dim
                )));
            }
        }
        Ok(Self {
            store: ImageStore::open(conf_dir)?,
            cache,
            extractor,
            snapshot: SharedSnapshot::new(),
            options,
        })
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn cache(&self) -> &FeatureCache {
        &self.cache
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// 添加一张图片并缓存其特征，完成后即可被后续查询检索到
    ///
    /// 特征提取失败时图片已经保存，可以通过 [`Self::refresh`] 补充。
    pub fn ingest(&self, bytes: &[u8]) -> Result<ImageRecord> {
        let stored = self.store.store(bytes)?;
        metrics::inc_ingest_count();
        let written =
            self.cache.ensure_cached(&stored.record.id, &stored.resized, self.extractor.as_ref())?;
        if written {
            self.snapshot.invalidate();
        }
        info!("添加图片 {}", stored.record.id);
        Ok(stored.record)
    }

    /// 使用默认的 k 查询相似图片
    pub fn query(&self, bytes: &[u8]) -> Result<QueryResult> {
        self.query_k(bytes, self.options.k)
    }

    /// 查询与 `bytes` 最相似的至多 `k` 张图片
    ///
    /// 查询图片本身也会入库，但快照在缓存其特征之前获取，因此不会匹配到自己。
    pub fn query_k(&self, bytes: &[u8], k: usize) -> Result<QueryResult> {
        let start = Instant::now();
        let stored = self.store.store(bytes)?;
        metrics::inc_ingest_count();
        let id = stored.record.id;

        let embedding = self
            .extractor
            .extract(&stored.resized)
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        validate(&embedding, Some(self.extractor.dim()))?;

        let snapshot = self.snapshot()?;
        let neighbors = if snapshot.is_empty() {
            debug!("图库为空，跳过排序");
            vec![]
        } else {
            if snapshot.dim() != Some(embedding.len()) {
                return Err(Error::Embedding(format!(
                    "查询特征维度 {} 与图库特征维度 {:?} 不一致",
                    embedding.len(),
                    snapshot.dim()
                )));
            }
            snapshot.rank(embedding.view(), k)
        };

        self.cache_embedding(&id, embedding)?;

        let results = neighbors.iter().map(|n| self.to_match(n)).collect::<Vec<_>>();
        let summary = results.iter().take(self.options.summary).cloned().collect();

        let size = stored.original_size;
        let elapsed = start.elapsed().as_secs_f32();
        metrics::inc_query_duration(size, elapsed);
        if let Some(best) = results.first() {
            metrics::inc_query_max_score(size, best.score);
        }
        info!("查询 {} 完成，{} 个结果，耗时 {:.3}s", id, results.len(), elapsed);

        Ok(QueryResult { query: stored.record, results, summary })
    }

    /// 为所有缺少特征的已保存图片补充计算特征
    ///
    /// 单张图片失败不会中断整个过程，只记录日志并计数。
    pub fn refresh(&self) -> Result<RefreshReport> {
        let missing = self
            .store
            .list_resized()?
            .into_iter()
            .filter(|id| !self.cache.contains(id))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok(RefreshReport::default());
        }
        info!("{} 张图片缺少特征，开始补充", missing.len());

        let results = missing
            .par_iter()
            .map(|id| {
                let r = self.store.load_resized(id).and_then(|image| {
                    self.cache.ensure_cached(id, &image, self.extractor.as_ref())
                });
                if let Err(e) = &r {
                    warn!("补充特征失败 {}: {}", id, e);
                }
                r
            })
            .collect::<Vec<_>>();

        let report = RefreshReport {
            scanned: missing.len(),
            embedded: results.iter().filter(|r| matches!(r, Ok(true))).count(),
            failed: results.iter().filter(|r| r.is_err()).count(),
        };
        if report.embedded > 0 {
            self.snapshot.invalidate();
        }
        info!("补充完成: {:?}", report);
        Ok(report)
    }

    /// 按照当前策略获取特征快照
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let snapshot = match self.options.snapshot {
            SnapshotPolicy::Rescan => Arc::new(self.build_snapshot()?),
            SnapshotPolicy::Invalidate => self.snapshot.get_or_rebuild(|| self.build_snapshot())?,
        };
        metrics::set_corpus_size(snapshot.len());
        Ok(snapshot)
    }

    fn build_snapshot(&self) -> Result<Snapshot> {
        let start = Instant::now();
        let snapshot = Snapshot::from_entries(self.cache.load_all()?)?;
        debug!("构建快照: {} 个特征，耗时 {:?}", snapshot.len(), start.elapsed());
        Ok(snapshot)
    }

    fn cache_embedding(&self, id: &ImageId, embedding: Array1<f32>) -> Result<()> {
        if self.cache.ensure_with(id, Some(self.extractor.dim()), || Ok(embedding))? {
            self.snapshot.invalidate();
        }
        Ok(())
    }

    fn to_match(&self, neighbor: &Neighbor) -> Match {
        Match {
            id: neighbor.id,
            path: self.store.original_path(&neighbor.id).display().to_string(),
            distance: neighbor.distance,
            score: neighbor.score,
        }
    }
}
