//! # 批量执行器
//!
//! 在固定大小的线程池中并行处理计算目录。
//!
//! ## 功能
//! - 基于 rayon 的并行迭代，输出顺序与输入一致
//! - 进度条显示当前完成的目录及成功 / 失败的累计数
//! - 成功 / 失败计数与失败详情
//!
//! ## 依赖关系
//! - 被 `analysis/defects_parser.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条
//! - 使用 `rayon` 进行并行计算

use crate::error::{DefectError, Result};
use crate::utils::progress;

use indicatif::ProgressBar;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 单个目录的处理结果
#[derive(Debug, Clone)]
pub enum ProcessResult<T> {
    /// 处理成功
    Success(T),
    /// 处理失败
    Failed(String, String), // (目录名, 错误信息)
}

/// 批量处理结果统计
#[derive(Debug)]
pub struct BatchResult<T> {
    /// 成功的输出，保持输入顺序
    pub outputs: Vec<T>,
    /// 失败详情
    pub failures: Vec<(String, String)>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        BatchResult {
            outputs: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    /// 合并处理结果
    pub fn merge(&mut self, result: ProcessResult<T>) {
        match result {
            ProcessResult::Success(output) => self.outputs.push(output),
            ProcessResult::Failed(item, err) => self.failures.push((item, err)),
        }
    }

    pub fn success(&self) -> usize {
        self.outputs.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// 总处理数量
    pub fn total(&self) -> usize {
        self.success() + self.failed()
    }
}

/// 批量执行器
pub struct BatchRunner {
    /// 并行作业数
    jobs: usize,
    /// 是否显示进度条
    show_progress: bool,
}

impl BatchRunner {
    /// 创建新的批量执行器，`jobs == 0` 时使用全部 CPU
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self {
            jobs,
            show_progress: true,
        }
    }

    /// 设置是否显示进度条
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// 默认作业数：max(1, CPU 数 - 1)，且不超过 (目录数 - 1)
    pub fn default_jobs(items: usize) -> usize {
        let cpus = num_cpus::get().saturating_sub(1).max(1);
        cpus.min(items.saturating_sub(1)).max(1)
    }

    /// 创建与本执行器设置一致的进度条
    pub fn progress_bar(&self, len: u64, message: &str) -> ProgressBar {
        if self.show_progress {
            progress::create_progress_bar(len, message)
        } else {
            ProgressBar::hidden()
        }
    }

    /// 并行处理目录列表
    ///
    /// `label` 给出进度条上显示的目录名。工作线程中的 panic 会在此处重新抛出。
    pub fn run<I, T, F, L>(
        &self,
        items: &[I],
        pb: &ProgressBar,
        label: L,
        processor: F,
    ) -> Result<BatchResult<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> ProcessResult<T> + Sync + Send,
        L: Fn(&I) -> String + Sync + Send,
    {
        let success_count = AtomicUsize::new(0);
        let failed_count = AtomicUsize::new(0);

        // 配置 rayon 线程池
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| DefectError::Other(format!("Failed to build thread pool: {}", e)))?;

        let results: Vec<ProcessResult<T>> = pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let result = processor(item);

                    match &result {
                        ProcessResult::Success(_) => {
                            success_count.fetch_add(1, Ordering::Relaxed);
                        }
                        ProcessResult::Failed(_, _) => {
                            failed_count.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    pb.set_message(format!(
                        "Parsing {} ({} parsed, {} failed)",
                        label(item),
                        success_count.load(Ordering::Relaxed),
                        failed_count.load(Ordering::Relaxed)
                    ));
                    pb.inc(1);
                    result
                })
                .collect()
        });

        // 汇总结果
        let mut batch_result = BatchResult::default();
        for result in results {
            batch_result.merge(result);
        }

        Ok(batch_result)
    }
}
