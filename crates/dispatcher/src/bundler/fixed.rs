use std::time::Duration;

use super::{Bundler, BundlerProfile};

/// 固定/按线程数取束
///
/// 节点报告线程数之前使用配置的固定大小；握手之后束大小为
/// 线程数乘以系数。没有反馈回路。
#[derive(Debug, Clone)]
pub struct FixedBundler {
    size: usize,
    threads_multiplier: usize,
    thread_count: Option<usize>,
}

impl FixedBundler {
    pub fn from_profile(profile: &BundlerProfile, _max_bundle_size: usize) -> Self {
        Self {
            size: profile.get_usize("size", 4),
            threads_multiplier: profile.get_usize("threads_multiplier", 1),
            thread_count: None,
        }
    }
}

impl Bundler for FixedBundler {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn bundle_size(&self) -> usize {
        match self.thread_count {
            Some(threads) => threads * self.threads_multiplier,
            None => self.size,
        }
    }

    fn feedback(&mut self, _completed: usize, _elapsed: Duration) {}

    fn set_thread_count(&mut self, threads: usize) {
        self.thread_count = Some(threads);
    }

    fn clone_strategy(&self) -> Box<dyn Bundler> {
        Box::new(Self {
            size: self.size,
            threads_multiplier: self.threads_multiplier,
            thread_count: None,
        })
    }
}
