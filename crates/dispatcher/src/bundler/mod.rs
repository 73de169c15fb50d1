mod autotuned;
mod fixed;
mod rl;

pub use autotuned::AutoTunedBundler;
pub use fixed::FixedBundler;
pub use rl::RlBundler;

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use taskgrid_core::{BundlerConfig, GridError, GridResult};

/// 负载均衡策略：为节点通道计算下一轮的任务束大小
///
/// 每个节点通道持有自己的策略实例；`clone_strategy` 产生配置相同但
/// 统计清零的独立副本，通道之间绝不共享可变状态。反馈只在一次完整
/// 往返（派发到结果回执）之后应用，故障或超时的束不参与统计。
pub trait Bundler: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// 当前计算出的束大小
    fn bundle_size(&self) -> usize;

    /// 一次完整往返的反馈
    fn feedback(&mut self, completed: usize, elapsed: Duration);

    /// 节点握手后报告的执行线程数，按线程数取束的算法使用
    fn set_thread_count(&mut self, _threads: usize) {}

    /// 产生配置相同、统计清零的独立副本
    fn clone_strategy(&self) -> Box<dyn Bundler>;
}

/// 算法参数表：扁平的字符串键值对
#[derive(Debug, Clone, Default)]
pub struct BundlerProfile {
    params: HashMap<String, String>,
}

impl BundlerProfile {
    pub fn new(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get_parsed(key, default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get_parsed(key, default)
    }

    fn get_parsed<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.params.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("参数 '{}' 的值 '{}' 无法解析，使用默认值", key, raw);
                default
            }),
        }
    }
}

impl From<&BundlerConfig> for BundlerProfile {
    fn from(config: &BundlerConfig) -> Self {
        Self::new(config.profile.clone())
    }
}

/// 策略工厂：按参数表与束大小上限构造策略实例
pub type BundlerFactory = fn(&BundlerProfile, usize) -> Box<dyn Bundler>;

/// 策略注册表：算法名到工厂的映射
///
/// 内置算法在构造时登记，运维方也可以注册自定义算法。创建出的策略
/// 由框架统一夹取到 `[1, max_bundle_size]`，算法返回的非法值不会
/// 成为派发错误。
pub struct BundlerRegistry {
    factories: HashMap<String, BundlerFactory>,
}

impl BundlerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("fixed", |profile, max| {
            Box::new(FixedBundler::from_profile(profile, max))
        });
        registry.register("autotuned", |profile, max| {
            Box::new(AutoTunedBundler::from_profile(profile, max))
        });
        registry.register("rl", |profile, max| {
            Box::new(RlBundler::from_profile(profile, max))
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: BundlerFactory) {
        debug!("注册负载均衡算法: {}", name);
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(
        &self,
        name: &str,
        profile: &BundlerProfile,
        max_bundle_size: usize,
    ) -> GridResult<Box<dyn Bundler>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| GridError::UnknownBundler(name.to_string()))?;
        Ok(Box::new(ClampedBundler {
            inner: factory(profile, max_bundle_size),
            max_bundle_size: max_bundle_size.max(1),
        }))
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for BundlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 框架级的束大小夹取
///
/// 算法返回 0 或超过上限的值时在此纠正，绝不向派发路径传播错误。
#[derive(Debug)]
struct ClampedBundler {
    inner: Box<dyn Bundler>,
    max_bundle_size: usize,
}

impl Bundler for ClampedBundler {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn bundle_size(&self) -> usize {
        let raw = self.inner.bundle_size();
        let clamped = raw.clamp(1, self.max_bundle_size);
        if clamped != raw {
            debug!(
                "算法 [{}] 给出越界束大小 {}，夹取为 {}",
                self.inner.name(),
                raw,
                clamped
            );
        }
        clamped
    }

    fn feedback(&mut self, completed: usize, elapsed: Duration) {
        if completed == 0 {
            return;
        }
        self.inner.feedback(completed, elapsed);
    }

    fn set_thread_count(&mut self, threads: usize) {
        self.inner.set_thread_count(threads);
    }

    fn clone_strategy(&self) -> Box<dyn Bundler> {
        Box::new(ClampedBundler {
            inner: self.inner.clone_strategy(),
            max_bundle_size: self.max_bundle_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(pairs: &[(&str, &str)]) -> BundlerProfile {
        BundlerProfile::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_registry_knows_builtins() {
        let registry = BundlerRegistry::new();
        for name in ["fixed", "autotuned", "rl"] {
            assert!(
                registry.create(name, &BundlerProfile::default(), 10).is_ok(),
                "内置算法 {} 应可创建",
                name
            );
        }
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let registry = BundlerRegistry::new();
        let err = registry
            .create("no-such", &BundlerProfile::default(), 10)
            .unwrap_err();
        assert!(matches!(err, GridError::UnknownBundler(_)));
    }

    #[test]
    fn test_profile_typed_getters() {
        let p = profile(&[("size", "8"), ("epsilon", "0.5"), ("bad", "x")]);
        assert_eq!(p.get_usize("size", 4), 8);
        assert_eq!(p.get_f64("epsilon", 0.1), 0.5);
        // 解析失败回退默认值
        assert_eq!(p.get_usize("bad", 7), 7);
        assert_eq!(p.get_usize("missing", 3), 3);
    }

    #[test]
    fn test_clamping_bounds_any_strategy() {
        let registry = BundlerRegistry::new();
        // size 大于上限
        let bundler = registry
            .create("fixed", &profile(&[("size", "1000")]), 16)
            .unwrap();
        assert_eq!(bundler.bundle_size(), 16);
        // size 为 0
        let bundler = registry
            .create("fixed", &profile(&[("size", "0")]), 16)
            .unwrap();
        assert_eq!(bundler.bundle_size(), 1);
    }

    #[test]
    fn test_bounds_hold_after_repeated_negative_feedback() {
        let registry = BundlerRegistry::new();
        for name in ["autotuned", "rl"] {
            let mut bundler = registry
                .create(name, &BundlerProfile::default(), 8)
                .unwrap();
            // 反复给出劣化反馈，束大小始终落在 [1, 8]
            for round in 0..200 {
                let size = bundler.bundle_size();
                assert!(
                    (1..=8).contains(&size),
                    "算法 {} 第 {} 轮给出越界束大小 {}",
                    name,
                    round,
                    size
                );
                bundler.feedback(size, Duration::from_millis(500 + round * 10));
            }
        }
    }

    #[test]
    fn test_clone_strategy_is_independent() {
        let registry = BundlerRegistry::new();
        let mut original = registry
            .create("autotuned", &BundlerProfile::default(), 32)
            .unwrap();
        for _ in 0..20 {
            let size = original.bundle_size();
            original.feedback(size, Duration::from_millis(10));
        }

        let clone = original.clone_strategy();
        // 副本带着同样的配置但统计清零，互不影响
        let clone_size = clone.bundle_size();
        assert!((1..=32).contains(&clone_size));
        drop(original);
        assert!((1..=32).contains(&clone.bundle_size()));
    }

    #[test]
    fn test_zero_completed_feedback_ignored() {
        let registry = BundlerRegistry::new();
        let mut bundler = registry
            .create("autotuned", &BundlerProfile::default(), 8)
            .unwrap();
        let before = bundler.bundle_size();
        for _ in 0..50 {
            bundler.feedback(0, Duration::from_millis(1));
        }
        assert_eq!(bundler.bundle_size(), before);
    }
}
