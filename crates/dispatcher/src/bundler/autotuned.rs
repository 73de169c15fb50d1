use std::time::Duration;

use tracing::debug;

use super::{Bundler, BundlerProfile};

/// 自调优取束
///
/// 对每个束大小维护吞吐量（任务/秒）的滚动估计，攒够样本后与上一个
/// 尺寸的成绩比较：有改善就沿当前方向继续挪动，退步则掉头。
/// 始终只在局部小步搜索，寻找吞吐量的局部最优。
#[derive(Debug, Clone)]
pub struct AutoTunedBundler {
    size: usize,
    step: usize,
    samples_per_round: u32,
    max_bundle_size: usize,

    /// 当前尺寸下的吞吐量指数滑动平均
    throughput_ema: Option<f64>,
    samples: u32,
    /// 上一个尺寸定格时的吞吐量
    previous_throughput: Option<f64>,
    /// +1 增大，-1 减小
    direction: i64,
}

impl AutoTunedBundler {
    /// EMA 平滑系数
    const ALPHA: f64 = 0.5;
    /// 吞吐量至少要好这么多才算改善
    const IMPROVEMENT_MARGIN: f64 = 1.02;

    pub fn from_profile(profile: &BundlerProfile, max_bundle_size: usize) -> Self {
        Self {
            size: profile.get_usize("size", 4),
            step: profile.get_usize("step", 1).max(1),
            samples_per_round: profile.get_usize("samples", 3) as u32,
            max_bundle_size,
            throughput_ema: None,
            samples: 0,
            previous_throughput: None,
            direction: 1,
        }
    }

    fn apply_move(&mut self) {
        let next = self.size as i64 + self.direction * self.step as i64;
        self.size = next.clamp(1, self.max_bundle_size as i64) as usize;
    }
}

impl Bundler for AutoTunedBundler {
    fn name(&self) -> &'static str {
        "autotuned"
    }

    fn bundle_size(&self) -> usize {
        self.size
    }

    fn feedback(&mut self, completed: usize, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64().max(f64::EPSILON);
        let throughput = completed as f64 / seconds;

        self.throughput_ema = Some(match self.throughput_ema {
            None => throughput,
            Some(ema) => Self::ALPHA * throughput + (1.0 - Self::ALPHA) * ema,
        });
        self.samples += 1;
        if self.samples < self.samples_per_round {
            return;
        }

        let current = self.throughput_ema.take().expect("本轮至少有一个样本");
        self.samples = 0;

        match self.previous_throughput {
            None => {
                // 第一轮没有比较对象，先朝增大方向试探
                self.apply_move();
            }
            Some(previous) => {
                if current > previous * Self::IMPROVEMENT_MARGIN {
                    self.apply_move();
                } else if current * Self::IMPROVEMENT_MARGIN < previous {
                    self.direction = -self.direction;
                    self.apply_move();
                }
                // 吞吐量基本持平则停在当前尺寸
            }
        }
        self.previous_throughput = Some(current);
        debug!(
            "自调优: 吞吐 {:.2} 任务/秒, 新束大小 {}",
            current, self.size
        );
    }

    fn clone_strategy(&self) -> Box<dyn Bundler> {
        Box::new(Self {
            size: self.size,
            step: self.step,
            samples_per_round: self.samples_per_round,
            max_bundle_size: self.max_bundle_size,
            throughput_ema: None,
            samples: 0,
            previous_throughput: None,
            direction: 1,
        })
    }
}
