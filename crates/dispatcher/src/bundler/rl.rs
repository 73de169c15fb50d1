use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::{Bundler, BundlerProfile};

/// 尺寸调整动作：减小、保持、增大
const ACTIONS: [i64; 3] = [-1, 0, 1];

/// 强化学习取束
///
/// 把束大小的调整当作动作、吞吐量的变化当作回报：对每个动作维护
/// 增量平均的价值估计，以 ε-贪心在探索与利用之间权衡，探索率随
/// 轮次衰减到下限。每个通道持有独立的实例，档案不跨通道共享。
#[derive(Debug, Clone)]
pub struct RlBundler {
    size: usize,
    step: usize,
    max_bundle_size: usize,

    epsilon: f64,
    epsilon_decay: f64,
    epsilon_min: f64,

    /// 每个动作的价值估计与采样次数
    values: [f64; ACTIONS.len()],
    counts: [u64; ACTIONS.len()],
    last_action: usize,
    last_throughput: Option<f64>,
}

impl RlBundler {
    pub fn from_profile(profile: &BundlerProfile, max_bundle_size: usize) -> Self {
        Self {
            size: profile.get_usize("size", 4),
            step: profile.get_usize("step", 1).max(1),
            max_bundle_size,
            epsilon: profile.get_f64("epsilon", 0.2),
            epsilon_decay: profile.get_f64("epsilon_decay", 0.99),
            epsilon_min: profile.get_f64("epsilon_min", 0.05),
            values: [0.0; ACTIONS.len()],
            counts: [0; ACTIONS.len()],
            // 初始动作为保持不动
            last_action: 1,
            last_throughput: None,
        }
    }

    fn choose_action(&self) -> usize {
        let mut rng = rand::rng();
        if rng.random::<f64>() < self.epsilon {
            rng.random_range(0..ACTIONS.len())
        } else {
            // 价值并列时取第一个，行为确定
            let mut best = 0;
            for i in 1..ACTIONS.len() {
                if self.values[i] > self.values[best] {
                    best = i;
                }
            }
            best
        }
    }

    fn apply_action(&mut self, action: usize) {
        let next = self.size as i64 + ACTIONS[action] * self.step as i64;
        self.size = next.clamp(1, self.max_bundle_size as i64) as usize;
    }
}

impl Bundler for RlBundler {
    fn name(&self) -> &'static str {
        "rl"
    }

    fn bundle_size(&self) -> usize {
        self.size
    }

    fn feedback(&mut self, completed: usize, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64().max(f64::EPSILON);
        let throughput = completed as f64 / seconds;

        // 回报是吞吐量相对上一轮的变化
        let reward = match self.last_throughput {
            Some(previous) => throughput - previous,
            None => 0.0,
        };
        self.last_throughput = Some(throughput);

        let action = self.last_action;
        self.counts[action] += 1;
        self.values[action] += (reward - self.values[action]) / self.counts[action] as f64;

        let next_action = self.choose_action();
        self.apply_action(next_action);
        self.last_action = next_action;

        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_min);
        debug!(
            "rl: 吞吐 {:.2}, 回报 {:+.3}, 动作 {:+}, 束大小 {}, ε {:.3}",
            throughput, reward, ACTIONS[next_action], self.size, self.epsilon
        );
    }

    fn clone_strategy(&self) -> Box<dyn Bundler> {
        Box::new(Self {
            size: self.size,
            step: self.step,
            max_bundle_size: self.max_bundle_size,
            epsilon: self.epsilon,
            epsilon_decay: self.epsilon_decay,
            epsilon_min: self.epsilon_min,
            values: [0.0; ACTIONS.len()],
            counts: [0; ACTIONS.len()],
            last_action: 1,
            last_throughput: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_stays_in_bounds_under_random_exploration() {
        let profile = BundlerProfile::new(
            [("epsilon", "1.0"), ("epsilon_min", "1.0")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        // 全程随机探索，束大小依然不越界
        let mut bundler = RlBundler::from_profile(&profile, 5);
        for i in 0..500u64 {
            let size = bundler.bundle_size();
            assert!((1..=5).contains(&size));
            bundler.feedback(size, Duration::from_millis(10 + (i % 7) * 3));
        }
    }

    #[test]
    fn test_epsilon_decays_to_floor() {
        let mut bundler = RlBundler::from_profile(&BundlerProfile::default(), 10);
        for _ in 0..1000 {
            let size = bundler.bundle_size();
            bundler.feedback(size, Duration::from_millis(10));
        }
        assert!((bundler.epsilon - bundler.epsilon_min).abs() < 1e-9);
    }

    #[test]
    fn test_clone_resets_learning_state() {
        let mut bundler = RlBundler::from_profile(&BundlerProfile::default(), 10);
        for _ in 0..50 {
            let size = bundler.bundle_size();
            bundler.feedback(size, Duration::from_millis(10));
        }

        let clone = bundler.clone_strategy();
        // 学习状态不跨通道传染
        assert!((1..=10).contains(&clone.bundle_size()));
    }
}
