/// Local mirror of the exchange's request budget: `10000 + cum_vlm -
/// n_requests`. Not authoritative — resynced from the exchange at startup
/// and during reconciliation.
#[derive(Debug, Clone)]
pub struct RateLimitBudget {
    pub cum_vlm: f64,
    pub n_requests: u64,
    safety_margin: i64,
}

const INITIAL_BUDGET: i64 = 10_000;
const DEFAULT_SAFETY_MARGIN: i64 = 500;

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitBudget {
    pub fn new() -> Self {
        Self {
            cum_vlm: 0.0,
            n_requests: 0,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn with_safety_margin(safety_margin: i64) -> Self {
        Self {
            safety_margin,
            ..Self::new()
        }
    }

    fn budget(&self) -> i64 {
        INITIAL_BUDGET + self.cum_vlm as i64 - self.n_requests as i64
    }

    pub fn remaining(&self) -> i64 {
        self.budget().max(0)
    }

    pub fn ratio(&self) -> f64 {
        self.cum_vlm / (self.n_requests.max(1) as f64)
    }

    pub fn is_healthy(&self) -> bool {
        self.ratio() >= 1.0
    }

    pub fn is_emergency(&self) -> bool {
        self.remaining() < self.safety_margin
    }

    pub fn on_request(&mut self, n: u64) {
        self.n_requests += n;
    }

    pub fn on_fill(&mut self, volume_usd: f64) {
        self.cum_vlm += volume_usd;
    }

    pub fn sync_from_exchange(&mut self, cum_vlm: f64, n_requests: u64) {
        self.cum_vlm = cum_vlm;
        self.n_requests = n_requests;
    }

    pub fn log_status(&self) -> String {
        format!(
            "ratio={:.2} budget={} vol={:.2} reqs={}",
            self.ratio(),
            self.remaining(),
            self.cum_vlm,
            self.n_requests
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_instance_has_full_budget() {
        let rl = RateLimitBudget::new();
        assert_eq!(rl.remaining(), 10_000);
    }

    #[test]
    fn budget_decreases_with_requests() {
        let mut rl = RateLimitBudget::new();
        for _ in 0..5 {
            rl.on_request(1);
        }
        assert_eq!(rl.remaining(), 9_995);
    }

    #[test]
    fn budget_increases_with_fills() {
        let mut rl = RateLimitBudget::new();
        rl.on_request(100);
        let before = rl.remaining();
        rl.on_fill(100.0);
        assert_eq!(rl.remaining(), before + 100);
    }

    #[test]
    fn budget_floor_clamps_to_zero() {
        let mut rl = RateLimitBudget::new();
        rl.on_request(20_000);
        assert_eq!(rl.remaining(), 0);
    }

    #[test]
    fn ratio_zero_requests() {
        let rl = RateLimitBudget::new();
        assert_eq!(rl.ratio(), 0.0);
    }

    #[test]
    fn ratio_healthy_and_unhealthy() {
        let mut rl = RateLimitBudget::new();
        rl.sync_from_exchange(1000.0, 800);
        assert_eq!(rl.ratio(), 1.25);
        assert!(rl.is_healthy());

        rl.sync_from_exchange(500.0, 800);
        assert!((rl.ratio() - 0.625).abs() < 1e-9);
        assert!(!rl.is_healthy());
    }

    #[test]
    fn sync_from_exchange_overwrites() {
        let mut rl = RateLimitBudget::new();
        rl.sync_from_exchange(500.0, 400);
        rl.sync_from_exchange(600.0, 450);
        assert_eq!(rl.cum_vlm, 600.0);
        assert_eq!(rl.n_requests, 450);
    }

    #[test]
    fn is_emergency_crosses_default_margin() {
        let mut rl = RateLimitBudget::new();
        assert!(!rl.is_emergency());
        rl.on_request(9_800); // budget = 200, below default margin of 500
        assert!(rl.is_emergency());
    }

    #[test]
    fn is_emergency_custom_margin() {
        let mut rl = RateLimitBudget::with_safety_margin(50);
        rl.on_request(9_960); // budget = 40, below custom margin of 50
        assert!(rl.is_emergency());
    }

    #[test]
    fn log_status_contains_expected_fields() {
        let mut rl = RateLimitBudget::new();
        rl.sync_from_exchange(583479.0, 522489);
        let status = rl.log_status();
        assert!(status.contains("ratio="));
        assert!(status.contains("budget="));
        assert!(status.contains("vol="));
        assert!(status.contains("reqs=522489"));
        assert!(status.contains("ratio=1.12"));
    }
}
