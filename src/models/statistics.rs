// src/models/statistics.rs

use serde::Serialize;
use uuid::Uuid;

/// Aggregate metrics over a set of attempts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSummary {
    pub total_attempts: usize,
    pub best_score: Option<i32>,
    pub average_score: Option<f64>,
    pub best_percentage: Option<f64>,
    pub average_percentage: Option<f64>,
    pub total_time_minutes: i64,
    pub average_time_minutes: Option<f64>,
    pub favorite_simulation: Option<Uuid>,

    /// Mean of the 5 newest percentages minus mean of the 5 before them.
    /// Positive means improving.
    pub recent_trend: Option<f64>,

    pub performance_distribution: PerformanceDistribution,

    /// Oldest month first, ending at the current month.
    pub monthly_progress: Vec<MonthlyProgress>,

    /// Sorted by attempt count, descending.
    pub simulation_breakdown: Vec<SimulationBreakdown>,
}

/// Attempt counts per percentage bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceDistribution {
    /// >= 90
    pub excellent: usize,
    /// 70..90
    pub good: usize,
    /// 50..70
    pub average: usize,
    /// < 50
    pub poor: usize,
}

impl PerformanceDistribution {
    pub fn total(&self) -> usize {
        self.excellent + self.good + self.average + self.poor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyProgress {
    /// `YYYY-MM`
    pub month: String,
    pub attempts: usize,
    pub average_percentage: f64,
    pub best_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationBreakdown {
    pub simulation_id: Uuid,
    pub attempts: usize,
    pub best_percentage: f64,
    pub average_percentage: f64,
    /// Latest `completed_at` of this simulation, epoch milliseconds.
    pub last_attempt_at: i64,
}
