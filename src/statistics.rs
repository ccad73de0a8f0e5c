// src/statistics.rs

//! Summary statistics over a user's simulation attempts.
//!
//! Pure computation: callers filter the records (owner, date range,
//! simulation) and pass the current time so the monthly rollup is
//! reproducible.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::{
    config::{MONTHLY_WINDOW, TREND_MIN_ATTEMPTS, TREND_WINDOW},
    models::{
        attempt::{AttemptRecord, round2},
        statistics::{
            MonthlyProgress, PerformanceDistribution, SimulationBreakdown, StatisticsSummary,
        },
    },
};

/// Computes the summary for `records`. An empty slice yields the
/// empty-state summary (zeros, `None`, six empty months).
pub fn summarize(records: &[AttemptRecord], now: DateTime<Utc>) -> StatisticsSummary {
    let total_attempts = records.len();

    let best_score = records.iter().map(|r| r.score).max();
    let average_score = mean(records.iter().map(|r| f64::from(r.score))).map(round2);
    let best_percentage = records.iter().map(|r| r.percentage).reduce(f64::max);
    let average_percentage = mean(records.iter().map(|r| r.percentage)).map(round2);

    let timed: Vec<i64> = records
        .iter()
        .filter_map(|r| r.time_taken_minutes)
        .map(i64::from)
        .collect();
    let total_time_minutes: i64 = timed.iter().sum();
    let average_time_minutes = mean(timed.iter().map(|&t| t as f64)).map(round2);

    StatisticsSummary {
        total_attempts,
        best_score,
        average_score,
        best_percentage,
        average_percentage,
        total_time_minutes,
        average_time_minutes,
        favorite_simulation: favorite_simulation(records),
        recent_trend: recent_trend(records),
        performance_distribution: distribution(records),
        monthly_progress: monthly_progress(records, now),
        simulation_breakdown: simulation_breakdown(records),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Per-simulation counts in first-seen order.
fn counts_in_order(records: &[AttemptRecord]) -> Vec<(Uuid, usize)> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut counts: Vec<(Uuid, usize)> = Vec::new();
    for record in records {
        match index.get(&record.simulation_id) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(record.simulation_id, counts.len());
                counts.push((record.simulation_id, 1));
            }
        }
    }
    counts
}

/// Most attempted simulation; on a tie the one seen first wins.
fn favorite_simulation(records: &[AttemptRecord]) -> Option<Uuid> {
    let mut best: Option<(Uuid, usize)> = None;
    for (id, count) in counts_in_order(records) {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((id, count));
        }
    }
    best.map(|(id, _)| id)
}

fn recent_trend(records: &[AttemptRecord]) -> Option<f64> {
    if records.len() < TREND_MIN_ATTEMPTS {
        return None;
    }

    let mut newest_first: Vec<&AttemptRecord> = records.iter().collect();
    newest_first.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));

    let recent = mean(newest_first[..TREND_WINDOW].iter().map(|r| r.percentage))?;
    let previous = mean(
        newest_first[TREND_WINDOW..TREND_WINDOW * 2]
            .iter()
            .map(|r| r.percentage),
    )?;
    Some(round2(recent - previous))
}

fn distribution(records: &[AttemptRecord]) -> PerformanceDistribution {
    let mut dist = PerformanceDistribution::default();
    for record in records {
        match record.percentage {
            p if p >= 90.0 => dist.excellent += 1,
            p if p >= 70.0 => dist.good += 1,
            p if p >= 50.0 => dist.average += 1,
            _ => dist.poor += 1,
        }
    }
    dist
}

/// `(year, month)` shifted `back` calendar months into the past.
fn months_before(year: i32, month: u32, back: u32) -> (i32, u32) {
    let absolute = year * 12 + month as i32 - 1 - back as i32;
    (absolute.div_euclid(12), absolute.rem_euclid(12) as u32 + 1)
}

fn monthly_progress(records: &[AttemptRecord], now: DateTime<Utc>) -> Vec<MonthlyProgress> {
    (0..MONTHLY_WINDOW)
        .rev()
        .map(|back| {
            let (year, month) = months_before(now.year(), now.month(), back);
            let in_month: Vec<f64> = records
                .iter()
                .filter(|r| r.completed_at.year() == year && r.completed_at.month() == month)
                .map(|r| r.percentage)
                .collect();

            MonthlyProgress {
                month: format!("{year:04}-{month:02}"),
                attempts: in_month.len(),
                average_percentage: mean(in_month.iter().copied()).map(round2).unwrap_or(0.0),
                best_percentage: in_month.iter().copied().reduce(f64::max).unwrap_or(0.0),
            }
        })
        .collect()
}

fn simulation_breakdown(records: &[AttemptRecord]) -> Vec<SimulationBreakdown> {
    let mut breakdown: Vec<SimulationBreakdown> = counts_in_order(records)
        .into_iter()
        .map(|(simulation_id, attempts)| {
            let own: Vec<&AttemptRecord> = records
                .iter()
                .filter(|r| r.simulation_id == simulation_id)
                .collect();

            SimulationBreakdown {
                simulation_id,
                attempts,
                best_percentage: own.iter().map(|r| r.percentage).fold(0.0, f64::max),
                average_percentage: mean(own.iter().map(|r| r.percentage))
                    .map(round2)
                    .unwrap_or(0.0),
                last_attempt_at: own
                    .iter()
                    .map(|r| r.completed_at.timestamp_millis())
                    .max()
                    .unwrap_or(0),
            }
        })
        .collect();

    // Stable: equal counts keep first-seen order.
    breakdown.sort_by(|a, b| b.attempts.cmp(&a.attempts));
    breakdown
}
