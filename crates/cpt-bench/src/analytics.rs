use std::fs;
use std::path::{Path, PathBuf};

use cpt_core::belief::CacheStats;
use cpt_core::instance::CostLimits;
use plotters::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::simulation::EvaluationStatistics;

const CONFIDENCE_Z: f64 = 1.96; // 95% CI
const SIGMA_FLOOR: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("statistics backend failed: {0}")]
    Statistics(String),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render plot: {0}")]
    Plot(String),
}

/// Summary of one evaluation, ready to be written as Markdown or JSON.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub run_id: String,
    pub kind: &'static str,
    pub num_runs: usize,
    pub num_agents: usize,
    pub num_decisions: usize,
    pub expected_reward: f64,
    pub reward_std_dev: f64,
    pub reward_ci95: (f64, f64),
    pub resources: Vec<ResourceReport>,
    pub sampler_fallbacks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub belief_cache: Option<CacheStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub resource: usize,
    pub mean_total_cost: f64,
    pub total_cost_std_dev: f64,
    /// Budget regime only.
    pub budget: Option<f64>,
    pub violation_probability: Option<f64>,
    pub violation_ci95: Option<(f64, f64)>,
    /// `1 - Φ((limit - μ) / σ)` of the total cost.
    pub normal_violation_probability: Option<f64>,
    pub mean_instantaneous_cost: Vec<f64>,
    /// Instantaneous regime only.
    pub instantaneous_limits: Option<Vec<f64>>,
    pub instantaneous_violation_probability: Option<Vec<f64>>,
}

impl EvaluationReport {
    pub fn from_statistics(
        run_id: &str,
        kind: &'static str,
        stats: &EvaluationStatistics,
    ) -> Result<Self, AnalyticsError> {
        let standard_normal =
            Normal::new(0.0, 1.0).map_err(|e| AnalyticsError::Statistics(e.to_string()))?;
        let n = stats.num_runs;

        let resources = (0..stats.num_domain_resources())
            .map(|k| {
                let moments = stats.total_cost[k];
                let mean = moments.mean();
                let std_dev = moments.std_dev();
                let (budget, instantaneous_limits) = match &stats.limits {
                    CostLimits::Budget(limits) => (limits.get(k).copied(), None),
                    CostLimits::Instantaneous(limits) => (None, limits.get(k).cloned()),
                };
                let violation_probability = stats.violation_probability_total(k);
                ResourceReport {
                    resource: k,
                    mean_total_cost: mean,
                    total_cost_std_dev: std_dev,
                    budget,
                    violation_probability,
                    violation_ci95: violation_probability.map(|p| wald_interval(p, n)),
                    normal_violation_probability: budget
                        .map(|limit| normal_tail(&standard_normal, limit, mean, std_dev)),
                    mean_instantaneous_cost: stats.mean_instantaneous_cost[k].clone(),
                    instantaneous_limits,
                    instantaneous_violation_probability: stats
                        .violation_probability_instantaneous
                        .as_ref()
                        .and_then(|rows| rows.get(k).cloned()),
                }
            })
            .collect();

        let belief_cache = stats.belief_cache.as_ref().map(|per_agent| {
            per_agent
                .iter()
                .fold(CacheStats::default(), |acc, agent| CacheStats {
                    hits: acc.hits + agent.hits,
                    misses: acc.misses + agent.misses,
                    entries: acc.entries + agent.entries,
                    capacity: acc.capacity + agent.capacity,
                })
        });

        let se = stats.reward.standard_error();
        Ok(Self {
            run_id: run_id.to_string(),
            kind,
            num_runs: n,
            num_agents: stats.num_agents,
            num_decisions: stats.num_decisions,
            expected_reward: stats.expected_reward,
            reward_std_dev: stats.reward.std_dev(),
            reward_ci95: (
                stats.expected_reward - CONFIDENCE_Z * se,
                stats.expected_reward + CONFIDENCE_Z * se,
            ),
            resources,
            sampler_fallbacks: stats.sampler_fallbacks,
            belief_cache,
        })
    }

    pub fn write_markdown(&self, path: impl AsRef<Path>) -> Result<(), AnalyticsError> {
        let mut rows = String::new();
        rows.push_str(&format!("# Evaluation Summary: {}\n\n", self.run_id));
        rows.push_str(&format!(
            "{} instance, {} agent{}, horizon {}, {} runs\n\n",
            self.kind.to_uppercase(),
            self.num_agents,
            if self.num_agents == 1 { "" } else { "s" },
            self.num_decisions,
            self.num_runs
        ));
        rows.push_str("| Expected reward | Std dev | 95% CI | Sampler fallbacks |\n");
        rows.push_str("|-----------------|---------|--------|-------------------|\n");
        rows.push_str(&format!(
            "| {avg:.4} | {std:.4} | [{lo:.4}, {hi:.4}] | {fallbacks} |\n\n",
            avg = self.expected_reward,
            std = self.reward_std_dev,
            lo = self.reward_ci95.0,
            hi = self.reward_ci95.1,
            fallbacks = self.sampler_fallbacks,
        ));

        if !self.resources.is_empty() {
            rows.push_str("| Resource | Mean cost | Std dev | Limit | P(violation) | 95% CI | Normal approx. |\n");
            rows.push_str("|----------|-----------|---------|-------|--------------|--------|----------------|\n");
            for resource in &self.resources {
                let limit = match (&resource.budget, &resource.instantaneous_limits) {
                    (Some(budget), _) => format!("{budget:.3}"),
                    (None, Some(_)) => "per epoch".to_string(),
                    (None, None) => "-".to_string(),
                };
                let violation = resource
                    .violation_probability
                    .map(|p| format!("{p:.4}"))
                    .unwrap_or_else(|| {
                        resource
                            .instantaneous_violation_probability
                            .as_ref()
                            .and_then(|ps| ps.iter().copied().reduce(f64::max))
                            .map(|p| format!("max {p:.4}"))
                            .unwrap_or_else(|| "-".to_string())
                    });
                let ci = resource
                    .violation_ci95
                    .map(|(lo, hi)| format!("[{lo:.4}, {hi:.4}]"))
                    .unwrap_or_else(|| "-".to_string());
                let normal = resource
                    .normal_violation_probability
                    .map(|p| format!("{p:.4}"))
                    .unwrap_or_else(|| "-".to_string());
                rows.push_str(&format!(
                    "| {k} | {mean:.4} | {std:.4} | {limit} | {violation} | {ci} | {normal} |\n",
                    k = resource.resource,
                    mean = resource.mean_total_cost,
                    std = resource.total_cost_std_dev,
                ));
            }
            rows.push('\n');
        }

        if let Some(cache) = &self.belief_cache {
            rows.push_str(&format!(
                "Belief cache: {} hits, {} misses, {} entries\n",
                cache.hits, cache.misses, cache.entries
            ));
        }

        fs::write(path.as_ref(), rows).map_err(|e| AnalyticsError::Io {
            context: "writing summary markdown",
            source: e,
        })?;
        Ok(())
    }

    /// Grouped bars of the mean cost per epoch, one colour per resource.
    pub fn render_plot(&self, dir: impl AsRef<Path>) -> Result<PathBuf, AnalyticsError> {
        let dir = dir.as_ref();
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|e| AnalyticsError::Io {
                context: "creating plots directory",
                source: e,
            })?;
        }
        if self.resources.is_empty() {
            return Err(AnalyticsError::Plot("instance has no cost resources".into()));
        }

        let output_path = dir.join("instantaneous_cost.png");
        let series: Vec<Vec<f64>> = self
            .resources
            .iter()
            .map(|r| r.mean_instantaneous_cost.clone())
            .collect();
        let num_decisions = self.num_decisions;

        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));

        let plot_attempt = std::panic::catch_unwind(move || {
            let root = BitMapBackend::new(&output_path, (800, 480)).into_drawing_area();
            root.fill(&WHITE)
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            let group = series.len() + 1;
            let y_min = series.iter().flatten().fold(0.0f64, |acc, v| acc.min(*v));
            let y_max = series.iter().flatten().fold(0.0f64, |acc, v| acc.max(*v));
            let margin = ((y_max - y_min).abs() * 0.1).max(0.2);

            let mut chart = ChartBuilder::on(&root)
                .margin(20)
                .caption("Mean cost per epoch", ("sans-serif", 22))
                .set_label_area_size(LabelAreaPosition::Left, 50)
                .set_label_area_size(LabelAreaPosition::Bottom, 60)
                .build_cartesian_2d(0..num_decisions * group, (y_min - margin)..(y_max + margin))
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            chart
                .configure_mesh()
                .disable_mesh()
                .y_desc("Mean cost")
                .x_desc("Epoch")
                .x_label_formatter(&|idx| {
                    if idx % group == 0 {
                        (idx / group).to_string()
                    } else {
                        String::new()
                    }
                })
                .draw()
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            for (k, costs) in series.iter().enumerate() {
                let color = Palette99::pick(k);
                chart
                    .draw_series(costs.iter().enumerate().map(|(t, cost)| {
                        let x = t * group + k;
                        Rectangle::new([(x, 0.0), (x + 1, *cost)], color.filled())
                    }))
                    .map_err(|e| AnalyticsError::Plot(e.to_string()))?;
            }

            drop(chart);

            root.present()
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            drop(root);

            Ok(output_path)
        });

        std::panic::set_hook(prev_hook);

        match plot_attempt {
            Ok(result) => result,
            Err(_) => Err(AnalyticsError::Plot(
                "plotters panicked while rendering (missing font support?)".into(),
            )),
        }
    }
}

/// Wald interval for a Bernoulli proportion, clamped to `[0, 1]`.
pub fn wald_interval(p: f64, n: usize) -> (f64, f64) {
    if n == 0 {
        return (0.0, 1.0);
    }
    let margin = CONFIDENCE_Z * (p * (1.0 - p) / n as f64).sqrt();
    ((p - margin).max(0.0), (p + margin).min(1.0))
}

/// Probability that a normal total cost with the given moments exceeds `limit`.
pub fn normal_violation_probability(
    limit: f64,
    mean: f64,
    std_dev: f64,
) -> Result<f64, AnalyticsError> {
    let standard_normal =
        Normal::new(0.0, 1.0).map_err(|e| AnalyticsError::Statistics(e.to_string()))?;
    Ok(normal_tail(&standard_normal, limit, mean, std_dev))
}

fn normal_tail(standard_normal: &Normal, limit: f64, mean: f64, std_dev: f64) -> f64 {
    let z = (limit - mean) / (std_dev + SIGMA_FLOOR);
    (1.0 - standard_normal.cdf(z)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::RunningMoments;

    fn statistics(limits: CostLimits) -> EvaluationStatistics {
        let mut reward = RunningMoments::default();
        let mut cost = RunningMoments::default();
        for (r, c) in [(8.0, 1.0), (10.0, 3.0), (12.0, 2.0), (10.0, 2.0)] {
            reward.push(r);
            cost.push(c);
        }
        let instantaneous = limits.is_instantaneous();
        EvaluationStatistics {
            num_runs: 4,
            num_agents: 1,
            num_decisions: 2,
            expected_reward: reward.mean(),
            reward,
            total_cost: vec![cost],
            mean_total_cost: vec![cost.mean()],
            mean_instantaneous_cost: vec![vec![1.5, 0.5]],
            limits,
            violation_probability_total: (!instantaneous).then(|| vec![0.25]),
            violation_probability_instantaneous: instantaneous.then(|| vec![vec![0.5, 0.0]]),
            sampler_fallbacks: 0,
            belief_cache: None,
        }
    }

    #[test]
    fn normal_tail_is_one_half_at_the_mean() {
        let p = normal_violation_probability(2.0, 2.0, 1.0).unwrap();
        assert!((p - 0.5).abs() < 1e-9);
        let far = normal_violation_probability(10.0, 2.0, 1.0).unwrap();
        assert!(far < 1e-6);
    }

    #[test]
    fn degenerate_cost_uses_sigma_floor() {
        assert!(normal_violation_probability(3.0, 2.0, 0.0).unwrap() < 1e-12);
        assert!(normal_violation_probability(1.0, 2.0, 0.0).unwrap() > 1.0 - 1e-12);
    }

    #[test]
    fn wald_interval_stays_inside_unit_range() {
        let (lo, hi) = wald_interval(0.0, 100);
        assert_eq!((lo, hi), (0.0, 0.0));
        let (lo, hi) = wald_interval(0.5, 100);
        assert!(lo > 0.39 && hi < 0.61);
        assert_eq!(wald_interval(0.3, 0), (0.0, 1.0));
    }

    #[test]
    fn budget_report_carries_interval_and_normal_approximation() {
        let stats = statistics(CostLimits::Budget(vec![2.5]));
        let report = EvaluationReport::from_statistics("demo", "cmdp", &stats).unwrap();
        assert_eq!(report.expected_reward, 10.0);
        assert!(report.reward_ci95.0 < 10.0 && report.reward_ci95.1 > 10.0);
        let resource = &report.resources[0];
        assert_eq!(resource.budget, Some(2.5));
        assert_eq!(resource.violation_probability, Some(0.25));
        assert!(resource.violation_ci95.is_some());
        let normal = resource.normal_violation_probability.unwrap();
        assert!(normal > 0.0 && normal < 0.5);
        assert!(resource.instantaneous_limits.is_none());
    }

    #[test]
    fn instantaneous_report_has_per_epoch_probabilities() {
        let stats = statistics(CostLimits::Instantaneous(vec![vec![1.0, 1.0]]));
        let report = EvaluationReport::from_statistics("demo", "cmdp", &stats).unwrap();
        let resource = &report.resources[0];
        assert_eq!(resource.violation_probability, None);
        assert_eq!(resource.normal_violation_probability, None);
        assert_eq!(
            resource.instantaneous_violation_probability,
            Some(vec![0.5, 0.0])
        );
    }

    #[test]
    fn markdown_summary_lists_every_resource() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.md");
        let report =
            EvaluationReport::from_statistics("demo", "cmdp", &statistics(CostLimits::Budget(vec![2.5])))
                .unwrap();
        report.write_markdown(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Evaluation Summary: demo"));
        assert!(text.contains("| 0 | 2.0000 |"));
        assert!(text.contains("0.2500"));
    }

    #[test]
    fn plot_failures_are_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let report =
            EvaluationReport::from_statistics("demo", "cmdp", &statistics(CostLimits::Budget(vec![2.5])))
                .unwrap();
        match report.render_plot(dir.path().join("plots")) {
            Ok(path) => assert!(path.exists()),
            Err(err) => assert!(matches!(err, AnalyticsError::Plot(_))),
        }
    }
}
