mod oracles;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cpt_core::instance::{Instance, InstanceDocument, InstanceError};
use cpt_policy::OracleError;
use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::{Level, event};

use crate::analytics::{AnalyticsError, EvaluationReport};
use crate::config::{EvaluationConfig, ResolvedOutputs};
use crate::simulation::{
    CmdpEvaluator, CpomdpEvaluator, EvaluationError, EvaluationStatistics, RunRecord, RunSink,
};

pub use oracles::{OracleBlueprint, OracleParamError};

/// Loads an instance and evaluates the configured oracle on it.
pub struct EvaluationRunner {
    config: EvaluationConfig,
    outputs: ResolvedOutputs,
    instance: Instance,
    oracle: OracleBlueprint,
    logging_enabled: bool,
}

/// Summary details returned after a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub kind: &'static str,
    pub runs: usize,
    pub expected_reward: f64,
    pub rows_written: usize,
    pub jsonl_path: PathBuf,
    pub summary_path: PathBuf,
    pub report_path: PathBuf,
    pub plot_path: Option<PathBuf>,
    pub telemetry_path: Option<PathBuf>,
}

impl EvaluationRunner {
    /// Build a runner from a validated configuration.
    pub fn new(config: EvaluationConfig, outputs: ResolvedOutputs) -> Result<Self, RunnerError> {
        let instance = load_instance(&config.instance_path())?;
        let oracle = OracleBlueprint::from_config(
            &config.oracle,
            config.base_dir.as_deref(),
            config.simulation.seed.unwrap_or(0),
        )?;

        Ok(Self {
            logging_enabled: config.logging.enable_structured,
            config,
            outputs,
            instance,
            oracle,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn oracle(&self) -> &OracleBlueprint {
        &self.oracle
    }

    /// Execute the evaluation, streaming one JSONL row per trajectory.
    ///
    /// Rows go to `<jsonl>.partial` and are only moved into place once every
    /// run succeeded.
    pub fn run(&self) -> Result<RunSummary, RunnerError> {
        ensure_parent(self.outputs.jsonl.parent())?;
        ensure_parent(self.outputs.summary_md.parent())?;
        if !self.outputs.plots_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.outputs.plots_dir)?;
        }

        let partial_path = partial_path(&self.outputs.jsonl);
        let mut sink = JsonlSink::new(BufWriter::new(File::create(&partial_path)?));
        let mut rng = StdRng::seed_from_u64(self.config.simulation.seed.unwrap_or(0));
        let runs = self.config.simulation.runs;

        if self.logging_enabled && tracing::enabled!(Level::INFO) {
            event!(
                target: "cpt_bench::runner",
                Level::INFO,
                run_id = %self.config.run_id,
                kind = self.instance.kind(),
                oracle = self.oracle.name(),
                agents = self.instance.num_agents(),
                horizon = self.instance.num_decisions(),
                runs,
                "evaluation started"
            );
        }

        let statistics = match &self.instance {
            Instance::Cmdp(instance) => {
                let mut oracle = self.oracle.mdp_oracle(instance)?;
                let mut evaluator = CmdpEvaluator::new(instance);
                let outcome = evaluator.run_with_sink(oracle.as_mut(), &mut rng, runs, &mut sink);
                let closed = oracle.close();
                finish(outcome, closed, evaluator.statistics())?
            }
            Instance::Cpomdp(instance) => {
                let mut oracle = self.oracle.pomdp_oracle(instance)?;
                let mut evaluator = CpomdpEvaluator::with_cache_capacity(
                    instance,
                    self.config.simulation.belief_cache_capacity,
                );
                let outcome = evaluator.run_with_sink(oracle.as_mut(), &mut rng, runs, &mut sink);
                let closed = oracle.close();
                finish(outcome, closed, evaluator.statistics())?
            }
        };

        let rows_written = sink.finish()?;
        fs::rename(&partial_path, &self.outputs.jsonl)?;

        let report =
            EvaluationReport::from_statistics(&self.config.run_id, self.instance.kind(), &statistics)?;
        report.write_markdown(&self.outputs.summary_md)?;
        let report_path = self.outputs.summary_md.with_extension("json");
        let mut report_writer = BufWriter::new(File::create(&report_path)?);
        serde_json::to_writer_pretty(&mut report_writer, &report)?;
        report_writer.write_all(b"\n")?;
        report_writer.flush()?;

        let plot_path = match report.render_plot(&self.outputs.plots_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                event!(
                    target: "cpt_bench::runner",
                    Level::WARN,
                    error = %err,
                    "plot rendering skipped"
                );
                eprintln!("WARN: {}", err);
                None
            }
        };

        let telemetry_path = self
            .logging_enabled
            .then(|| crate::logging::telemetry_path(&self.outputs));

        Ok(RunSummary {
            kind: self.instance.kind(),
            runs,
            expected_reward: statistics.expected_reward,
            rows_written,
            jsonl_path: self.outputs.jsonl.clone(),
            summary_path: self.outputs.summary_md.clone(),
            report_path,
            plot_path,
            telemetry_path,
        })
    }
}

/// Reads a YAML (or JSON, a YAML subset) instance document from disk.
pub fn load_instance(path: &Path) -> Result<Instance, RunnerError> {
    let text = fs::read_to_string(path).map_err(|source| RunnerError::InstanceRead {
        path: path.to_path_buf(),
        source,
    })?;
    let document: InstanceDocument =
        serde_yaml::from_str(&text).map_err(|source| RunnerError::InstanceParse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(document.build()?)
}

/// The evaluation error wins over a close failure.
fn finish(
    outcome: Result<f64, EvaluationError>,
    closed: Result<(), OracleError>,
    statistics: Option<&EvaluationStatistics>,
) -> Result<EvaluationStatistics, RunnerError> {
    outcome?;
    closed.map_err(RunnerError::OracleClose)?;
    statistics.cloned().ok_or(RunnerError::MissingStatistics)
}

fn ensure_parent(path: Option<&Path>) -> Result<(), RunnerError> {
    if let Some(dir) = path.filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

struct JsonlSink<W: Write> {
    writer: W,
    rows: usize,
}

impl<W: Write> JsonlSink<W> {
    fn new(writer: W) -> Self {
        Self { writer, rows: 0 }
    }

    fn finish(mut self) -> Result<usize, RunnerError> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

impl<W: Write> RunSink for JsonlSink<W> {
    fn record(&mut self, record: &RunRecord) -> Result<(), EvaluationError> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|err| EvaluationError::Sink(err.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|err| EvaluationError::Sink(err.to_string()))?;
        self.rows += 1;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to read instance {path:?}: {source}")]
    InstanceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse instance {path:?}: {source}")]
    InstanceParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid instance: {0}")]
    Instance(#[from] InstanceError),
    #[error("{0}")]
    Oracle(#[from] OracleParamError),
    #[error("failed to close oracle: {0}")]
    OracleClose(OracleError),
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("evaluation finished without statistics")]
    MissingStatistics,
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("failed to serialize report: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
    #[error("analytics error: {0}")]
    Analytics(#[from] AnalyticsError),
}
