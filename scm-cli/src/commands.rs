//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::Context;
use ndarray::Array2;
use scm_learning::data::file::Rows;
use scm_learning::data::rows_to_array;
use scm_learning::graph::{binarize, binarize_stack, ensure_square, unbind_last};
use scm_learning::metrics::curves::pos_ratio;
use scm_learning::metrics::{
    CurvePoints, adjacency_f1, auc_precision_recall_gain, auc_recall_fallout, orientation_f1,
};
use scm_learning::resource::HostMemorySampler;
use scm_learning::{
    DataFile, EvalConfig, LinearScm, RunHistory, RunStatus, ScmConfig, ScmLearningTask, Trainer,
    load_config,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Epoch keys echoed to stdout after training.
const EPOCH_KEYS: [&str; 4] = [
    "train_loss",
    "val_loss",
    "val_adj_f1_pred",
    "val_orient_f1_pred",
];

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path, None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    match command {
        Commands::Train {
            data,
            history,
            epochs,
        } => handle_train(config, &data, history.as_deref(), epochs),
        Commands::Evaluate { true_graph, graph } => {
            handle_evaluate(&config.evaluation, &true_graph, &graph)
        }
        Commands::Config { action } => handle_config(action, &config),
    }
}

fn handle_config(action: ConfigAction, config: &ScmConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn handle_train(
    mut config: ScmConfig,
    data_path: &Path,
    history_path: Option<&Path>,
    epochs: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(epochs) = epochs {
        config.trainer.max_epochs = epochs;
    }

    let data = DataFile::load(data_path)
        .with_context(|| format!("Failed to load dataset {}", data_path.display()))?
        .into_module(config.trainer.batch_size)?;
    if data.nodes() != config.task.total_nodes {
        debug!(
            configured = config.task.total_nodes,
            dataset = data.nodes(),
            "using the node count of the dataset"
        );
        config.task.total_nodes = data.nodes();
    }

    let model = LinearScm::new(config.task.total_nodes, config.trainer.seed);
    let mut task = ScmLearningTask::new(config.task.clone(), model)?
        .with_eval_config(config.evaluation.clone())
        .with_resource_sampler(Box::new(HostMemorySampler::default()))
        .bind(&data)?;

    let name = data_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("run");
    let mut history = RunHistory::new(name, &config.trainer.monitor).with_config(&config)?;
    let mut trainer = Trainer::new(config.trainer.clone());

    if let Err(e) = trainer.fit(&mut task, &data, &mut history) {
        history.finish(RunStatus::Failed, Some(e.to_string()));
        if let Some(path) = history_path {
            history.save(path)?;
        }
        return Err(e.into());
    }

    for record in &history.epochs {
        println!(
            "epoch {:>3}  {}",
            record.epoch,
            format_metrics(&record.metrics, &EPOCH_KEYS)
        );
    }
    if let Some(reason) = &history.stop_reason {
        println!("stopped early: {reason}");
    }

    let test = trainer.test(&mut task, &data)?;
    println!("\nTest metrics:");
    print_metrics(&test);
    history.record_test(test);

    if let Some(path) = history_path {
        history.save(path)?;
        info!(path = %path.display(), id = %history.id, "run history saved");
    }
    Ok(())
}

fn handle_evaluate(eval: &EvalConfig, true_graph: &Path, graph: &Path) -> anyhow::Result<()> {
    let true_graph = read_matrix(true_graph)?;
    let graph = read_matrix(graph)?;
    let scores = score_graph(&true_graph, &graph, eval)?;
    print_metrics(&scores);
    Ok(())
}

fn read_matrix(path: &Path) -> anyhow::Result<Array2<f64>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rows: Rows = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of rows", path.display()))?;
    Ok(rows_to_array(&path.display().to_string(), &rows)?)
}

/// Graph metrics of a stored continuous graph, without a model.
fn score_graph(
    true_graph: &Array2<f64>,
    graph: &Array2<f64>,
    eval: &EvalConfig,
) -> anyhow::Result<BTreeMap<String, f64>> {
    ensure_square("true graph", true_graph.view(), true_graph.nrows())?;
    ensure_square("graph", graph.view(), true_graph.nrows())?;
    let truth = true_graph.view();
    let mut scores = BTreeMap::new();

    let pred = binarize(graph.view(), eval.default_threshold);
    let adj_f1_pred = adjacency_f1(truth, pred.view())?;
    let orient_f1_pred = orientation_f1(truth, pred.view())?;

    // best also considers the default threshold, which is not a sweep member
    let family = unbind_last(binarize_stack(graph.view(), &eval.sweep.thresholds()).view());
    let (mut adj_f1_best, mut orient_f1_best) = (adj_f1_pred, orient_f1_pred);
    for g in &family {
        adj_f1_best = adj_f1_best.max(adjacency_f1(truth, g.view())?);
        orient_f1_best = orient_f1_best.max(orientation_f1(truth, g.view())?);
    }

    scores.insert("adj_f1_pred".to_string(), adj_f1_pred);
    scores.insert("orient_f1_pred".to_string(), orient_f1_pred);
    scores.insert("adj_f1_best".to_string(), adj_f1_best);
    scores.insert("orient_f1_best".to_string(), orient_f1_best);

    let points = CurvePoints::from_graphs(truth, family.iter().map(|g| g.view()))?;
    match auc_precision_recall_gain(&points.precision, &points.recall, pos_ratio(truth)) {
        Some(auc) => {
            scores.insert("auc_precision_recall".to_string(), auc);
        }
        None => info!("No indices found for precision recall"),
    }
    if let Some(auc) = auc_recall_fallout(&points.fallout, &points.roc_recall) {
        scores.insert("auc_recall_fallout".to_string(), auc);
    }
    Ok(scores)
}

fn format_metrics(metrics: &BTreeMap<String, f64>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| metrics.get(*k).map(|v| format!("{k}={v:.4}")))
        .collect::<Vec<_>>()
        .join("  ")
}

fn print_metrics(metrics: &BTreeMap<String, f64>) {
    for (key, value) in metrics {
        println!("  {key:<36} {value:.6}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn chain4() -> Array2<f64> {
        let mut g = Array2::zeros((4, 4));
        g[[0, 1]] = 1.0;
        g[[1, 2]] = 1.0;
        g
    }

    #[test]
    fn test_constant_graph_scores() {
        let graph = Array2::from_elem((4, 4), 0.5);
        let scores = score_graph(&chain4(), &graph, &EvalConfig::default()).unwrap();
        // 2 true edges among 16 predicted entries
        for key in ["adj_f1_pred", "orient_f1_pred", "adj_f1_best", "orient_f1_best"] {
            assert!((scores[key] - 2.0 / 9.0).abs() < 1e-12, "{key} = {}", scores[key]);
        }
        assert_eq!(scores["auc_precision_recall"], 0.0);
        assert!((scores["auc_recall_fallout"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ranked_graph_scores() {
        let graph = chain4().mapv(|t| if t != 0.0 { 0.95 } else { 0.05 });
        let scores = score_graph(&chain4(), &graph, &EvalConfig::default()).unwrap();
        assert_eq!(scores["orient_f1_best"], 1.0);
        assert!((scores["auc_recall_fallout"] - 1.0).abs() < 1e-12);
        assert!((scores["auc_precision_recall"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_exact_graph_scores() {
        let scores = score_graph(&chain4(), &(chain4() * 0.9), &EvalConfig::default()).unwrap();
        assert_eq!(scores["orient_f1_pred"], 1.0);
        assert_eq!(scores["orient_f1_best"], 1.0);
        assert!(!scores.contains_key("auc_recall_fallout"));
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let graph = Array2::zeros((3, 3));
        assert!(score_graph(&chain4(), &graph, &EvalConfig::default()).is_err());
    }

    #[test]
    fn test_read_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(&path, "[[0.0, 1.0], [0.0, 0.0]]").unwrap();
        assert_eq!(read_matrix(&path).unwrap(), array![[0.0, 1.0], [0.0, 0.0]]);

        std::fs::write(&path, "{\"not\": \"rows\"}").unwrap();
        assert!(read_matrix(&path).is_err());
    }

    #[test]
    fn test_format_metrics_skips_missing_keys() {
        let metrics = BTreeMap::from([("train_loss".to_string(), 0.25)]);
        assert_eq!(format_metrics(&metrics, &EPOCH_KEYS), "train_loss=0.2500");
    }

    #[test]
    fn test_default_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&ScmConfig::default()).unwrap();
        assert!(rendered.contains("[task]"));
        assert!(rendered.contains("max_epochs = 50"));
    }
}
