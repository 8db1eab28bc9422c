//! Demo Artifact Writer
//!
//! Writes a randomly generated ensemble bundle (and optionally per-algorithm
//! files) plus a file of sample requests, for exercising the serving binary.
//!
//! Usage: artifact-writer [OUT_DIR] [REQUESTS] [--tuned] [--per-algorithm]

use anyhow::{Context, Result};
use chrono::Utc;
use price_ensemble::models::scorer::{
    FeatureScaler, LinearModel, Node, ScoringModel, Tree, TreeCombine, TreeEnsemble,
};
use price_ensemble::types::ServingRequest;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const FEATURE_NAMES: [&str; 6] = [
    "sqft_living",
    "bedrooms",
    "bathrooms",
    "lot_size",
    "year_built",
    "distance_to_center",
];

/// Typical raw feature ranges used for scaler statistics and sample requests
const FEATURE_RANGES: [(f64, f64); 6] = [
    (600.0, 4500.0),
    (1.0, 6.0),
    (1.0, 4.0),
    (1000.0, 20000.0),
    (1920.0, 2022.0),
    (0.5, 40.0),
];

struct Args {
    out_dir: PathBuf,
    requests: usize,
    tuned: bool,
    per_algorithm: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        out_dir: PathBuf::from("models"),
        requests: 100,
        tuned: false,
        per_algorithm: false,
    };

    let mut positional = 0;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--tuned" => args.tuned = true,
            "--per-algorithm" => args.per_algorithm = true,
            _ => {
                match positional {
                    0 => args.out_dir = PathBuf::from(&arg),
                    1 => {
                        args.requests = arg
                            .parse()
                            .with_context(|| format!("Invalid request count: {}", arg))?
                    }
                    _ => anyhow::bail!("Unexpected argument: {}", arg),
                }
                positional += 1;
            }
        }
    }
    Ok(args)
}

/// Random model generator
struct ModelGenerator {
    rng: rand::rngs::ThreadRng,
}

impl ModelGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    fn scaler(&self) -> FeatureScaler {
        FeatureScaler {
            mean: FEATURE_RANGES.iter().map(|(lo, hi)| (lo + hi) / 2.0).collect(),
            scale: FEATURE_RANGES.iter().map(|(lo, hi)| (hi - lo) / 4.0).collect(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Ridge-style linear model over standardised features
    fn linear(&mut self) -> ScoringModel {
        ScoringModel::Linear(LinearModel {
            coefficients: (0..FEATURE_NAMES.len())
                .map(|_| self.rng.gen_range(-20_000.0..80_000.0))
                .collect(),
            intercept: self.rng.gen_range(250_000.0..350_000.0),
        })
    }

    /// Depth-2 tree splitting on two random features
    fn tree(&mut self, base: f64) -> Tree {
        let root = self.rng.gen_range(0..FEATURE_NAMES.len());
        let child = self.rng.gen_range(0..FEATURE_NAMES.len());
        let leaf = |rng: &mut rand::rngs::ThreadRng| Node {
            feature_index: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: Some(base * rng.gen_range(0.7..1.4)),
        };

        Tree {
            nodes: vec![
                Node {
                    feature_index: root,
                    threshold: self.rng.gen_range(-0.5..0.5),
                    left: 1,
                    right: 2,
                    value: None,
                },
                Node {
                    feature_index: child,
                    threshold: self.rng.gen_range(-0.5..0.5),
                    left: 3,
                    right: 4,
                    value: None,
                },
                leaf(&mut self.rng),
                leaf(&mut self.rng),
                leaf(&mut self.rng),
            ],
        }
    }

    fn importances(&mut self) -> Vec<f64> {
        let raw: Vec<f64> = (0..FEATURE_NAMES.len())
            .map(|_| self.rng.gen_range(0.01..1.0))
            .collect();
        let total: f64 = raw.iter().sum();
        raw.into_iter().map(|v| v / total).collect()
    }

    fn forest(&mut self, trees: usize) -> ScoringModel {
        ScoringModel::TreeEnsemble(TreeEnsemble {
            trees: (0..trees).map(|_| self.tree(300_000.0)).collect(),
            combine: TreeCombine::Average,
            base_score: 0.0,
            feature_importances: Some(self.importances()),
        })
    }

    fn boosted(&mut self, trees: usize, learning_rate: f64) -> ScoringModel {
        ScoringModel::TreeEnsemble(TreeEnsemble {
            trees: (0..trees).map(|_| self.tree(20_000.0)).collect(),
            combine: TreeCombine::Additive { learning_rate },
            base_score: 290_000.0,
            feature_importances: Some(self.importances()),
        })
    }

    fn features(&mut self) -> Vec<f64> {
        FEATURE_RANGES
            .iter()
            .map(|(lo, hi)| (self.rng.gen_range(*lo..*hi) * 100.0_f64).round() / 100.0)
            .collect()
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Artifact written");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("artifact_writer=info".parse()?),
        )
        .init();

    let args = parse_args()?;
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let mut generator = ModelGenerator::new();
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();

    let models = [
        ("random_forest", generator.forest(10)),
        ("gradient_boosting", generator.boosted(25, 0.1)),
        ("ridge", generator.linear()),
    ];
    let scaler = generator.scaler();

    let mut bundle = Map::new();
    for (name, model) in &models {
        bundle.insert(name.to_string(), serde_json::to_value(model)?);
    }
    bundle.insert(
        "weights".to_string(),
        json!({ "random_forest": 0.4, "gradient_boosting": 0.4, "ridge": 0.2 }),
    );
    bundle.insert("version".to_string(), json!(format!("demo-{}", stamp)));
    bundle.insert("feature_names".to_string(), json!(FEATURE_NAMES));
    bundle.insert("preprocessor".to_string(), serde_json::to_value(&scaler)?);
    bundle.insert(
        "training_samples".to_string(),
        json!(generator.rng.gen_range(5_000..50_000)),
    );
    bundle.insert(
        "metrics".to_string(),
        json!({
            "r2": generator.rng.gen_range(0.70..0.92),
            "mae": generator.rng.gen_range(15_000.0..40_000.0),
        }),
    );

    let prefix = if args.tuned { "ensemble_tuned" } else { "ensemble" };
    write_json(
        &args.out_dir.join(format!("{}_{}.json", prefix, stamp)),
        &Value::Object(bundle),
    )?;

    if args.per_algorithm {
        for (name, model) in &models {
            write_json(
                &args.out_dir.join(format!("{}_{}.json", name, stamp)),
                &serde_json::to_value(model)?,
            )?;
        }
        write_json(
            &args.out_dir.join(format!("preprocessor_{}.json", stamp)),
            &serde_json::to_value(&scaler)?,
        )?;
    }

    let requests_path = args.out_dir.join("requests.jsonl");
    let mut file = fs::File::create(&requests_path)
        .with_context(|| format!("Failed to create {}", requests_path.display()))?;

    for i in 0..args.requests {
        let request = ServingRequest::Predict {
            id: Some(format!("req_{:06}", i + 1)),
            features: generator.features(),
            include_individual: true,
            include_confidence: true,
        };
        writeln!(file, "{}", serde_json::to_string(&request)?)?;
    }
    writeln!(
        file,
        "{}",
        serde_json::to_string(&ServingRequest::Status {
            id: Some("status".to_string())
        })?
    )?;

    info!(
        requests = args.requests,
        path = %requests_path.display(),
        "Sample requests written"
    );
    Ok(())
}
