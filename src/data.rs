//! Dataset provider: bias-augmented feature rows and binary labels for a
//! training split and a held-out test split.
//!
//! The credit loader reproduces the usual preparation of the
//! "Give Me Some Credit" data: rows with missing values are dropped, features
//! are standardised, a bias column is appended, classes are balanced and the
//! result is shuffled with a fixed seed.

use std::io::Read;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DataConfig;
use crate::error::{Result, SimError};
use crate::traits::DatasetProvider;

/// `D` features followed by a trailing bias of `1.0`.
pub type FeatureVector = Vec<f64>;

pub const BIAS: f64 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    #[default]
    Train,
    Test,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    train_features: Vec<FeatureVector>,
    train_labels: Vec<u8>,
    test_features: Vec<FeatureVector>,
    test_labels: Vec<u8>,
}

impl Dataset {
    /// Builds a dataset, checking every invariant the environment relies on.
    ///
    /// # Invariants
    /// * features and labels have equal length per split
    /// * every row has the same length `D + 1 >= 2` and ends with the bias `1.0`
    /// * labels are 0 or 1
    /// * the training split is non-empty
    pub fn new(
        train_features: Vec<FeatureVector>,
        train_labels: Vec<u8>,
        test_features: Vec<FeatureVector>,
        test_labels: Vec<u8>,
    ) -> Result<Self> {
        if train_features.is_empty() {
            return Err(SimError::Data("training split is empty".to_string()));
        }
        let width = train_features[0].len();
        if width < 2 {
            return Err(SimError::Data(
                "feature rows need at least one feature plus the bias".to_string(),
            ));
        }
        check_split("train", &train_features, &train_labels, width)?;
        check_split("test", &test_features, &test_labels, width)?;
        Ok(Self {
            train_features,
            train_labels,
            test_features,
            test_labels,
        })
    }

    /// Number of non-bias features `D`.
    pub fn feature_dim(&self) -> usize {
        self.train_features[0].len() - 1
    }

    pub fn features(&self, split: Split) -> &[FeatureVector] {
        match split {
            Split::Train => &self.train_features,
            Split::Test => &self.test_features,
        }
    }

    pub fn labels(&self, split: Split) -> &[u8] {
        match split {
            Split::Train => &self.train_labels,
            Split::Test => &self.test_labels,
        }
    }

    pub fn len(&self, split: Split) -> usize {
        self.labels(split).len()
    }

    pub fn is_empty(&self, split: Split) -> bool {
        self.len(split) == 0
    }

    /// Fraction of positive labels in a split, `0.0` when the split is empty.
    pub fn positive_rate(&self, split: Split) -> f64 {
        let labels = self.labels(split);
        if labels.is_empty() {
            return 0.0;
        }
        labels.iter().filter(|&&y| y == 1).count() as f64 / labels.len() as f64
    }
}

fn check_split(name: &str, features: &[FeatureVector], labels: &[u8], width: usize) -> Result<()> {
    if features.len() != labels.len() {
        return Err(SimError::Data(format!(
            "{} split has {} rows but {} labels",
            name,
            features.len(),
            labels.len()
        )));
    }
    for (i, row) in features.iter().enumerate() {
        if row.len() != width {
            return Err(SimError::DimensionMismatch {
                expected: width,
                found: row.len(),
            });
        }
        if row[width - 1] != BIAS {
            return Err(SimError::Data(format!(
                "{} row {} does not end with the bias term",
                name, i
            )));
        }
    }
    if let Some(bad) = labels.iter().find(|&&y| y > 1) {
        return Err(SimError::Data(format!("{} split has non-binary label {}", name, bad)));
    }
    Ok(())
}

/// Appends the bias term to a raw feature row.
pub fn with_bias(mut row: Vec<f64>) -> FeatureVector {
    row.push(BIAS);
    row
}

/// Provider over a dataset that is already in memory.
pub struct InMemoryProvider {
    dataset: Dataset,
}

impl InMemoryProvider {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }
}

impl DatasetProvider for InMemoryProvider {
    fn load(&self) -> Result<Dataset> {
        Ok(self.dataset.clone())
    }
}

/// Two Gaussian clusters, one per class, with unit variance per feature.
#[derive(Clone, Debug)]
pub struct SyntheticProvider {
    pub train_len: usize,
    pub test_len: usize,
    pub dimension: usize,
    /// Distance between the class means along every axis.
    pub separation: f64,
    pub seed: u64,
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self {
            train_len: 1000,
            test_len: 200,
            dimension: 2,
            separation: 2.0,
            seed: 0,
        }
    }
}

impl DatasetProvider for SyntheticProvider {
    fn load(&self) -> Result<Dataset> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let (train_x, train_y) =
            synthetic_gaussian(self.train_len, self.dimension, self.separation, &mut rng)?;
        let (test_x, test_y) =
            synthetic_gaussian(self.test_len, self.dimension, self.separation, &mut rng)?;
        Dataset::new(train_x, train_y, test_x, test_y)
    }
}

/// Samples `n` labelled rows; positives are centred at `+separation/2`,
/// negatives at `-separation/2`.
pub fn synthetic_gaussian<R: Rng + ?Sized>(
    n: usize,
    dimension: usize,
    separation: f64,
    rng: &mut R,
) -> Result<(Vec<FeatureVector>, Vec<u8>)> {
    let noise = Normal::new(0.0, 1.0).map_err(|e| SimError::Data(e.to_string()))?;
    let mut features = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let label = u8::from(rng.gen_bool(0.5));
        let centre = if label == 1 { separation / 2.0 } else { -separation / 2.0 };
        let row = (0..dimension).map(|_| centre + noise.sample(rng)).collect();
        features.push(with_bias(row));
        labels.push(label);
    }
    Ok((features, labels))
}

/// Loader for the credit-scoring CSV files.
#[derive(Clone, Debug)]
pub struct CreditCsvProvider {
    pub train_csv: PathBuf,
    pub test_csv: PathBuf,
    pub test_probabilities_csv: PathBuf,
    pub label_column: String,
    pub max_negatives: usize,
    pub test_threshold: f64,
    pub seed: u64,
}

impl CreditCsvProvider {
    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            train_csv: config.train_csv.clone(),
            test_csv: config.test_csv.clone(),
            test_probabilities_csv: config.test_probabilities_csv.clone(),
            label_column: config.label_column.clone(),
            max_negatives: config.max_negatives,
            test_threshold: config.test_threshold,
            seed: config.seed,
        }
    }

    /// Standardised, bias-augmented, class-balanced and shuffled training rows.
    pub fn load_train(&self) -> Result<(Vec<FeatureVector>, Vec<u8>)> {
        let table = Table::from_path(&self.train_csv)?;
        prepare_training(table, &self.label_column, self.max_negatives, self.seed)
    }

    /// Processed test rows with labels from thresholded default probabilities.
    pub fn load_test(&self) -> Result<(Vec<FeatureVector>, Vec<u8>)> {
        let features = Table::from_path(&self.test_csv)?;
        let probabilities = Table::from_path(&self.test_probabilities_csv)?;
        prepare_test(features, probabilities, &self.label_column, self.test_threshold)
    }
}

impl DatasetProvider for CreditCsvProvider {
    fn load(&self) -> Result<Dataset> {
        let (train_x, train_y) = self.load_train()?;
        let (test_x, test_y) = self.load_test()?;
        info!(
            train = train_x.len(),
            test = test_x.len(),
            "Loaded credit dataset from {:?}",
            self.train_csv
        );
        Dataset::new(train_x, train_y, test_x, test_y)
    }
}

/// A parsed CSV: header names and numeric cells, `None` for missing values.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl Table {
    pub(crate) fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            SimError::Data(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub(crate) fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(parse_cell).collect());
        }
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    match cell {
        "" | "NA" | "NaN" | "nan" => None,
        _ => cell.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

fn parse_label(value: f64) -> Result<u8> {
    if value == 0.0 {
        Ok(0)
    } else if value == 1.0 {
        Ok(1)
    } else {
        Err(SimError::Data(format!("label {} is not 0 or 1", value)))
    }
}

pub(crate) fn prepare_training(
    table: Table,
    label_column: &str,
    max_negatives: usize,
    seed: u64,
) -> Result<(Vec<FeatureVector>, Vec<u8>)> {
    let label_idx = table
        .column(label_column)
        .ok_or_else(|| SimError::Data(format!("missing label column {}", label_column)))?;
    // column 0 is the row index
    let feature_idx: Vec<usize> = (1..table.headers.len()).filter(|&c| c != label_idx).collect();

    let mut raw = Vec::new();
    let mut labels = Vec::new();
    let total = table.rows.len();
    for row in table.rows {
        if row.len() != table.headers.len() || row.iter().any(Option::is_none) {
            continue;
        }
        let cells: Vec<f64> = row.into_iter().flatten().collect();
        labels.push(parse_label(cells[label_idx])?);
        raw.push(feature_idx.iter().map(|&c| cells[c]).collect::<Vec<f64>>());
    }
    debug!(kept = raw.len(), dropped = total - raw.len(), "Dropped rows with missing values");
    if raw.is_empty() {
        return Err(SimError::Data("no complete rows in training data".to_string()));
    }

    standardize(&mut raw);

    let positives = labels.iter().enumerate().filter(|&(_, &y)| y == 1).map(|(i, _)| i);
    let negatives = labels
        .iter()
        .enumerate()
        .filter(|&(_, &y)| y == 0)
        .map(|(i, _)| i)
        .take(max_negatives);
    let mut indices: Vec<usize> = positives.chain(negatives).collect();

    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let features = indices.iter().map(|&i| with_bias(raw[i].clone())).collect();
    let labels = indices.iter().map(|&i| labels[i]).collect();
    Ok((features, labels))
}

pub(crate) fn prepare_test(
    features: Table,
    probabilities: Table,
    label_column: &str,
    threshold: f64,
) -> Result<(Vec<FeatureVector>, Vec<u8>)> {
    let feature_idx: Vec<usize> = features
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.as_str() != label_column && !h.is_empty())
        .map(|(i, _)| i)
        .collect();
    let prob_idx = probabilities
        .headers
        .iter()
        .position(|h| h != "Id")
        .ok_or_else(|| SimError::Data("probability file has no value column".to_string()))?;

    if features.rows.len() != probabilities.rows.len() {
        return Err(SimError::Data(format!(
            "test features have {} rows but probabilities have {}",
            features.rows.len(),
            probabilities.rows.len()
        )));
    }

    let mut xs = Vec::with_capacity(features.rows.len());
    for (i, row) in features.rows.iter().enumerate() {
        let values = feature_idx
            .iter()
            .map(|&c| row.get(c).copied().flatten())
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| SimError::Data(format!("test row {} has missing values", i)))?;
        xs.push(with_bias(values));
    }
    let mut ys = Vec::with_capacity(probabilities.rows.len());
    for (i, row) in probabilities.rows.iter().enumerate() {
        let p = row
            .get(prob_idx)
            .copied()
            .flatten()
            .ok_or_else(|| SimError::Data(format!("probability row {} is missing", i)))?;
        ys.push(u8::from(p >= threshold));
    }
    Ok((xs, ys))
}

/// Zero mean, unit population variance per column. Constant columns are only centred.
pub fn standardize(rows: &mut [Vec<f64>]) {
    let Some(width) = rows.first().map(Vec::len) else {
        return;
    };
    let n = rows.len() as f64;
    for c in 0..width {
        let mean = rows.iter().map(|r| r[c]).sum::<f64>() / n;
        let var = rows.iter().map(|r| (r[c] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        let scale = if std > 0.0 { std } else { 1.0 };
        for r in rows.iter_mut() {
            r[c] = (r[c] - mean) / scale;
        }
    }
}
