// Latency sketch: a t-digest (compression 100) plus the blob codec used for
// the aggregated_results column. Blob layout: [version: u8][wincode payload],
// where the payload is the centroid list. Merging two sketches concatenates
// their centroids and re-compresses, which keeps the merge associative.

use tdigests::{Centroid, TDigest};
use thiserror::Error;
use wincode::{SchemaRead, SchemaWrite};

/// T-digest compression parameter used everywhere.
pub const COMPRESSION: usize = 100;

const BLOB_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum SketchError {
    #[error("sketch encode failed: {0}")]
    Encode(String),
    #[error("sketch decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, SchemaRead, SchemaWrite)]
struct SketchBlob {
    means: Vec<f64>,
    weights: Vec<f64>,
}

/// A mergeable latency distribution. An empty sketch (no samples) is a valid
/// state: windows that saw only timeouts, or nothing at all, still persist.
#[derive(Debug, Clone, Default)]
pub struct LatencySketch {
    inner: Option<TDigest>,
}

impl LatencySketch {
    pub fn empty() -> Self {
        Self { inner: None }
    }

    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let mut td = TDigest::from_values(values.to_vec());
        td.compress(COMPRESSION);
        Self { inner: Some(td) }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Total sample weight absorbed by the sketch.
    pub fn count(&self) -> f64 {
        self.centroid_fold(|acc, c| acc + c.weight)
    }

    /// Weighted mean across all centroids; 0 when empty.
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0.0 {
            return 0.0;
        }
        self.centroid_fold(|acc, c| acc + c.mean * c.weight) / count
    }

    /// Quantile estimate for q in [0, 1]; None when the sketch is empty.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.inner.as_ref().map(|td| td.estimate_quantile(q))
    }

    /// Absorb another sketch. Associative up to the compression tolerance.
    pub fn merge(&mut self, other: &LatencySketch) {
        let Some(theirs) = other.inner.as_ref() else {
            return;
        };
        let mut centroids: Vec<Centroid> = match self.inner.as_ref() {
            Some(ours) => ours
                .centroids()
                .iter()
                .map(|c| Centroid::new(c.mean, c.weight))
                .collect(),
            None => Vec::new(),
        };
        centroids.extend(
            theirs
                .centroids()
                .iter()
                .map(|c| Centroid::new(c.mean, c.weight)),
        );
        centroids.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        let mut merged = TDigest::from_centroids(centroids);
        merged.compress(COMPRESSION);
        self.inner = Some(merged);
    }

    pub fn encode(&self) -> Result<Vec<u8>, SketchError> {
        let blob = match self.inner.as_ref() {
            Some(td) => {
                let centroids = td.centroids();
                SketchBlob {
                    means: centroids.iter().map(|c| c.mean).collect(),
                    weights: centroids.iter().map(|c| c.weight).collect(),
                }
            }
            None => SketchBlob {
                means: Vec::new(),
                weights: Vec::new(),
            },
        };
        let payload =
            wincode::serialize(&blob).map_err(|e| SketchError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(BLOB_VERSION);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a stored blob. Empty input decodes to the empty sketch so rows
    /// written before a sketch existed stay readable.
    pub fn decode(bytes: &[u8]) -> Result<Self, SketchError> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        if bytes[0] != BLOB_VERSION {
            return Err(SketchError::Decode(format!(
                "unsupported sketch version {}",
                bytes[0]
            )));
        }
        let blob: SketchBlob =
            wincode::deserialize(&bytes[1..]).map_err(|e| SketchError::Decode(e.to_string()))?;
        if blob.means.len() != blob.weights.len() {
            return Err(SketchError::Decode(format!(
                "centroid mean/weight length mismatch: {} vs {}",
                blob.means.len(),
                blob.weights.len()
            )));
        }
        let mut centroids: Vec<Centroid> = blob
            .means
            .into_iter()
            .zip(blob.weights)
            .filter(|(m, w)| m.is_finite() && *w > 0.0)
            .map(|(m, w)| Centroid::new(m, w))
            .collect();
        if centroids.is_empty() {
            return Ok(Self::empty());
        }
        centroids.sort_by(|a, b| a.mean.total_cmp(&b.mean));
        Ok(Self {
            inner: Some(TDigest::from_centroids(centroids)),
        })
    }

    fn centroid_fold(&self, f: impl Fn(f64, &Centroid) -> f64) -> f64 {
        match self.inner.as_ref() {
            Some(td) => td.centroids().iter().fold(0.0, |acc, c| f(acc, c)),
            None => 0.0,
        }
    }
}
