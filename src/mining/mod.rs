//! Classical text mining over the retrieved VOC corpus: TF-IDF features,
//! k-means clustering, co-occurrence centrality and LDA topics.

pub mod kmeans;
pub mod lda;
pub mod network;
pub mod tfidf;
pub mod tokenize;

pub use kmeans::KMeans;
pub use lda::Lda;
pub use network::degree_centrality;
pub use tfidf::{TfidfMatrix, TfidfVectorizer};

/// Indices of the `n` largest weights, largest first. Ties keep the lower index.
pub fn top_indices(weights: &[f64], n: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..weights.len()).collect();
    idx.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]).then(a.cmp(&b)));
    idx.truncate(n);
    idx
}

/// Rounds to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
