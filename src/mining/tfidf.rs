use std::collections::{BTreeMap, HashMap};

use super::tokenize::tokenize;

/// Dense document-term matrix with L2-normalized rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TfidfMatrix {
    pub features: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Document-frequency bound, either absolute or as a fraction of the corpus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DocFreq {
    Count(usize),
    Fraction(f64),
}

impl DocFreq {
    fn resolve(self, n_docs: usize) -> f64 {
        match self {
            DocFreq::Count(c) => c as f64,
            DocFreq::Fraction(f) => f * n_docs as f64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    pub max_features: usize,
    pub min_df: DocFreq,
    pub max_df: DocFreq,
}

impl Default for TfidfVectorizer {
    fn default() -> Self {
        Self {
            max_features: 2000,
            min_df: DocFreq::Fraction(0.01),
            max_df: DocFreq::Fraction(0.9),
        }
    }
}

impl TfidfVectorizer {
    pub fn fit_transform<S: AsRef<str>>(&self, docs: &[S]) -> Result<TfidfMatrix, String> {
        if docs.is_empty() {
            return Err("no documents to vectorize".to_string());
        }
        let n_docs = docs.len();
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d.as_ref())).collect();

        // term -> (document frequency, corpus frequency)
        let mut stats: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for tokens in &tokenized {
            let mut seen: Vec<&str> = Vec::new();
            for tok in tokens {
                let entry = stats.entry(tok.as_str()).or_insert((0, 0));
                entry.1 += 1;
                if !seen.contains(&tok.as_str()) {
                    seen.push(tok.as_str());
                    entry.0 += 1;
                }
            }
        }

        let min_count = self.min_df.resolve(n_docs);
        let max_count = self.max_df.resolve(n_docs);
        if max_count < min_count {
            return Err("max_df corresponds to fewer documents than min_df".to_string());
        }
        let mut kept: Vec<(&str, usize, usize)> = stats
            .into_iter()
            .filter(|(_, (df, _))| (*df as f64) >= min_count && (*df as f64) <= max_count)
            .map(|(term, (df, tf))| (term, df, tf))
            .collect();
        if kept.len() > self.max_features {
            // Highest corpus frequency wins; ties keep alphabetical order.
            kept.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));
            kept.truncate(self.max_features);
            kept.sort_by(|a, b| a.0.cmp(b.0));
        }
        if kept.is_empty() {
            return Err("no terms remain after document-frequency pruning".to_string());
        }

        let features: Vec<String> = kept.iter().map(|(t, _, _)| t.to_string()).collect();
        let index: HashMap<&str, usize> = kept.iter().enumerate().map(|(i, (t, _, _))| (*t, i)).collect();
        let idf: Vec<f64> = kept
            .iter()
            .map(|(_, df, _)| ((1.0 + n_docs as f64) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();

        let rows = tokenized
            .iter()
            .map(|tokens| {
                let mut row = vec![0.0; features.len()];
                for tok in tokens {
                    if let Some(&i) = index.get(tok.as_str()) {
                        row[i] += 1.0;
                    }
                }
                for (value, weight) in row.iter_mut().zip(&idf) {
                    *value *= weight;
                }
                l2_normalize(&mut row);
                row
            })
            .collect();

        Ok(TfidfMatrix { features, rows })
    }
}

fn l2_normalize(row: &mut [f64]) {
    let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in row.iter_mut() {
            *v /= norm;
        }
    }
}

/// Column sums over the selected rows.
pub fn column_sums(rows: &[Vec<f64>], selected: &[usize]) -> Vec<f64> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![0.0; width];
    for &i in selected {
        if let Some(row) = rows.get(i) {
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
    }
    sums
}
