use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EPS: f64 = f64::EPSILON;

/// Latent Dirichlet allocation fitted with batch variational Bayes.
/// Works on real-valued (e.g. TF-IDF weighted) document-term rows.
#[derive(Debug, Clone)]
pub struct Lda {
    pub n_topics: usize,
    pub doc_topic_prior: f64,
    pub topic_word_prior: f64,
    pub max_iter: usize,
    pub max_doc_update_iter: usize,
    pub mean_change_tol: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct LdaFit {
    /// Rows sum to 1.
    pub doc_topic: Vec<Vec<f64>>,
    /// Unnormalized topic-word weights (`n_topics × n_terms`).
    pub components: Vec<Vec<f64>>,
}

/// Sparse view of one document: term ids and weights.
struct DocTerms {
    ids: Vec<usize>,
    counts: Vec<f64>,
}

impl Lda {
    pub fn new(n_topics: usize) -> Self {
        let prior = 1.0 / n_topics.max(1) as f64;
        Self {
            n_topics,
            doc_topic_prior: prior,
            topic_word_prior: prior,
            max_iter: 10,
            max_doc_update_iter: 100,
            mean_change_tol: 1e-3,
            seed: 42,
        }
    }

    pub fn fit_transform(&self, rows: &[Vec<f64>]) -> Result<LdaFit, String> {
        if self.n_topics == 0 {
            return Err("number of topics must be at least 1".to_string());
        }
        let n_terms = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || n_terms == 0 {
            return Err("topic modeling needs a non-empty document-term matrix".to_string());
        }
        let docs: Vec<DocTerms> = rows.iter().map(|r| sparse(r)).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut components: Vec<Vec<f64>> = (0..self.n_topics)
            .map(|_| (0..n_terms).map(|_| sample_gamma(&mut rng, 100.0, 0.01)).collect())
            .collect();
        let mut exp_topic_word = exp_dirichlet_expectation_rows(&components);

        for _ in 0..self.max_iter {
            let (_, stats) = self.e_step(&docs, &exp_topic_word, n_terms, &mut rng, true);
            for (k, row) in components.iter_mut().enumerate() {
                for (w, value) in row.iter_mut().enumerate() {
                    *value = self.topic_word_prior + stats[k][w] * exp_topic_word[k][w];
                }
            }
            exp_topic_word = exp_dirichlet_expectation_rows(&components);
        }

        let (gamma, _) = self.e_step(&docs, &exp_topic_word, n_terms, &mut rng, false);
        let doc_topic = gamma
            .into_iter()
            .map(|row| {
                let total: f64 = row.iter().sum();
                if total > 0.0 {
                    row.iter().map(|v| v / total).collect()
                } else {
                    vec![1.0 / self.n_topics as f64; self.n_topics]
                }
            })
            .collect();
        Ok(LdaFit {
            doc_topic,
            components,
        })
    }

    fn e_step(
        &self,
        docs: &[DocTerms],
        exp_topic_word: &[Vec<f64>],
        n_terms: usize,
        rng: &mut StdRng,
        collect_stats: bool,
    ) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        let k = self.n_topics;
        let mut gammas = Vec::with_capacity(docs.len());
        let mut stats = if collect_stats {
            vec![vec![0.0; n_terms]; k]
        } else {
            Vec::new()
        };

        for doc in docs {
            let mut gamma: Vec<f64> = (0..k).map(|_| sample_gamma(rng, 100.0, 0.01)).collect();
            if doc.ids.is_empty() {
                gammas.push(gamma);
                continue;
            }
            let mut exp_doc_topic = exp_dirichlet_expectation(&gamma);
            let mut norm_phi = phi_norm(&exp_doc_topic, exp_topic_word, &doc.ids);

            for _ in 0..self.max_doc_update_iter {
                let previous = gamma.clone();
                for t in 0..k {
                    let dot: f64 = doc
                        .ids
                        .iter()
                        .zip(&doc.counts)
                        .zip(&norm_phi)
                        .map(|((&w, &c), &n)| c / n * exp_topic_word[t][w])
                        .sum();
                    gamma[t] = exp_doc_topic[t] * dot + self.doc_topic_prior;
                }
                exp_doc_topic = exp_dirichlet_expectation(&gamma);
                norm_phi = phi_norm(&exp_doc_topic, exp_topic_word, &doc.ids);
                let change = gamma
                    .iter()
                    .zip(&previous)
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
                    / k as f64;
                if change < self.mean_change_tol {
                    break;
                }
            }

            if collect_stats {
                for t in 0..k {
                    for ((&w, &c), &n) in doc.ids.iter().zip(&doc.counts).zip(&norm_phi) {
                        stats[t][w] += exp_doc_topic[t] * c / n;
                    }
                }
            }
            gammas.push(gamma);
        }
        (gammas, stats)
    }
}

fn sparse(row: &[f64]) -> DocTerms {
    let mut ids = Vec::new();
    let mut counts = Vec::new();
    for (i, &v) in row.iter().enumerate() {
        if v > 0.0 {
            ids.push(i);
            counts.push(v);
        }
    }
    DocTerms { ids, counts }
}

fn phi_norm(exp_doc_topic: &[f64], exp_topic_word: &[Vec<f64>], ids: &[usize]) -> Vec<f64> {
    ids.iter()
        .map(|&w| {
            exp_doc_topic
                .iter()
                .zip(exp_topic_word)
                .map(|(d, row)| d * row[w])
                .sum::<f64>()
                + EPS
        })
        .collect()
}

fn exp_dirichlet_expectation(alpha: &[f64]) -> Vec<f64> {
    let psi_total = digamma(alpha.iter().sum());
    alpha.iter().map(|a| (digamma(*a) - psi_total).exp()).collect()
}

fn exp_dirichlet_expectation_rows(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rows.iter().map(|r| exp_dirichlet_expectation(r)).collect()
}

/// Digamma via recurrence up to x >= 6, then the asymptotic series.
pub fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    result + x.ln() - 0.5 * inv
        - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 * (1.0 / 252.0 - inv2 * (1.0 / 240.0))))
}

/// Marsaglia-Tsang sampler for Gamma(shape, scale), shape >= 1.
fn sample_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = standard_normal(rng);
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.gen();
        if u.ln() < 0.5 * x * x + d - d * v + d * v.ln() {
            return d * v * scale;
        }
    }
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digamma_matches_known_values() {
        // psi(1) = -euler_gamma
        assert!((digamma(1.0) + 0.577_215_664_901_532_9).abs() < 1e-9);
        assert!((digamma(0.5) - (-1.963_510_026_021_423_5)).abs() < 1e-9);
        assert!((digamma(10.0) - 2.251_752_589_066_721).abs() < 1e-9);
    }

    #[test]
    fn gamma_samples_center_on_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 2000;
        let mean: f64 = (0..n).map(|_| sample_gamma(&mut rng, 100.0, 0.01)).sum::<f64>() / n as f64;
        assert!((mean - 1.0).abs() < 0.02);
    }

    #[test]
    fn normalized_and_reproducible() {
        let rows = vec![
            vec![1.0, 1.0, 0.0, 0.0],
            vec![2.0, 1.0, 0.0, 0.0],
            vec![1.0, 2.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 1.0],
            vec![0.0, 0.0, 2.0, 1.0],
            vec![0.0, 0.0, 1.0, 2.0],
        ];
        let fit = Lda::new(2).fit_transform(&rows).unwrap();
        assert_eq!(fit.doc_topic.len(), 6);
        for row in &fit.doc_topic {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        let again = Lda::new(2).fit_transform(&rows).unwrap();
        assert_eq!(fit.doc_topic, again.doc_topic);
        assert_eq!(fit.components.len(), 2);
        assert_eq!(fit.components[0].len(), 4);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(Lda::new(3).fit_transform(&[]).is_err());
        assert!(Lda::new(0).fit_transform(&[vec![1.0]]).is_err());
    }
}
