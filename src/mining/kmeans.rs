use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub seed: u64,
    pub tol: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centers: Vec<Vec<f64>>,
    pub inertia: f64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            n_init: 10,
            max_iter: 300,
            seed: 42,
            tol: 1e-4,
        }
    }

    /// Best of `n_init` k-means++ seeded Lloyd runs. `k` is clamped to the
    /// number of points and must end up at least 2.
    pub fn fit(&self, points: &[Vec<f64>]) -> Result<KMeansFit, String> {
        let k = self.k.min(points.len());
        if k < 2 {
            return Err(format!(
                "at least 2 clusters are required (requested {}, {} documents)",
                self.k,
                points.len()
            ));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<KMeansFit> = None;
        for _ in 0..self.n_init.max(1) {
            let seeds = plus_plus_seeds(points, k, &mut rng);
            let fit = self.lloyd(points, seeds);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }
        best.ok_or_else(|| "k-means produced no result".to_string())
    }

    fn lloyd(&self, points: &[Vec<f64>], mut centers: Vec<Vec<f64>>) -> KMeansFit {
        let dim = points[0].len();
        let mut labels = vec![0usize; points.len()];
        for _ in 0..self.max_iter {
            for (i, p) in points.iter().enumerate() {
                labels[i] = nearest(p, &centers).0;
            }

            let mut sums = vec![vec![0.0; dim]; centers.len()];
            let mut counts = vec![0usize; centers.len()];
            for (p, &l) in points.iter().zip(&labels) {
                counts[l] += 1;
                for (s, v) in sums[l].iter_mut().zip(p) {
                    *s += v;
                }
            }
            let mut shift = 0.0;
            for c in 0..centers.len() {
                let next = if counts[c] == 0 {
                    farthest_point(points, &centers).to_vec()
                } else {
                    sums[c].iter().map(|s| s / counts[c] as f64).collect()
                };
                shift += sq_dist(&centers[c], &next);
                centers[c] = next;
            }
            if shift <= self.tol * self.tol {
                break;
            }
        }

        let mut inertia = 0.0;
        for (i, p) in points.iter().enumerate() {
            let (label, d) = nearest(p, &centers);
            labels[i] = label;
            inertia += d;
        }
        KMeansFit {
            labels,
            centers,
            inertia,
        }
    }
}

fn plus_plus_seeds(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centers = vec![points[rng.gen_range(0..points.len())].clone()];
    let mut closest: Vec<f64> = points.iter().map(|p| sq_dist(p, &centers[0])).collect();
    while centers.len() < k {
        let total: f64 = closest.iter().sum();
        let idx = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = points.len() - 1;
            for (i, d) in closest.iter().enumerate() {
                if target < *d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        };
        let center = points[idx].clone();
        for (c, p) in closest.iter_mut().zip(points) {
            *c = c.min(sq_dist(p, &center));
        }
        centers.push(center);
    }
    centers
}

fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centers.iter().enumerate() {
        let d = sq_dist(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn farthest_point<'a>(points: &'a [Vec<f64>], centers: &[Vec<f64>]) -> &'a [f64] {
    let mut best = (0, -1.0);
    for (i, p) in points.iter().enumerate() {
        let d = nearest(p, centers).1;
        if d > best.1 {
            best = (i, d);
        }
    }
    &points[best.0]
}

pub fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::KMeans;

    fn blobs() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.1],
            vec![0.1, 0.0],
            vec![0.05, 0.05],
            vec![5.0, 5.1],
            vec![5.1, 5.0],
            vec![5.05, 4.95],
        ]
    }

    #[test]
    fn separates_two_blobs() {
        let fit = KMeans::new(2).fit(&blobs()).unwrap();
        assert_eq!(fit.labels[0], fit.labels[1]);
        assert_eq!(fit.labels[1], fit.labels[2]);
        assert_eq!(fit.labels[3], fit.labels[4]);
        assert_ne!(fit.labels[0], fit.labels[3]);
        assert!(fit.inertia < 0.1);
    }

    #[test]
    fn deterministic_for_a_seed() {
        let a = KMeans::new(3).fit(&blobs()).unwrap();
        let b = KMeans::new(3).fit(&blobs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clamps_k_and_rejects_single_cluster() {
        let two = vec![vec![0.0], vec![1.0]];
        let fit = KMeans::new(5).fit(&two).unwrap();
        assert_eq!(fit.centers.len(), 2);
        assert_ne!(fit.labels[0], fit.labels[1]);

        assert!(KMeans::new(1).fit(&blobs()).is_err());
        assert!(KMeans::new(3).fit(&[vec![1.0]]).is_err());
    }
}
