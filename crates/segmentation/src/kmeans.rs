//! k-means++ seeding followed by Lloyd iterations.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Cluster of each row.
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(point: ArrayView1<f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let d = squared_distance(point, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Pick `k` initial centers, each new one drawn with probability
/// proportional to its squared distance from the closest existing center.
fn seed_centroids<R: Rng + ?Sized>(data: &Array2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let n = data.nrows();
    let mut centroids = Array2::<f64>::zeros((k, data.ncols()));
    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut closest: Array1<f64> = data
        .axis_iter(Axis(0))
        .map(|p| squared_distance(p, data.row(first)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut pick = n - 1;
            for (i, d) in closest.iter().enumerate() {
                cumulative += d;
                if cumulative > target {
                    pick = i;
                    break;
                }
            }
            pick
        } else {
            // Every point coincides with a center already.
            rng.gen_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(chosen));
        for (i, p) in data.axis_iter(Axis(0)).enumerate() {
            let d = squared_distance(p, data.row(chosen));
            if d < closest[i] {
                closest[i] = d;
            }
        }
    }

    centroids
}

/// Runs at least one assignment pass, so every row gets a cluster even
/// when `max_iterations` is 0.
pub fn kmeans<R: Rng + ?Sized>(
    data: &Array2<f64>,
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> KMeansFit {
    let n = data.nrows();
    let mut centroids = seed_centroids(data, k, rng);
    let mut labels = vec![usize::MAX; n];
    let mut iterations = 0;
    let mut converged = false;
    let max_iterations = max_iterations.max(1);

    while iterations < max_iterations {
        iterations += 1;

        let mut changed = false;
        let mut distances = vec![0.0; n];
        for (i, point) in data.axis_iter(Axis(0)).enumerate() {
            let (mut c, mut d) = nearest(point, &centroids);
            // Ties keep the current cluster.
            if labels[i] != usize::MAX && labels[i] != c {
                let current = squared_distance(point, centroids.row(labels[i]));
                if current <= d {
                    (c, d) = (labels[i], current);
                }
            }
            if labels[i] != c {
                labels[i] = c;
                changed = true;
            }
            distances[i] = d;
        }

        let mut sums = Array2::<f64>::zeros((k, data.ncols()));
        let mut counts = vec![0usize; k];
        for (i, point) in data.axis_iter(Axis(0)).enumerate() {
            let mut row = sums.row_mut(labels[i]);
            row += &point;
            counts[labels[i]] += 1;
        }

        for c in 0..k {
            if counts[c] > 0 {
                let mean = &sums.row(c) / counts[c] as f64;
                centroids.row_mut(c).assign(&mean);
                continue;
            }
            // Empty cluster: take over the point farthest from its centroid,
            // as long as that leaves its donor cluster non-empty.
            let donor = (0..n)
                .filter(|&i| counts[labels[i]] > 1)
                .max_by(|&a, &b| distances[a].total_cmp(&distances[b]).then(b.cmp(&a)));
            if let Some(i) = donor {
                debug!(cluster = c, point = i, "Reseeding empty cluster");
                counts[labels[i]] -= 1;
                labels[i] = c;
                counts[c] = 1;
                distances[i] = 0.0;
                centroids.row_mut(c).assign(&data.row(i));
                changed = true;
            }
        }

        if !changed {
            converged = true;
            break;
        }
    }

    let inertia = data
        .axis_iter(Axis(0))
        .zip(&labels)
        .map(|(p, &c)| squared_distance(p, centroids.row(c)))
        .sum();

    KMeansFit {
        labels,
        centroids,
        inertia,
        iterations,
        converged,
    }
}
