use neighbors_json::types::Matrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The unit square's corners, in row order (0,0), (1,0), (0,1), (1,1).
pub fn unit_square() -> Matrix {
    Matrix::from_rows(vec![
        vec![0.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 1.0],
    ])
    .unwrap()
}

/// `n` random points of dimension `dims`, uniform in [-1, 1].
pub fn random_points(n: usize, dims: usize, seed: u64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..n * dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Matrix::new(n, dims, data).unwrap()
}

/// Points clustered around `n_clusters` random centers, with uniform noise of
/// half-width `noise`.
pub fn clustered_points(n_clusters: usize, n_per_cluster: usize, dims: usize, noise: f64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(123);
    let centers: Vec<Vec<f64>> = (0..n_clusters)
        .map(|_| (0..dims).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect();

    let mut rows = Vec::with_capacity(n_clusters * n_per_cluster);
    for center in &centers {
        for _ in 0..n_per_cluster {
            rows.push(
                center
                    .iter()
                    .map(|&c| c + rng.gen_range(-noise..noise))
                    .collect(),
            );
        }
    }
    Matrix::from_rows(rows).unwrap()
}

/// Integer grid points, which produce many distance ties.
pub fn grid_points(side: usize) -> Matrix {
    let rows = (0..side * side)
        .map(|i| vec![(i % side) as f64, (i / side) as f64])
        .collect();
    Matrix::from_rows(rows).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_points_are_seeded() {
        let a = random_points(10, 3, 7);
        let b = random_points(10, 3, 7);
        assert_eq!(a, b);
        assert_eq!(a.shape(), (10, 3));
    }

    #[test]
    fn test_clustered_points() {
        let points = clustered_points(3, 5, 4, 0.1);
        assert_eq!(points.shape(), (15, 4));
    }
}
