//! Thin-plate spline interpolation over scattered control points.
//!
//! Used to turn coarse adaptive-normalization grids into smooth per-pixel
//! location and scale surfaces. The interpolant is C1 away from the nodes
//! and reproduces affine trends exactly.

use ndarray::Array2;

use crate::consts::EPSILON;
use crate::error::{DenebError, Result};

/// Radial basis kernel U(r) = r^2 ln r, expressed on the squared distance.
fn kernel(d2: f64) -> f64 {
    if d2 < EPSILON { 0.0 } else { 0.5 * d2 * d2.ln() }
}

#[derive(Clone, Debug)]
pub struct ThinPlateSpline {
    nodes: Vec<(f64, f64)>,
    weights: Vec<f64>,
    affine: [f64; 3],
}

impl ThinPlateSpline {
    /// Fit an interpolating spline through `(nodes[i], values[i])`.
    ///
    /// Fewer than three nodes cannot pin down the affine part; those cases
    /// collapse to the constant mean of the supplied values, which is the
    /// exact behavior wanted for 1x1 adaptive grids.
    pub fn fit(nodes: &[(f64, f64)], values: &[f64]) -> Result<Self> {
        if nodes.is_empty() || nodes.len() != values.len() {
            return Err(DenebError::Degenerate(
                "thin-plate spline needs at least one node".into(),
            ));
        }
        let n = nodes.len();
        if n < 3 || values.iter().all(|v| (v - values[0]).abs() < EPSILON) {
            let mean = values.iter().sum::<f64>() / n as f64;
            return Ok(Self {
                nodes: Vec::new(),
                weights: Vec::new(),
                affine: [mean, 0.0, 0.0],
            });
        }

        let size = n + 3;
        let mut system = Array2::<f64>::zeros((size, size));
        let mut rhs = vec![0.0f64; size];
        for i in 0..n {
            for j in 0..n {
                let dx = nodes[i].0 - nodes[j].0;
                let dy = nodes[i].1 - nodes[j].1;
                system[[i, j]] = kernel(dx * dx + dy * dy);
            }
            system[[i, n]] = 1.0;
            system[[i, n + 1]] = nodes[i].0;
            system[[i, n + 2]] = nodes[i].1;
            system[[n, i]] = 1.0;
            system[[n + 1, i]] = nodes[i].0;
            system[[n + 2, i]] = nodes[i].1;
            rhs[i] = values[i];
        }

        let solution = solve(system, rhs)?;
        Ok(Self {
            nodes: nodes.to_vec(),
            weights: solution[..n].to_vec(),
            affine: [solution[n], solution[n + 1], solution[n + 2]],
        })
    }

    pub fn eval(&self, x: f64, y: f64) -> f64 {
        let mut value = self.affine[0] + self.affine[1] * x + self.affine[2] * y;
        for (node, w) in self.nodes.iter().zip(self.weights.iter()) {
            let dx = x - node.0;
            let dy = y - node.1;
            value += w * kernel(dx * dx + dy * dy);
        }
        value
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let mut pivot = col;
        for row in col + 1..n {
            if a[[row, col]].abs() > a[[pivot, col]].abs() {
                pivot = row;
            }
        }
        if a[[pivot, col]].abs() < EPSILON {
            return Err(DenebError::Degenerate(
                "singular thin-plate spline system".into(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                let tmp = a[[col, k]];
                a[[col, k]] = a[[pivot, k]];
                a[[pivot, k]] = tmp;
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[[row, k]] * x[k];
        }
        x[row] = sum / a[[row, row]];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_control_points() {
        let nodes = [
            (0.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (1.0, 1.0),
            (0.5, 0.5),
        ];
        let values = [0.1, 0.2, 0.3, 0.4, 0.25];
        let spline = ThinPlateSpline::fit(&nodes, &values).unwrap();
        for (node, &v) in nodes.iter().zip(values.iter()) {
            assert!((spline.eval(node.0, node.1) - v).abs() < 1e-8);
        }
    }

    #[test]
    fn reproduces_affine_surfaces() {
        let nodes = [(0.0, 0.0), (2.0, 0.0), (0.0, 2.0), (2.0, 2.0)];
        let values: Vec<f64> = nodes.iter().map(|&(x, y)| 0.5 + 0.1 * x - 0.2 * y).collect();
        let spline = ThinPlateSpline::fit(&nodes, &values).unwrap();
        assert!((spline.eval(1.0, 1.0) - 0.4).abs() < 1e-8);
    }

    #[test]
    fn single_node_is_constant() {
        let spline = ThinPlateSpline::fit(&[(3.0, 4.0)], &[0.7]).unwrap();
        assert_eq!(spline.eval(0.0, 0.0), 0.7);
        assert_eq!(spline.eval(100.0, -5.0), 0.7);
    }
}
