use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A ragged or mis-sized nested array.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ShapeError(pub String);

/// Dense row-major `f64` matrix.
///
/// Travels on the wire as nested arrays (`[[x, y], [x, y], ...]`) and is
/// rejected on decode if any row length differs from the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Wrap a flat row-major buffer.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, ShapeError> {
        if rows * cols != data.len() {
            return Err(ShapeError(format!(
                "buffer holds {} values, shape {rows}x{cols} needs {}",
                data.len(),
                rows * cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ShapeError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(ShapeError(format!(
                    "row {i} has {} values, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows().map(<[f64]>::to_vec).collect()
    }
}

impl TryFrom<Vec<Vec<f64>>> for Matrix {
    type Error = ShapeError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Matrix::from_rows(rows)
    }
}

impl From<Matrix> for Vec<Vec<f64>> {
    fn from(m: Matrix) -> Self {
        m.to_rows()
    }
}

/// Dense row-major 3-D `f64` array, used for per-node bounding volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Vec<f64>>>", into = "Vec<Vec<Vec<f64>>>")]
pub struct Array3 {
    shape: [usize; 3],
    data: Vec<f64>,
}

impl Array3 {
    pub fn zeros(shape: [usize; 3]) -> Self {
        Self {
            shape,
            data: vec![0.0; shape[0] * shape[1] * shape[2]],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        (i * self.shape[1] + j) * self.shape[2]
    }

    /// The innermost lane at `[i, j, ..]`.
    pub fn lane(&self, i: usize, j: usize) -> &[f64] {
        let start = self.offset(i, j);
        &self.data[start..start + self.shape[2]]
    }

    pub fn lane_mut(&mut self, i: usize, j: usize) -> &mut [f64] {
        let start = self.offset(i, j);
        let len = self.shape[2];
        &mut self.data[start..start + len]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn to_nested(&self) -> Vec<Vec<Vec<f64>>> {
        (0..self.shape[0])
            .map(|i| {
                (0..self.shape[1])
                    .map(|j| self.lane(i, j).to_vec())
                    .collect()
            })
            .collect()
    }
}

impl TryFrom<Vec<Vec<Vec<f64>>>> for Array3 {
    type Error = ShapeError;

    fn try_from(outer: Vec<Vec<Vec<f64>>>) -> Result<Self, Self::Error> {
        let d1 = outer.first().map_or(0, Vec::len);
        let d2 = outer
            .first()
            .and_then(|plane| plane.first())
            .map_or(0, Vec::len);
        let mut data = Vec::with_capacity(outer.len() * d1 * d2);
        for (i, plane) in outer.iter().enumerate() {
            if plane.len() != d1 {
                return Err(ShapeError(format!(
                    "plane {i} has {} rows, expected {d1}",
                    plane.len()
                )));
            }
            for (j, lane) in plane.iter().enumerate() {
                if lane.len() != d2 {
                    return Err(ShapeError(format!(
                        "lane [{i}, {j}] has {} values, expected {d2}",
                        lane.len()
                    )));
                }
                data.extend_from_slice(lane);
            }
        }
        Ok(Self {
            shape: [outer.len(), d1, d2],
            data,
        })
    }
}

impl From<Array3> for Vec<Vec<Vec<f64>>> {
    fn from(a: Array3) -> Self {
        a.to_nested()
    }
}

/// Query strategy a fitted flat index resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    Brute,
    KdTree,
}

impl std::fmt::Display for FitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitMethod::Brute => write!(f, "brute"),
            FitMethod::KdTree => write!(f, "kd_tree"),
        }
    }
}

/// One query hit: the original row index of a training point and its
/// distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}
