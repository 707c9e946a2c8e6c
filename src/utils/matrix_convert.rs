//! Copies between ndarray matrices and nalgebra's `DMatrix`.
//!
//! Everything public works in ndarray; QR and Cholesky come from nalgebra.

use nalgebra::DMatrix;
use ndarray::Array2;

pub fn ndarray_to_nalgebra(arr: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = arr.dim();
    DMatrix::from_fn(rows, cols, |i, j| arr[[i, j]])
}

pub fn nalgebra_to_ndarray(mat: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(mat.shape(), |(i, j)| mat[(i, j)])
}
