use approx::assert_relative_eq;
use ndarray::{array, Array1, Array2};
use relaxopt_rs::statistics::{correlation, multifit_covar, standard_errors};

/// Jacobian of the straight line `a + b x`.
fn line_jacobian(x: &Array1<f64>) -> Array2<f64> {
    let mut jac = Array2::ones((x.len(), 2));
    jac.column_mut(1).assign(x);
    jac
}

#[test]
fn test_straight_line_errors() {
    let x = array![0.0, 1.0, 2.0, 3.0, 4.0];
    let sigma = 0.5;
    let weights = Array1::from_elem(x.len(), 1.0 / (sigma * sigma));
    let covar = multifit_covar(&line_jacobian(&x), 0.0, Some(&weights)).unwrap();
    assert!(covar.flagged.is_empty());

    // Textbook least squares: var(b) = sigma^2 / Sxx, var(a) = sigma^2 sum(x^2) / (n Sxx).
    let n = x.len() as f64;
    let mean = x.sum() / n;
    let sxx: f64 = x.iter().map(|v| (v - mean).powi(2)).sum();
    let sum_x2: f64 = x.iter().map(|v| v * v).sum();
    let errors = standard_errors(&covar.matrix);
    assert_relative_eq!(errors[1], sigma / sxx.sqrt(), max_relative = 1e-10);
    assert_relative_eq!(errors[0], (sigma * sigma * sum_x2 / (n * sxx)).sqrt(), max_relative = 1e-10);

    let correl = correlation(&covar.matrix);
    assert_relative_eq!(correl[[0, 0]], 1.0);
    assert!(correl[[0, 1]] < 0.0);
    assert_relative_eq!(correl[[0, 1]], correl[[1, 0]], epsilon = 1e-12);
}

#[test]
fn test_dependent_columns_flagged() {
    let x = array![1.0, 2.0, 3.0];
    let mut jac = Array2::zeros((3, 3));
    jac.column_mut(0).assign(&x);
    jac.column_mut(1).fill(1.0);
    jac.column_mut(2).assign(&(&x * 2.0));
    let covar = multifit_covar(&jac, 1e-10, None).unwrap();
    assert_eq!(covar.flagged, vec![2]);
    assert_eq!(covar.matrix.row(2).sum(), 0.0);
    assert_eq!(covar.matrix.column(2).sum(), 0.0);
    assert!(covar.matrix[[0, 0]] > 0.0);
}
