use approx::assert_relative_eq;
use relaxopt_rs::statistics::{bucket, geometric_mean, mean, std};

#[test]
fn test_std_fixtures() {
    let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    assert_relative_eq!(std(&values, None, 1), 2.138089935299395, epsilon = 1e-12);
    assert_relative_eq!(std(&values, None, 0), 2.0, epsilon = 1e-12);
    assert_eq!(std(&[3.5], None, 1), 0.0);
}

#[test]
fn test_std_skips_flagged_values() {
    let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0, 1e6];
    let mut skip = vec![false; values.len()];
    skip[8] = true;
    assert_relative_eq!(std(&values, Some(&skip), 1), 2.138089935299395, epsilon = 1e-12);
}

#[test]
fn test_bucket_fixture() {
    let values: Vec<f64> = (0..100).map(|i| 2.0 * i as f64).collect();
    let bins = bucket(&values, 0.0, 200.0, 100).unwrap();
    assert_eq!(bins.len(), 100);
    for bin in &bins {
        assert_relative_eq!(*bin, 0.01, epsilon = 1e-12);
    }
    assert_relative_eq!(bins.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
}

#[test]
fn test_bucket_is_not_renormalised() {
    let bins = bucket(&[0.5, 1.5, 5.0, -1.0], 0.0, 2.0, 2).unwrap();
    assert_relative_eq!(bins[0], 0.25);
    assert_relative_eq!(bins[1], 0.25);
    assert!(bucket(&[1.0], 2.0, 2.0, 4).is_err());
}

#[test]
fn test_means() {
    assert_relative_eq!(mean(&[1.0, 2.0, 6.0]), 3.0);
    assert!(mean(&[]).is_nan());
    assert_relative_eq!(geometric_mean(&[1.0, 10.0, 100.0]).unwrap(), 10.0, epsilon = 1e-12);
    assert!(geometric_mean(&[1.0, -1.0]).is_err());
    assert!(geometric_mean(&[]).is_err());
}
