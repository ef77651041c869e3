//! # Return Series Utilities
//!
//! $$
//! \hat\Sigma_{ij} = \frac{1}{T-1}\sum_{t=1}^{T}(r_{it}-\bar r_i)(r_{jt}-\bar r_j)
//! $$
//!
//! Alignment, sample moments and small dense linear-algebra helpers shared by
//! the estimator and the optimizers.

pub(crate) fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

/// Unbiased sample covariance of two equally long series.
pub(crate) fn sample_covariance(x: &[f64], y: &[f64]) -> f64 {
  let n = x.len().min(y.len());
  if n < 2 {
    return 0.0;
  }

  let mx = sample_mean(&x[..n]);
  let my = sample_mean(&y[..n]);
  let mut acc = 0.0;
  for t in 0..n {
    acc += (x[t] - mx) * (y[t] - my);
  }
  acc / (n - 1) as f64
}

/// Truncate every series to the shortest common length, keeping the most recent observations.
pub fn align_return_series(all_returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
  let min_len = all_returns.iter().map(|r| r.len()).min().unwrap_or(0);
  all_returns
    .iter()
    .map(|r| r[r.len().saturating_sub(min_len)..].to_vec())
    .collect()
}

/// Sample covariance matrix of aligned return series.
pub fn covariance_matrix(aligned_returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
  let n = aligned_returns.len();
  let mut cov = vec![vec![0.0; n]; n];

  for i in 0..n {
    for j in i..n {
      let c = sample_covariance(&aligned_returns[i], &aligned_returns[j]);
      cov[i][j] = c;
      cov[j][i] = c;
    }
  }

  cov
}

/// Average off-diagonal correlation implied by a covariance matrix.
///
/// Pairs involving a zero-variance asset are skipped. Returns 0 when no pair qualifies.
pub fn average_correlation(cov: &[Vec<f64>]) -> f64 {
  let n = cov.len();
  let mut acc = 0.0;
  let mut pairs = 0usize;

  for i in 0..n {
    for j in (i + 1)..n {
      let denom = (cov[i][i] * cov[j][j]).sqrt();
      if denom > 1e-15 {
        acc += (cov[i][j] / denom).clamp(-1.0, 1.0);
        pairs += 1;
      }
    }
  }

  if pairs == 0 {
    0.0
  } else {
    acc / pairs as f64
  }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn mat_vec_mul(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
  mat
    .iter()
    .map(|row| row.iter().zip(v.iter()).map(|(a, b)| a * b).sum())
    .collect()
}

/// `A^T v` for a row-major `A`.
pub(crate) fn mat_t_vec_mul(mat: &[Vec<f64>], v: &[f64], cols: usize) -> Vec<f64> {
  let mut out = vec![0.0; cols];
  for (row, &vi) in mat.iter().zip(v.iter()) {
    for (o, &a) in out.iter_mut().zip(row.iter()) {
      *o += a * vi;
    }
  }
  out
}

/// Portfolio variance `w^T Sigma w`, floored at zero.
pub(crate) fn quad_form(cov: &[Vec<f64>], w: &[f64]) -> f64 {
  dot(w, &mat_vec_mul(cov, w)).max(0.0)
}
