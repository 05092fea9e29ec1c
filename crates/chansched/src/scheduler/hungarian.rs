//! Kuhn-Munkres minimum-cost assignment.
//!
//! Potentials formulation, O(rows^2 * cols), for a rectangular matrix with
//! `rows <= cols`. Callers encoding a maximisation negate their weights, and
//! mark absent edges with [`FORBIDDEN`]; forbidden pairs can still show up in
//! the returned assignment and must be filtered out afterwards.

/// Cost standing in for "no edge". Large enough that any real assignment is
/// preferred, small enough to leave arithmetic finite.
pub const FORBIDDEN: f64 = 1e18;

/// Returns, for each row, the column assigned to it. Panics if
/// `cost.len() > cost[0].len()`.
pub fn solve(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    if n == 0 {
        return Vec::new();
    }
    let m = cost[0].len();
    assert!(n <= m, "cost matrix must have rows <= cols");

    // 1-based arrays; p[j] is the row matched to column j, 0 meaning none.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Unwind the augmenting path.
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=m {
        if p[j] > 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}
