//! Stream-power incision and hillslope diffusion on the pixel graph.
//!
//! Elevations here are offsets from the reference surface, so a cell at or
//! below zero is treated as sediment-covered and one above it as bedrock.

use log::debug;
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;

use crate::config::ErosionParams;
use crate::error::ConfigurationError;
use crate::flow::FlowRouting;
use crate::graph::CsrGraph;
use crate::pixel::PixelGrid;

const MAX_NEWTON_ITERATIONS: usize = 100;

/// Explicit diffusion sweeps allowed within one erosion sub-step.
pub const MAX_DIFFUSION_CYCLES: usize = 1 << 16;

/// Slope exponents this close to 1 use the closed-form solution.
const LINEAR_EXPONENT_EPS: f64 = 1e-10;

#[inline]
fn is_sediment(h: f64) -> bool {
    h <= 0.0
}

/// Per-cell incision coefficient K_f.
pub fn incision_coefficients(elevation: ArrayView1<f64>, params: &ErosionParams) -> Array1<f64> {
    elevation.mapv(|h| params.incision_rate(is_sediment(h)) * params.elevation_scaling(h))
}

/// Per-cell hillslope diffusivity K_d.
pub fn diffusivities(elevation: ArrayView1<f64>, params: &ErosionParams) -> Array1<f64> {
    elevation.mapv(|h| params.diffusivity(is_sediment(h)) * params.elevation_scaling(h))
}

/// Implicit stream-power incision over one sub-step.
///
/// Walks the stack receivers-first so each donor sees its receiver's new
/// elevation. Returns the erosion depth of every cell (never negative);
/// `elevation` itself is left untouched.
///
/// For n = 1:  h = (h₀ + F·h_r) / (1 + F),  F = K·A^m·Δt / L
/// Otherwise δ = h − h_r solves  δ + F·δⁿ = δ₀,  F = K·A^m·Δt / Lⁿ,  by Newton.
pub fn implicit_spl_erode(
    elevation: ArrayView1<f64>,
    routing: &FlowRouting,
    drainage_area: ArrayView1<f64>,
    kf: ArrayView1<f64>,
    params: &ErosionParams,
    dt: f64,
) -> Array1<f64> {
    let m = params.drainage_area_exponent;
    let n = params.slope_exponent;
    let linear = (n - 1.0).abs() < LINEAR_EXPONENT_EPS;
    let mut h_new = elevation.to_owned();

    for &node in routing.stack.iter() {
        let recv = routing.receivers[node];
        if recv == node {
            continue;
        }
        let h_old = elevation[node];
        let h_recv = h_new[recv];
        let dist = routing.receiver_distance[node];
        if h_old <= h_recv || !(dist > 0.0) {
            continue;
        }

        let ka = kf[node] * drainage_area[node].powf(m) * dt;
        let h = if linear {
            let f = ka / dist;
            (h_old + f * h_recv) / (1.0 + f)
        } else {
            h_recv + newton_relief(h_old - h_recv, ka / dist.powf(n), n, params.tolerance)
        };
        h_new[node] = h.max(h_recv);
    }

    let mut depth = &elevation - &h_new;
    depth.mapv_inplace(|d| d.max(0.0));
    depth
}

/// Solve δ + f·δⁿ = δ₀ for δ in [0, δ₀].
///
/// An iterate that would leave (0, δ₀] is halved instead.
fn newton_relief(delta0: f64, f: f64, n: f64, tol: f64) -> f64 {
    if !(delta0 > 0.0) {
        return 0.0;
    }
    let mut delta = delta0;
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let g = delta + f * delta.powf(n) - delta0;
        let dg = 1.0 + n * f * delta.powf(n - 1.0);
        let step = g / dg;
        let next = delta - step;
        delta = if next > 0.0 { next } else { 0.5 * delta };
        if step.abs() < tol {
            break;
        }
    }
    delta.min(delta0)
}

/// Explicit linear hillslope diffusion over the pixel graph.
///
/// The edge weight between cells with k_i and k_j neighbours is
/// K̄·(2/k_i + 2/k_j)/d², which reduces to the (4/k)·Σ (h_j − h_i)/d²
/// Laplacian away from the grid edges and is symmetric, so mass is conserved.
/// The step is sub-cycled so every explicit update keeps non-negative
/// weights. Cells flagged in `fixed` keep their elevation.
///
/// Returns the number of sweeps taken. A step that would need more than
/// [`MAX_DIFFUSION_CYCLES`] sweeps is refused and leaves `elevation` as it was.
pub fn hillslope_diffusion(
    elevation: &mut Array1<f64>,
    grid: &PixelGrid,
    adjacency: &CsrGraph,
    fixed: &[bool],
    kd: ArrayView1<f64>,
    dt: f64,
) -> Result<usize, ConfigurationError> {
    let n = elevation.len();
    let weights: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let ki = adjacency.degree(i).max(1) as f64;
            adjacency
                .neighbors_of(i)
                .iter()
                .map(|&j| {
                    let kj = adjacency.degree(j).max(1) as f64;
                    let d = grid.distance(i, j);
                    if d > 0.0 {
                        0.5 * (kd[i] + kd[j]) * (2.0 / ki + 2.0 / kj) / (d * d)
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    let max_rate = weights.iter().map(|w| w.iter().sum::<f64>()).fold(0.0f64, f64::max);
    if !(max_rate > 0.0) || !(dt > 0.0) {
        return Ok(0);
    }
    let required = (dt * max_rate / 0.5).ceil();
    if !(required <= MAX_DIFFUSION_CYCLES as f64) {
        return Err(ConfigurationError::InvalidValue {
            key: "bedrock_diffusivity",
            value: kd.fold(0.0f64, |a, &k| a.max(k)).to_string(),
            reason: "explicit hillslope diffusion would need more than 2^16 sweeps per sub-step; \
                     lower the diffusivity or maximum_substep",
        });
    }
    let cycles = (required as usize).max(1);
    let sub_dt = dt / cycles as f64;
    debug!("hillslope diffusion: {cycles} sweeps of {sub_dt:.3e} yr");

    for _ in 0..cycles {
        let h_old = elevation.clone();
        for i in 0..n {
            if fixed[i] {
                continue;
            }
            let lap: f64 = adjacency
                .neighbors_of(i)
                .iter()
                .zip(weights[i].iter())
                .map(|(&j, &w)| w * (h_old[j] - h_old[i]))
                .sum();
            elevation[i] += sub_dt * lap;
        }
    }
    Ok(cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::route_steepest_descent;
    use crate::pixel::Lattice;
    use ndarray::array;

    fn line_grid() -> PixelGrid {
        // 4 x 2 nodes, 100 m spacing
        PixelGrid::Lattice(Lattice::new(&[0.0; 3], &[300.0, 100.0, 1.0], [3, 1]).unwrap())
    }

    fn params(n: f64) -> ErosionParams {
        ErosionParams {
            slope_exponent: n,
            bedrock_incision_rate: 1e-4,
            tolerance: 1e-10,
            ..ErosionParams::default()
        }
    }

    #[test]
    fn coefficients_switch_at_the_reference_surface() {
        let p = ErosionParams { sediment_incision_rate: 7e-5, ..ErosionParams::default() };
        let k = incision_coefficients(array![10.0, 0.0, -5.0].view(), &p);
        assert_eq!(k[0], p.bedrock_incision_rate);
        assert_eq!(k[1], 7e-5);
        assert_eq!(k[2], 7e-5);
    }

    #[test]
    fn linear_case_matches_closed_form() {
        let grid = line_grid();
        let adj = grid.adjacency();
        let fixed = vec![false; grid.cell_count()];
        let h = array![30.0, 20.0, 10.0, 0.0, 30.0, 20.0, 10.0, -1.0];
        let routing = route_steepest_descent(&grid, &adj, &fixed, h.view());
        let area = crate::flow::drainage_area(&grid, &routing);
        let p = params(1.0);
        let kf = incision_coefficients(h.view(), &p);
        let depth = implicit_spl_erode(h.view(), &routing, area.view(), kf.view(), &p, 1000.0);

        assert!(depth.iter().all(|&d| d >= 0.0));
        assert_eq!(depth[7], 0.0);
        // node 3 drains straight into the sink at node 7
        assert_eq!(routing.receivers[3], 7);
        let f = kf[3] * area[3].powf(p.drainage_area_exponent) * 1000.0 / 100.0;
        let expected = (0.0 + f * -1.0) / (1.0 + f);
        assert!((depth[3] - (0.0 - expected)).abs() < 1e-12);
    }

    #[test]
    fn never_cuts_below_the_receiver() {
        let grid = line_grid();
        let adj = grid.adjacency();
        let fixed = vec![false; grid.cell_count()];
        let h = array![30.0, 20.0, 10.0, 0.0, 30.0, 20.0, 10.0, -1.0];
        let routing = route_steepest_descent(&grid, &adj, &fixed, h.view());
        let area = crate::flow::drainage_area(&grid, &routing);
        for n in [0.7, 1.0, 1.5] {
            let p = ErosionParams { bedrock_incision_rate: 10.0, ..params(n) };
            let kf = incision_coefficients(h.view(), &p);
            let depth = implicit_spl_erode(h.view(), &routing, area.view(), kf.view(), &p, 1e6);
            let eroded = &h - &depth;
            for node in 0..grid.cell_count() {
                let r = routing.receivers[node];
                if r != node {
                    assert!(eroded[node] >= eroded[r] - 1e-9, "n={n} node {node}");
                }
            }
        }
    }

    #[test]
    fn newton_agrees_with_closed_form_at_unit_exponent() {
        let d = newton_relief(10.0, 0.5, 1.0, 1e-12);
        assert!((d - 10.0 / 1.5).abs() < 1e-9);
        assert_eq!(newton_relief(0.0, 3.0, 2.0, 1e-9), 0.0);
    }

    #[test]
    fn diffusion_conserves_mass_on_reflective_lattice() {
        let grid = line_grid();
        let adj = grid.adjacency();
        let fixed = vec![false; grid.cell_count()];
        let mut h = array![0.0, 0.0, 8.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let before = h.sum();
        let kd = Array1::from_elem(h.len(), 1.0);
        let cycles = hillslope_diffusion(&mut h, &grid, &adj, &fixed, kd.view(), 5000.0).unwrap();

        assert!(cycles >= 1);
        assert!((h.sum() - before).abs() < 1e-9);
        assert!(h[2] < 8.0);
        assert!(h.iter().all(|&v| v >= -1e-12));
    }

    #[test]
    fn fixed_cells_hold_under_diffusion() {
        let grid = line_grid();
        let adj = grid.adjacency();
        let fixed: Vec<bool> = (0..grid.cell_count()).map(|i| i == 2).collect();
        let mut h = array![0.0, 0.0, 8.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let kd = Array1::from_elem(h.len(), 1.0);
        hillslope_diffusion(&mut h, &grid, &adj, &fixed, kd.view(), 5000.0).unwrap();
        assert_eq!(h[2], 8.0);
        assert!(h[1] > 0.0);
    }

    #[test]
    fn runaway_sweep_counts_are_refused() {
        let grid = line_grid();
        let adj = grid.adjacency();
        let fixed = vec![false; grid.cell_count()];
        let mut h = array![0.0, 0.0, 8.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let kd = Array1::from_elem(h.len(), 1e6);
        let err = hillslope_diffusion(&mut h, &grid, &adj, &fixed, kd.view(), 1e6).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { key: "bedrock_diffusivity", .. }));
        assert_eq!(h[2], 8.0);

        let still = Array1::zeros(h.len());
        assert_eq!(hillslope_diffusion(&mut h, &grid, &adj, &fixed, still.view(), 1e6).unwrap(), 0);
    }
}
