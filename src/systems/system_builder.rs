use nalgebra::{DMatrix, DVector};

use crate::spatial_database::Location;
use crate::variography::model_variograms::VariogramModel;

/// Fills the bordered ordinary kriging matrix and right hand side.
///
/// For `n` conditioning locations the matrix is `(n + 1) x (n + 1)`:
/// ```text
/// | Γ   1 |
/// | 1ᵗ  0 |
/// ```
/// and the right hand side is `[γ0; 1]`.
pub trait OKBuilder {
    fn build_variogram_mat(mat: &mut DMatrix<f64>, cond: &[Location], vgram: &VariogramModel);

    fn build_variogram_vec(
        vec: &mut DVector<f64>,
        cond: &[Location],
        kriging_point: &Location,
        vgram: &VariogramModel,
    );
}

pub struct OKPointBuilder;

impl OKBuilder for OKPointBuilder {
    fn build_variogram_mat(mat: &mut DMatrix<f64>, cond: &[Location], vgram: &VariogramModel) {
        let n = cond.len();
        mat.resize_mut(n + 1, n + 1, 0.0);

        //lower triangle, mirrored
        for (i, p1) in cond.iter().enumerate() {
            mat[(i, i)] = 0.0;
            for (j, p2) in cond.iter().take(i).enumerate() {
                let g = vgram.variogram_between(p1, p2);
                mat[(i, j)] = g;
                mat[(j, i)] = g;
            }
            mat[(i, n)] = 1.0;
            mat[(n, i)] = 1.0;
        }
        mat[(n, n)] = 0.0;
    }

    fn build_variogram_vec(
        vec: &mut DVector<f64>,
        cond: &[Location],
        kriging_point: &Location,
        vgram: &VariogramModel,
    ) {
        let n = cond.len();
        vec.resize_vertically_mut(n + 1, 0.0);

        for (i, p) in cond.iter().enumerate() {
            vec[i] = vgram.variogram_between(p, kriging_point);
        }
        vec[n] = 1.0;
    }
}
