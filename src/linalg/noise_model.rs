//! Noise models: whitening of residuals and Jacobians, and constraint-aware
//! QR elimination
//!
//! A noise model normalizes ("whitens") an error vector by the inverse square
//! root of its covariance, so that the whitened sum of squares equals the
//! Mahalanobis distance. The family is closed: [`Gaussian`] carries a full
//! square-root information matrix, [`Diagonal`] an independent sigma per
//! component, [`Constrained`] permits exact-zero sigmas (hard constraints),
//! and [`Isotropic`] shares one sigma across all components.
//!
//! Models are immutable, shared values: many factors reference one instance
//! through [`SharedNoiseModel`] and may whiten concurrently. Replacement means
//! constructing a new instance, never mutating a shared one.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::linalg::LinAlgError;

/// Default penalty weight on hard-constraint violations; needs to be large
/// enough to dominate soft constraints.
pub const DEFAULT_MU: f64 = 1000.0;

/// Off-diagonal magnitude below which a square matrix is classified as
/// diagonal during smart construction. Classification only picks a cheaper
/// variant; it never changes whitening behavior.
const DIAGONAL_TOL: f64 = 1e-9;

/// Column entries below this magnitude are treated as zero when forming the
/// weighted pseudo-inverse.
const PIVOT_TOL: f64 = 1e-9;

/// Pivot precision below which a column is considered rank deficient.
const RANK_TOL: f64 = 1e-8;

/// Shared, immutable noise model handle; safe to reference from many factors
pub type SharedNoiseModel = Arc<NoiseModel>;

/// The closed family of noise models
///
/// Factory functions return this enum because smart construction may pick a
/// cheaper variant than the one asked for (a diagonal information matrix
/// yields a [`Diagonal`], equal sigmas yield an [`Isotropic`]).
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    Gaussian(Gaussian),
    Diagonal(Diagonal),
    Constrained(Constrained),
    Isotropic(Isotropic),
}

impl NoiseModel {
    /// The unit (identity covariance) model: whitening is a no-op.
    ///
    /// Dimension 0 is permitted here; it describes the empty row set produced
    /// by eliminating a degenerate system.
    pub fn unit(dim: usize) -> Self {
        NoiseModel::Isotropic(Isotropic {
            dim,
            sigma: 1.0,
            invsigma: 1.0,
        })
    }

    /// Dimensionality of the model
    pub fn dim(&self) -> usize {
        match self {
            NoiseModel::Gaussian(g) => g.dim(),
            NoiseModel::Diagonal(d) => d.dim(),
            NoiseModel::Constrained(c) => c.dim(),
            NoiseModel::Isotropic(i) => i.dim(),
        }
    }

    /// True for a constrained model; saves matching on the variant
    pub fn is_constrained(&self) -> bool {
        matches!(self, NoiseModel::Constrained(_))
    }

    /// True for a unit model; saves matching on the variant
    pub fn is_unit(&self) -> bool {
        matches!(self, NoiseModel::Isotropic(i) if i.sigma == 1.0)
    }

    /// Standard deviations, one per component.
    ///
    /// For a general [`Gaussian`] these are the square roots of the covariance
    /// diagonal, which requires a non-singular `R`.
    pub fn sigmas(&self) -> Result<DVector<f64>, LinAlgError> {
        Ok(match self {
            NoiseModel::Gaussian(g) => g.covariance()?.diagonal().map(f64::sqrt),
            NoiseModel::Diagonal(d) => d.sigmas().clone(),
            NoiseModel::Constrained(c) => c.sigmas().clone(),
            NoiseModel::Isotropic(i) => DVector::repeat(i.dim, i.sigma),
        })
    }

    /// Whiten an error vector
    pub fn whiten(&self, v: &DVector<f64>) -> Result<DVector<f64>, LinAlgError> {
        self.check_vector(v)?;
        Ok(match self {
            NoiseModel::Gaussian(g) => g.whiten(v),
            NoiseModel::Diagonal(d) => d.whiten(v),
            NoiseModel::Constrained(c) => c.whiten(v),
            NoiseModel::Isotropic(i) => v * i.invsigma,
        })
    }

    /// Unwhiten an error vector; the exact inverse of [`whiten`](Self::whiten)
    /// on non-singular models. On a constrained model the hard components
    /// multiply by their zero sigma.
    pub fn unwhiten(&self, v: &DVector<f64>) -> Result<DVector<f64>, LinAlgError> {
        self.check_vector(v)?;
        match self {
            NoiseModel::Gaussian(g) => g.unwhiten(v),
            NoiseModel::Diagonal(d) => Ok(v.component_mul(d.sigmas())),
            NoiseModel::Constrained(c) => Ok(v.component_mul(c.sigmas())),
            NoiseModel::Isotropic(i) => Ok(v * i.sigma),
        }
    }

    /// Whiten a Jacobian matrix: apply the whitening operator to every column
    /// (equivalently, pre-multiply the matrix by it)
    pub fn whiten_matrix(&self, h: &DMatrix<f64>) -> Result<DMatrix<f64>, LinAlgError> {
        let mut out = h.clone();
        self.whiten_matrix_in_place(&mut out)?;
        Ok(out)
    }

    /// In-place version of [`whiten_matrix`](Self::whiten_matrix)
    ///
    /// A constrained model performs partial whitening: rows with a nonzero
    /// sigma are scaled, hard-constraint rows remain untouched.
    pub fn whiten_matrix_in_place(&self, h: &mut DMatrix<f64>) -> Result<(), LinAlgError> {
        self.check_rows(h.nrows())?;
        match self {
            NoiseModel::Gaussian(g) => *h = &g.sqrt_information * &*h,
            NoiseModel::Diagonal(d) => d.scale_rows(h),
            NoiseModel::Constrained(c) => c.scale_free_rows(h),
            NoiseModel::Isotropic(i) => *h *= i.invsigma,
        }
        Ok(())
    }

    /// Whiten one or more Jacobian blocks together with the right-hand side,
    /// in a single in-place pass.
    ///
    /// The identical transform is applied to every block and to `b`, so the
    /// solution of `A x = b` is unchanged.
    pub fn whiten_system(
        &self,
        blocks: &mut [DMatrix<f64>],
        b: &mut DVector<f64>,
    ) -> Result<(), LinAlgError> {
        self.check_vector(b)?;
        for block in blocks.iter() {
            self.check_rows(block.nrows())?;
        }
        match self {
            NoiseModel::Gaussian(g) => {
                for block in blocks.iter_mut() {
                    *block = &g.sqrt_information * &*block;
                }
                *b = &g.sqrt_information * &*b;
            }
            NoiseModel::Diagonal(d) => {
                for block in blocks.iter_mut() {
                    d.scale_rows(block);
                }
                b.component_mul_assign(d.invsigmas());
            }
            NoiseModel::Constrained(c) => {
                for block in blocks.iter_mut() {
                    c.scale_free_rows(block);
                }
                for i in 0..c.dim() {
                    if !c.constrained(i) {
                        b[i] *= c.invsigmas()[i];
                    }
                }
            }
            NoiseModel::Isotropic(i) => {
                for block in blocks.iter_mut() {
                    *block *= i.invsigma;
                }
                *b *= i.invsigma;
            }
        }
        Ok(())
    }

    /// Squared Mahalanobis distance `‖whiten(v)‖²`
    pub fn squared_mahalanobis(&self, v: &DVector<f64>) -> Result<f64, LinAlgError> {
        Ok(self.whiten(v)?.norm_squared())
    }

    /// Distance used by the optimizer when scoring a residual.
    ///
    /// Identical to the squared Mahalanobis distance except on a constrained
    /// model, where a hard component with nonzero residual contributes the
    /// mu-weighted penalty `mu_i · v_i²` instead of an infinite term.
    pub fn distance(&self, v: &DVector<f64>) -> Result<f64, LinAlgError> {
        match self {
            NoiseModel::Constrained(c) => {
                self.check_vector(v)?;
                Ok(c.penalized_distance(v))
            }
            _ => self.squared_mahalanobis(v),
        }
    }

    /// Eliminate the augmented system `[A | b]` in place by orthogonal
    /// factorization: `Q' · [A | b] = [R | d]`.
    ///
    /// On return the leading `r = min(m, n)` rows of `ab` hold the upper
    /// trapezoidal `[R | d]` and every entry below the diagonal is zero. The
    /// returned model describes the uncertainty of those `r` rows: unit for an
    /// unconstrained system (the rows are whitened by construction), and for a
    /// constrained system a model in which directions that stayed hard keep a
    /// zero sigma.
    ///
    /// Rank deficiency is a structural outcome, not an error: a column with no
    /// usable pivot simply produces no output row.
    pub fn qr(&self, ab: &mut DMatrix<f64>) -> Result<NoiseModel, LinAlgError> {
        let n1 = ab.ncols();
        if n1 == 0 {
            return Err(LinAlgError::MissingRhsColumn);
        }
        self.check_rows(ab.nrows())?;

        if let NoiseModel::Constrained(c) = self {
            return c.qr(ab);
        }

        let m = ab.nrows();
        let n = n1 - 1;
        let rank = m.min(n);

        // Rows become unit after whitening; the Householder kernel then
        // reduces the system without changing its solution.
        self.whiten_matrix_in_place(ab)?;
        if rank > 0 {
            let qr = ab.clone().qr();
            let r_factor = qr.r();
            ab.fill(0.0);
            ab.view_mut((0, 0), (rank, n1))
                .copy_from(&r_factor.view((0, 0), (rank, n1)));
        } else {
            ab.fill(0.0);
        }
        tracing::debug!(rows = m, cols = n, rank, "householder elimination");
        Ok(NoiseModel::unit(rank))
    }

    fn check_vector(&self, v: &DVector<f64>) -> Result<(), LinAlgError> {
        self.check_rows(v.len())
    }

    fn check_rows(&self, rows: usize) -> Result<(), LinAlgError> {
        if rows != self.dim() {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dim(),
                actual: rows,
            });
        }
        Ok(())
    }
}

/// General dense noise model: `whiten(v) = R·v` with `R` the upper-triangular
/// square-root information matrix, `Rᵀ·R = Σ⁻¹`.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    sqrt_information: DMatrix<f64>,
}

impl Gaussian {
    /// Model from an (upper-triangular) square-root information matrix `R`.
    ///
    /// With `smart` set, a matrix that is diagonal within tolerance downgrades
    /// to a [`Diagonal`] (or further) to save later computation.
    pub fn from_sqrt_information(r: DMatrix<f64>, smart: bool) -> Result<NoiseModel, LinAlgError> {
        check_square(&r)?;
        if smart {
            if let Some(diag) = strict_diagonal(&r) {
                if diag.iter().all(|&x| x > 0.0) {
                    return Diagonal::from_sigmas(diag.map(|x| 1.0 / x), true);
                }
            }
        }
        Ok(NoiseModel::Gaussian(Gaussian {
            sqrt_information: r,
        }))
    }

    /// Model from an information matrix `M = Σ⁻¹`; derives `R` by Cholesky
    pub fn from_information(m: DMatrix<f64>, smart: bool) -> Result<NoiseModel, LinAlgError> {
        check_square(&m)?;
        if smart {
            if let Some(diag) = strict_diagonal(&m) {
                return Diagonal::from_precisions(diag, true);
            }
        }
        let chol = m.cholesky().ok_or(LinAlgError::NotPositiveDefinite)?;
        Ok(NoiseModel::Gaussian(Gaussian {
            sqrt_information: chol.l().transpose(),
        }))
    }

    /// Model from a covariance matrix `Σ`
    pub fn from_covariance(covariance: DMatrix<f64>, smart: bool) -> Result<NoiseModel, LinAlgError> {
        check_square(&covariance)?;
        if smart {
            if let Some(diag) = strict_diagonal(&covariance) {
                return Diagonal::from_variances(diag, true);
            }
        }
        // Invert through Cholesky, then factor the information matrix to keep
        // R upper triangular.
        let chol = covariance
            .cholesky()
            .ok_or(LinAlgError::NotPositiveDefinite)?;
        Gaussian::from_information(chol.inverse(), false)
    }

    /// Dimensionality of the model
    pub fn dim(&self) -> usize {
        self.sqrt_information.nrows()
    }

    /// `R` itself; note that whitening a matrix through the model is
    /// equivalent to `R·H`
    pub fn r(&self) -> &DMatrix<f64> {
        &self.sqrt_information
    }

    /// The information matrix `Rᵀ·R`
    pub fn information(&self) -> DMatrix<f64> {
        self.sqrt_information.transpose() * &self.sqrt_information
    }

    /// The covariance matrix `(Rᵀ·R)⁻¹`
    pub fn covariance(&self) -> Result<DMatrix<f64>, LinAlgError> {
        let dim = self.dim();
        let r_inv = self
            .sqrt_information
            .solve_upper_triangular(&DMatrix::identity(dim, dim))
            .ok_or(LinAlgError::Singular)?;
        Ok(&r_inv * r_inv.transpose())
    }

    fn whiten(&self, v: &DVector<f64>) -> DVector<f64> {
        &self.sqrt_information * v
    }

    fn unwhiten(&self, v: &DVector<f64>) -> Result<DVector<f64>, LinAlgError> {
        // Triangular solve, not an explicit inverse.
        self.sqrt_information
            .solve_upper_triangular(v)
            .ok_or(LinAlgError::Singular)
    }
}

/// Diagonal noise model: independent sigma per component, whitening is an
/// elementwise divide.
///
/// Sigmas, inverse sigmas and precisions are all precomputed at construction;
/// one shared instance is commonly referenced by many factors.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagonal {
    sigmas: DVector<f64>,
    invsigmas: DVector<f64>,
    precisions: DVector<f64>,
}

impl Diagonal {
    /// Model from standard deviations (diagonal of the square-root covariance).
    ///
    /// Every sigma must be strictly positive; exact zeros belong to
    /// [`Constrained`]. With `smart` set, equal sigmas downgrade to
    /// [`Isotropic`].
    pub fn from_sigmas(sigmas: DVector<f64>, smart: bool) -> Result<NoiseModel, LinAlgError> {
        if sigmas.is_empty() {
            return Err(LinAlgError::ZeroDimension);
        }
        for (index, &value) in sigmas.iter().enumerate() {
            if !(value > 0.0) || !value.is_finite() {
                return Err(LinAlgError::NonPositiveSigma { index, value });
            }
        }
        if smart && sigmas.iter().all(|&s| s == sigmas[0]) {
            return Isotropic::from_sigma(sigmas.len(), sigmas[0], true);
        }
        let invsigmas = sigmas.map(|s| 1.0 / s);
        let precisions = invsigmas.map(|i| i * i);
        Ok(NoiseModel::Diagonal(Diagonal {
            sigmas,
            invsigmas,
            precisions,
        }))
    }

    /// Model from variances (diagonal of the covariance)
    pub fn from_variances(variances: DVector<f64>, smart: bool) -> Result<NoiseModel, LinAlgError> {
        for (index, &value) in variances.iter().enumerate() {
            if !(value > 0.0) || !value.is_finite() {
                return Err(LinAlgError::NonPositiveSigma { index, value });
            }
        }
        Diagonal::from_sigmas(variances.map(f64::sqrt), smart)
    }

    /// Model from precisions (diagonal of the information matrix)
    pub fn from_precisions(
        precisions: DVector<f64>,
        smart: bool,
    ) -> Result<NoiseModel, LinAlgError> {
        for (index, &value) in precisions.iter().enumerate() {
            if !(value > 0.0) || !value.is_finite() {
                return Err(LinAlgError::NonPositiveSigma { index, value });
            }
        }
        Diagonal::from_sigmas(precisions.map(|p| 1.0 / p.sqrt()), smart)
    }

    /// Dimensionality of the model
    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    /// Standard deviations
    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Inverse standard deviations
    pub fn invsigmas(&self) -> &DVector<f64> {
        &self.invsigmas
    }

    /// Precisions (inverse variances)
    pub fn precisions(&self) -> &DVector<f64> {
        &self.precisions
    }

    /// Standard deviation of component `i`
    pub fn sigma(&self, i: usize) -> f64 {
        self.sigmas[i]
    }

    /// Inverse standard deviation of component `i`
    pub fn invsigma(&self, i: usize) -> f64 {
        self.invsigmas[i]
    }

    /// Precision of component `i`
    pub fn precision(&self, i: usize) -> f64 {
        self.precisions[i]
    }

    fn whiten(&self, v: &DVector<f64>) -> DVector<f64> {
        v.component_mul(&self.invsigmas)
    }

    fn scale_rows(&self, h: &mut DMatrix<f64>) {
        for i in 0..self.dim() {
            let mut row = h.row_mut(i);
            row *= self.invsigmas[i];
        }
    }
}

/// Constrained noise model: a [`Diagonal`] in which some sigmas are exactly
/// zero, forcing the error to be zero there.
///
/// Whitening returns zero on components that have zero sigma and zero error,
/// and passes the error through unchanged otherwise. A hard constraint is
/// never turned into an infinite error value, so constraints can be optimized
/// rather than self-destructing when badly initialized; the per-component
/// penalty weight `mu` scores violations instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Constrained {
    sigmas: DVector<f64>,
    invsigmas: DVector<f64>,
    precisions: DVector<f64>,
    mu: DVector<f64>,
}

impl Constrained {
    /// Model from standard deviations, some of which may be zero; `mu`
    /// defaults to 1000 on every component
    pub fn mixed_sigmas(sigmas: DVector<f64>) -> Result<NoiseModel, LinAlgError> {
        let mu = DVector::repeat(sigmas.len(), DEFAULT_MU);
        Constrained::mixed_sigmas_with_mu(mu, sigmas)
    }

    /// Model from standard deviations with an explicit penalty-weight vector
    pub fn mixed_sigmas_with_mu(
        mu: DVector<f64>,
        sigmas: DVector<f64>,
    ) -> Result<NoiseModel, LinAlgError> {
        if sigmas.is_empty() {
            return Err(LinAlgError::ZeroDimension);
        }
        if mu.len() != sigmas.len() {
            return Err(LinAlgError::DimensionMismatch {
                expected: sigmas.len(),
                actual: mu.len(),
            });
        }
        for (index, &value) in sigmas.iter().enumerate() {
            if value < 0.0 || !value.is_finite() {
                return Err(LinAlgError::NegativeSigma { index, value });
            }
        }
        // Zero sigmas must not produce infinite inverse sigmas or precisions.
        let invsigmas = sigmas.map(|s| if s == 0.0 { 0.0 } else { 1.0 / s });
        let precisions = invsigmas.map(|i| i * i);
        Ok(NoiseModel::Constrained(Constrained {
            sigmas,
            invsigmas,
            precisions,
            mu,
        }))
    }

    /// Model from variances, some of which may be zero
    pub fn mixed_variances(variances: DVector<f64>) -> Result<NoiseModel, LinAlgError> {
        let mu = DVector::repeat(variances.len(), DEFAULT_MU);
        Constrained::mixed_variances_with_mu(mu, variances)
    }

    /// Model from variances with an explicit penalty-weight vector
    pub fn mixed_variances_with_mu(
        mu: DVector<f64>,
        variances: DVector<f64>,
    ) -> Result<NoiseModel, LinAlgError> {
        for (index, &value) in variances.iter().enumerate() {
            if value < 0.0 || !value.is_finite() {
                return Err(LinAlgError::NegativeSigma { index, value });
            }
        }
        Constrained::mixed_sigmas_with_mu(mu, variances.map(f64::sqrt))
    }

    /// Model from precisions, some of which may be infinite (hard constraints)
    pub fn mixed_precisions(precisions: DVector<f64>) -> Result<NoiseModel, LinAlgError> {
        let mu = DVector::repeat(precisions.len(), DEFAULT_MU);
        Constrained::mixed_precisions_with_mu(mu, precisions)
    }

    /// Model from precisions with an explicit penalty-weight vector
    pub fn mixed_precisions_with_mu(
        mu: DVector<f64>,
        precisions: DVector<f64>,
    ) -> Result<NoiseModel, LinAlgError> {
        for (index, &value) in precisions.iter().enumerate() {
            if !(value > 0.0) {
                return Err(LinAlgError::NonPositiveSigma { index, value });
            }
        }
        let sigmas = precisions.map(|p| if p.is_infinite() { 0.0 } else { 1.0 / p.sqrt() });
        Constrained::mixed_sigmas_with_mu(mu, sigmas)
    }

    /// Fully constrained model: every sigma is zero
    pub fn all(dim: usize) -> Result<NoiseModel, LinAlgError> {
        Constrained::all_with_mu(dim, DEFAULT_MU)
    }

    /// Fully constrained model with a shared penalty weight
    pub fn all_with_mu(dim: usize, mu: f64) -> Result<NoiseModel, LinAlgError> {
        if dim == 0 {
            return Err(LinAlgError::ZeroDimension);
        }
        Constrained::mixed_sigmas_with_mu(DVector::repeat(dim, mu), DVector::zeros(dim))
    }

    /// Dimensionality of the model
    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    /// Standard deviations; zero marks a hard constraint
    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Inverse standard deviations; zero (not infinity) on hard constraints
    pub fn invsigmas(&self) -> &DVector<f64> {
        &self.invsigmas
    }

    /// Penalty weights, one per component
    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    /// True if component `i` is a hard constraint
    pub fn constrained(&self, i: usize) -> bool {
        self.sigmas[i] == 0.0
    }

    /// A version in which hard constraints stay hard and every free component
    /// is unit scaled
    pub fn unit(&self) -> Result<NoiseModel, LinAlgError> {
        let sigmas = self.sigmas.map(|s| if s == 0.0 { 0.0 } else { 1.0 });
        Constrained::mixed_sigmas_with_mu(self.mu.clone(), sigmas)
    }

    fn whiten(&self, v: &DVector<f64>) -> DVector<f64> {
        // Hard components pass through unchanged (zero stays zero); they are
        // scored by mu, never scaled by an infinite precision.
        DVector::from_fn(v.len(), |i, _| {
            if self.constrained(i) {
                v[i]
            } else {
                v[i] * self.invsigmas[i]
            }
        })
    }

    fn scale_free_rows(&self, h: &mut DMatrix<f64>) {
        for i in 0..self.dim() {
            if !self.constrained(i) {
                let mut row = h.row_mut(i);
                row *= self.invsigmas[i];
            }
        }
    }

    fn penalized_distance(&self, v: &DVector<f64>) -> f64 {
        let mut total = 0.0;
        for i in 0..self.dim() {
            if self.constrained(i) {
                total += self.mu[i] * v[i] * v[i];
            } else {
                total += self.precisions[i] * v[i] * v[i];
            }
        }
        total
    }

    /// Constraint-aware elimination of `[A | b]`.
    ///
    /// Column by column, the scalar variable of the pivot column is solved as
    /// `x = d - r·S` through the weighted pseudo-inverse of the column, then
    /// substituted back into the remaining system. A hard-constraint row with
    /// a nonzero coefficient captures its pivot exactly, so that direction
    /// keeps a zero sigma in the returned model; a hard row may only lose that
    /// status by never winning a pivot. Columns whose pivot precision falls
    /// below tolerance produce no output row.
    fn qr(&self, ab: &mut DMatrix<f64>) -> Result<NoiseModel, LinAlgError> {
        let m = ab.nrows();
        let n1 = ab.ncols();
        let n = n1 - 1;
        let max_rank = m.min(n);

        // Infinite weights exist only inside this routine; nothing infinite
        // reaches the returned model.
        let weights = DVector::from_fn(m, |i, _| {
            if self.constrained(i) {
                f64::INFINITY
            } else {
                self.precisions[i]
            }
        });

        // (pivot column, solved row [r | d], precision of the produced row)
        let mut produced: Vec<(usize, RowDVector<f64>, f64)> = Vec::new();

        for j in 0..n {
            if produced.len() >= max_rank {
                break;
            }

            let a = ab.column(j).into_owned();
            let (precision, pseudo) = weighted_pseudoinverse(&a, &weights);

            if precision < RANK_TOL {
                tracing::debug!(column = j, "no usable pivot, column skipped");
                continue;
            }

            let mut rd = RowDVector::zeros(n1);
            rd[j] = 1.0;
            for j2 in (j + 1)..n1 {
                rd[j2] = pseudo.dot(&ab.column(j2));
            }

            // Substitute the solved variable back into the remaining system.
            *ab -= &a * &rd;

            produced.push((j, rd, precision));
        }

        let rank = produced.len();
        ab.fill(0.0);

        let mut out_sigmas = DVector::zeros(rank);
        let mut mixed = false;
        for (i, (j, rd, precision)) in produced.iter().enumerate() {
            let j = *j;
            ab.view_mut((i, j), (1, n1 - j))
                .copy_from(&rd.columns(j, n1 - j));
            if precision.is_infinite() {
                mixed = true;
                out_sigmas[i] = 0.0;
            } else {
                out_sigmas[i] = 1.0 / precision.sqrt();
            }
        }
        tracing::debug!(rows = m, cols = n, rank, mixed, "constrained elimination");

        if mixed {
            let mu = DVector::from_fn(rank, |i, _| {
                self.mu.get(i).copied().unwrap_or(DEFAULT_MU)
            });
            Constrained::mixed_sigmas_with_mu(mu, out_sigmas)
        } else if rank == 0 {
            Ok(NoiseModel::unit(0))
        } else {
            Diagonal::from_sigmas(out_sigmas, true)
        }
    }
}

/// Isotropic noise model: one scalar sigma shared by all dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct Isotropic {
    dim: usize,
    sigma: f64,
    invsigma: f64,
}

impl Isotropic {
    /// Model with the given sigma on every component. A sigma of exactly 1
    /// yields a unit model.
    pub fn from_sigma(dim: usize, sigma: f64, _smart: bool) -> Result<NoiseModel, LinAlgError> {
        if dim == 0 {
            return Err(LinAlgError::ZeroDimension);
        }
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(LinAlgError::NonPositiveSigma {
                index: 0,
                value: sigma,
            });
        }
        Ok(NoiseModel::Isotropic(Isotropic {
            dim,
            sigma,
            invsigma: 1.0 / sigma,
        }))
    }

    /// Model from a shared variance
    pub fn from_variance(dim: usize, variance: f64, smart: bool) -> Result<NoiseModel, LinAlgError> {
        if !(variance > 0.0) || !variance.is_finite() {
            return Err(LinAlgError::NonPositiveSigma {
                index: 0,
                value: variance,
            });
        }
        Isotropic::from_sigma(dim, variance.sqrt(), smart)
    }

    /// Model from a shared precision
    pub fn from_precision(
        dim: usize,
        precision: f64,
        smart: bool,
    ) -> Result<NoiseModel, LinAlgError> {
        if !(precision > 0.0) || !precision.is_finite() {
            return Err(LinAlgError::NonPositiveSigma {
                index: 0,
                value: precision,
            });
        }
        Isotropic::from_sigma(dim, 1.0 / precision.sqrt(), smart)
    }

    /// Dimensionality of the model
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The shared standard deviation
    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

/// Weighted pseudo-inverse of a column: `pseudo = (aᵀ·W·a)⁻¹·aᵀ·W` together
/// with the precision `aᵀ·W·a`.
///
/// A row with infinite weight and a nonzero coefficient takes the pivot: the
/// elimination step turns `a_i·x + S = b_i` into `x + S/a_i = b_i/a_i`, and
/// the reported precision is infinite.
fn weighted_pseudoinverse(a: &DVector<f64>, weights: &DVector<f64>) -> (f64, DVector<f64>) {
    let m = a.len();
    let is_zero: Vec<bool> = a.iter().map(|x| x.abs() < PIVOT_TOL).collect();

    for i in 0..m {
        if weights[i].is_infinite() && !is_zero[i] {
            let mut pseudo = DVector::zeros(m);
            pseudo[i] = 1.0 / a[i];
            return (f64::INFINITY, pseudo);
        }
    }

    let mut precision = 0.0;
    for i in 0..m {
        if !is_zero[i] {
            precision += weights[i] * a[i] * a[i];
        }
    }
    if precision < PIVOT_TOL {
        return (0.0, DVector::zeros(m));
    }

    let variance = 1.0 / precision;
    let pseudo = DVector::from_fn(m, |i, _| {
        if is_zero[i] {
            0.0
        } else {
            variance * weights[i] * a[i]
        }
    });
    (precision, pseudo)
}

fn check_square(m: &DMatrix<f64>) -> Result<(), LinAlgError> {
    if m.nrows() == 0 {
        return Err(LinAlgError::ZeroDimension);
    }
    if m.nrows() != m.ncols() {
        return Err(LinAlgError::NotSquare {
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    Ok(())
}

/// The matrix diagonal, when every off-diagonal entry is negligible
fn strict_diagonal(m: &DMatrix<f64>) -> Option<DVector<f64>> {
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            if i != j && m[(i, j)].abs() > DIAGONAL_TOL {
                return None;
            }
        }
    }
    Some(m.diagonal())
}
