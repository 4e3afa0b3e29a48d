//! Adam optimizers over per-stroke parameter arrays.
//!
//! Moment state is indexed like the parameter array. When strokes are dropped
//! or reordered, `remap` moves the state along with them so a stroke keeps its
//! momentum across validation and color sorting.

use nalgebra::SVector;

pub struct AdamF32 {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: u32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamF32 {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn ensure_len(&mut self, len: usize) {
        if self.m.len() != len {
            self.m.resize(len, 0.0);
            self.v.resize(len, 0.0);
        }
    }

    /// Reorder state so new slot `j` holds old slot `indices[j]`.
    /// Indices past the current state start from zero moments.
    pub fn remap(&mut self, indices: &[usize]) {
        self.m = indices.iter().map(|&i| self.m.get(i).copied().unwrap_or(0.0)).collect();
        self.v = indices.iter().map(|&i| self.v.get(i).copied().unwrap_or(0.0)).collect();
    }

    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        assert_eq!(params.len(), grads.len());
        self.ensure_len(params.len());

        self.t += 1;
        let t = self.t as f32;
        let b1 = self.beta1;
        let b2 = self.beta2;

        let bias1 = 1.0 - b1.powf(t);
        let bias2 = 1.0 - b2.powf(t);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.m[i] * b1 + g * (1.0 - b1);
            self.v[i] = self.v[i] * b2 + g * g * (1.0 - b2);

            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;

            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Adam over fixed-size vectors (`Vector2`, `Vector3`, ...), elementwise.
pub struct AdamVec<const D: usize> {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: u32,
    m: Vec<SVector<f32, D>>,
    v: Vec<SVector<f32, D>>,
}

pub type AdamVec2 = AdamVec<2>;
pub type AdamVec3 = AdamVec<3>;

impl<const D: usize> AdamVec<D> {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn ensure_len(&mut self, len: usize) {
        if self.m.len() != len {
            // New slots start with zero momentum; the timestep is kept.
            self.m.resize(len, SVector::zeros());
            self.v.resize(len, SVector::zeros());
        }
    }

    /// Reorder state so new slot `j` holds old slot `indices[j]`.
    pub fn remap(&mut self, indices: &[usize]) {
        self.m = indices
            .iter()
            .map(|&i| self.m.get(i).copied().unwrap_or_else(SVector::zeros))
            .collect();
        self.v = indices
            .iter()
            .map(|&i| self.v.get(i).copied().unwrap_or_else(SVector::zeros))
            .collect();
    }

    pub fn step(&mut self, params: &mut [SVector<f32, D>], grads: &[SVector<f32, D>]) {
        assert_eq!(params.len(), grads.len());
        self.ensure_len(params.len());

        self.t += 1;
        let t = self.t as f32;
        let b1 = self.beta1;
        let b2 = self.beta2;

        let bias1 = 1.0 - b1.powf(t);
        let bias2 = 1.0 - b2.powf(t);
        let (lr, eps) = (self.lr, self.eps);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.m[i] * b1 + g * (1.0 - b1);
            self.v[i] = self.v[i] * b2 + g.component_mul(&g) * (1.0 - b2);

            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;

            params[i] -= m_hat.zip_map(&v_hat, |m, v| lr * m / (v.sqrt() + eps));
        }
    }
}
