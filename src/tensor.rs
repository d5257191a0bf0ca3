// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Tensor facade over tch (libtorch).
//!
//! This module provides `Tensor`, `Device`, and `DType` types used by every
//! network module in the crate instead of importing `tch` directly. Besides
//! the usual shape and arithmetic helpers it exposes the autograd surface the
//! training orchestrator depends on: `backward`, `detach`, `grad`,
//! `zero_grad` and the [`no_grad`] scope.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DType: data type abstraction
// ---------------------------------------------------------------------------

/// Tensor element data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    /// 32-bit floating point (default for computation).
    Float32,
    /// 64-bit floating point.
    Float64,
    /// 64-bit signed integer.
    Int64,
    /// Boolean.
    Bool,
}

impl From<DType> for tch::Kind {
    fn from(dt: DType) -> Self {
        match dt {
            DType::Float32 => tch::Kind::Float,
            DType::Float64 => tch::Kind::Double,
            DType::Int64 => tch::Kind::Int64,
            DType::Bool => tch::Kind::Bool,
        }
    }
}

impl From<tch::Kind> for DType {
    fn from(kind: tch::Kind) -> Self {
        match kind {
            tch::Kind::Double => DType::Float64,
            tch::Kind::Int64 | tch::Kind::Int | tch::Kind::Int16 | tch::Kind::Int8 => {
                DType::Int64
            }
            tch::Kind::Bool => DType::Bool,
            _ => DType::Float32,
        }
    }
}

// ---------------------------------------------------------------------------
// Device: compute device abstraction
// ---------------------------------------------------------------------------

/// Compute device.
///
/// Serialises as `"cpu"` or `{"gpu": <index>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CPU computation.
    #[default]
    Cpu,
    /// CUDA device with the given ordinal.
    Gpu(usize),
}

impl Device {
    /// Default GPU device (index 0).
    pub fn gpu() -> Self {
        Device::Gpu(0)
    }

    /// First CUDA device when available, CPU otherwise.
    pub fn cuda_if_available() -> Self {
        Device::from(tch::Device::cuda_if_available())
    }
}

impl From<Device> for tch::Device {
    fn from(d: Device) -> Self {
        match d {
            Device::Cpu => tch::Device::Cpu,
            Device::Gpu(i) => tch::Device::Cuda(i),
        }
    }
}

impl From<tch::Device> for Device {
    fn from(d: tch::Device) -> Self {
        match d {
            tch::Device::Cuda(i) => Device::Gpu(i),
            _ => Device::Cpu,
        }
    }
}

// ---------------------------------------------------------------------------
// Autograd scope
// ---------------------------------------------------------------------------

/// Run `f` with gradient tracking disabled.
pub fn no_grad<T, F: FnOnce() -> T>(f: F) -> T {
    tch::no_grad(f)
}

// ---------------------------------------------------------------------------
// Tensor
// ---------------------------------------------------------------------------

/// Tensor type backed by `tch::Tensor`.
pub struct Tensor {
    pub(crate) inner: tch::Tensor,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(shape={:?}, dtype={:?})",
            self.size(),
            self.kind()
        )
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            inner: self.inner.shallow_clone(),
        }
    }
}

#[allow(missing_docs)]
impl Tensor {
    /// Wrap a raw tch::Tensor.
    pub fn from_tch(t: tch::Tensor) -> Self {
        Tensor { inner: t }
    }

    /// Get the underlying tch::Tensor reference.
    pub fn as_tch(&self) -> &tch::Tensor {
        &self.inner
    }

    /// Consume and return the underlying tch::Tensor.
    pub fn into_tch(self) -> tch::Tensor {
        self.inner
    }

    // -- Creation --

    pub fn from_slice_f32(data: &[f32]) -> Self {
        Tensor::from_tch(tch::Tensor::from_slice(data))
    }

    pub fn from_slice_i64(data: &[i64]) -> Self {
        Tensor::from_tch(tch::Tensor::from_slice(data))
    }

    pub fn zeros(shape: &[i64], dtype: DType, device: Device) -> Self {
        let opts = (tch::Kind::from(dtype), tch::Device::from(device));
        Tensor::from_tch(tch::Tensor::zeros(shape, opts))
    }

    pub fn ones(shape: &[i64], dtype: DType, device: Device) -> Self {
        let opts = (tch::Kind::from(dtype), tch::Device::from(device));
        Tensor::from_tch(tch::Tensor::ones(shape, opts))
    }

    pub fn full(shape: &[i64], val: f64, dtype: DType, device: Device) -> Self {
        let opts = (tch::Kind::from(dtype), tch::Device::from(device));
        Tensor::from_tch(tch::Tensor::full(shape, val, opts))
    }

    /// Standard-normal samples.
    pub fn randn(shape: &[i64], device: Device) -> Self {
        Tensor::from_tch(tch::Tensor::randn(
            shape,
            (tch::Kind::Float, tch::Device::from(device)),
        ))
    }

    pub fn cat(tensors: &[Tensor], dim: i64) -> Self {
        let inner: Vec<&tch::Tensor> = tensors.iter().map(|t| &t.inner).collect();
        Tensor::from_tch(tch::Tensor::cat(&inner, dim))
    }

    // -- Shape --

    pub fn size(&self) -> Vec<i64> {
        self.inner.size()
    }

    pub fn dim(&self) -> usize {
        self.inner.dim()
    }

    pub fn numel(&self) -> i64 {
        self.inner.numel() as i64
    }

    pub fn view(&self, shape: &[i64]) -> Self {
        Tensor::from_tch(self.inner.view(shape))
    }

    pub fn reshape(&self, shape: &[i64]) -> Self {
        Tensor::from_tch(self.inner.reshape(shape))
    }

    pub fn narrow(&self, dim: i64, start: i64, len: i64) -> Self {
        Tensor::from_tch(self.inner.narrow(dim, start, len))
    }

    pub fn transpose(&self, dim0: i64, dim1: i64) -> Self {
        Tensor::from_tch(self.inner.transpose(dim0, dim1))
    }

    pub fn contiguous(&self) -> Self {
        Tensor::from_tch(self.inner.contiguous())
    }

    pub fn tr(&self) -> Self {
        Tensor::from_tch(self.inner.tr())
    }

    // -- Arithmetic --

    pub fn matmul(&self, other: &Tensor) -> Self {
        Tensor::from_tch(self.inner.matmul(&other.inner))
    }

    pub fn pow_scalar(&self, exp: f64) -> Self {
        Tensor::from_tch(self.inner.pow_tensor_scalar(exp))
    }

    pub fn neg(&self) -> Self {
        Tensor::from_tch(self.inner.neg())
    }

    pub fn clamp_min(&self, min: f64) -> Self {
        Tensor::from_tch(self.inner.clamp_min(min))
    }

    // -- Activations --

    pub fn softmax(&self, dim: i64) -> Self {
        Tensor::from_tch(self.inner.softmax(dim, tch::Kind::Float))
    }

    pub fn relu(&self) -> Self {
        Tensor::from_tch(self.inner.relu())
    }

    /// Leaky ReLU with an explicit negative slope.
    pub fn leaky_relu(&self, slope: f64) -> Self {
        let positive = self.inner.relu();
        let negative = self.inner.neg().relu() * slope;
        Tensor::from_tch(positive - negative)
    }

    pub fn sigmoid(&self) -> Self {
        Tensor::from_tch(self.inner.sigmoid())
    }

    pub fn sin(&self) -> Self {
        Tensor::from_tch(self.inner.sin())
    }

    pub fn cos(&self) -> Self {
        Tensor::from_tch(self.inner.cos())
    }

    pub fn log(&self) -> Self {
        Tensor::from_tch(self.inner.log())
    }

    /// Dropout; identity unless `train` is set.
    pub fn dropout(&self, p: f64, train: bool) -> Self {
        Tensor::from_tch(self.inner.dropout(p, train))
    }

    // -- Reduction --

    pub fn mean_dim(&self, dims: &[i64], keepdim: bool) -> Self {
        Tensor::from_tch(self.inner.mean_dim(dims, keepdim, tch::Kind::Float))
    }

    pub fn mean_all(&self) -> Self {
        Tensor::from_tch(self.inner.mean(tch::Kind::Float))
    }

    pub fn min_all(&self) -> Self {
        Tensor::from_tch(self.inner.min())
    }

    pub fn max_all(&self) -> Self {
        Tensor::from_tch(self.inner.max())
    }

    // -- Comparison --

    pub fn ge_scalar(&self, value: f64) -> Self {
        Tensor::from_tch(self.inner.ge(value))
    }

    pub fn eq_tensor(&self, other: &Tensor) -> Self {
        Tensor::from_tch(self.inner.eq_tensor(&other.inner))
    }

    /// True when every element is finite.
    pub fn all_finite(&self) -> bool {
        self.inner
            .isfinite()
            .all()
            .to_kind(tch::Kind::Int64)
            .int64_value(&[])
            != 0
    }

    // -- Signal processing --

    pub fn conv1d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: &[i64],
        padding: &[i64],
        dilation: &[i64],
        groups: i64,
    ) -> Self {
        let bias_inner = bias.map(|b| &b.inner);
        Tensor::from_tch(self.inner.conv1d(
            &weight.inner,
            bias_inner,
            stride,
            padding,
            dilation,
            groups,
        ))
    }

    // -- Normalization --

    pub fn layer_norm(
        &self,
        normalized_shape: &[i64],
        weight: Option<&Tensor>,
        bias: Option<&Tensor>,
        eps: f64,
    ) -> Self {
        Tensor::from_tch(self.inner.layer_norm(
            normalized_shape,
            weight.map(|w| &w.inner),
            bias.map(|b| &b.inner),
            eps,
            true,
        ))
    }

    // -- Losses --

    /// Mean squared error with mean reduction.
    pub fn mse_loss(&self, target: &Tensor) -> Self {
        Tensor::from_tch(self.inner.mse_loss(&target.inner, tch::Reduction::Mean))
    }

    /// Binary cross-entropy on raw logits with mean reduction.
    pub fn binary_cross_entropy_with_logits(&self, target: &Tensor) -> Self {
        Tensor::from_tch(self.inner.binary_cross_entropy_with_logits::<&tch::Tensor>(
            &target.inner,
            None,
            None,
            tch::Reduction::Mean,
        ))
    }

    // -- Autograd --

    /// Back-propagate from this (scalar) tensor into every leaf that requires grad.
    pub fn backward(&self) -> crate::error::Result<()> {
        self.inner.f_backward()?;
        Ok(())
    }

    /// Value-identical tensor with no backward edge.
    pub fn detach(&self) -> Self {
        Tensor::from_tch(self.inner.detach())
    }

    /// Accumulated gradient, `None` when nothing has been accumulated yet.
    pub fn grad(&self) -> Option<Tensor> {
        let grad = self.inner.grad();
        if grad.defined() {
            Some(Tensor::from_tch(grad))
        } else {
            None
        }
    }

    /// Reset the accumulated gradient of this leaf in place.
    pub fn zero_grad(&self) {
        let mut leaf = self.inner.shallow_clone();
        leaf.zero_grad();
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad()
    }

    pub fn set_requires_grad(&self, requires_grad: bool) -> Self {
        Tensor::from_tch(self.inner.set_requires_grad(requires_grad))
    }

    // -- Type / Device --

    pub fn to_dtype(&self, dtype: DType) -> Self {
        Tensor::from_tch(self.inner.to_kind(tch::Kind::from(dtype)))
    }

    pub fn to_device(&self, device: Device) -> Self {
        Tensor::from_tch(self.inner.to_device(tch::Device::from(device)))
    }

    pub fn kind(&self) -> DType {
        DType::from(self.inner.kind())
    }

    pub fn device(&self) -> Device {
        Device::from(self.inner.device())
    }

    pub fn shallow_clone(&self) -> Self {
        Tensor::from_tch(self.inner.shallow_clone())
    }

    // -- Data extraction --

    pub fn f64_value(&self, indices: &[i64]) -> f64 {
        self.inner.double_value(indices)
    }

    /// Value of a single-element tensor.
    pub fn item(&self) -> f64 {
        self.inner.reshape(-1).double_value(&[0])
    }

    pub fn to_vec_f32(&self) -> Vec<f32> {
        let flat = self.inner.reshape(-1).to_kind(tch::Kind::Float);
        let numel = flat.numel();
        let mut result = vec![0.0f32; numel];
        flat.copy_data(&mut result, numel);
        result
    }
}

// ---------------------------------------------------------------------------
// Operator overloads
// ---------------------------------------------------------------------------

macro_rules! tensor_binary_op {
    ($trait:ident, $method:ident) => {
        impl std::ops::$trait<&Tensor> for &Tensor {
            type Output = Tensor;
            fn $method(self, rhs: &Tensor) -> Tensor {
                Tensor::from_tch(std::ops::$trait::$method(&self.inner, &rhs.inner))
            }
        }

        impl std::ops::$trait<Tensor> for &Tensor {
            type Output = Tensor;
            fn $method(self, rhs: Tensor) -> Tensor {
                std::ops::$trait::$method(self, &rhs)
            }
        }

        impl std::ops::$trait<&Tensor> for Tensor {
            type Output = Tensor;
            fn $method(self, rhs: &Tensor) -> Tensor {
                std::ops::$trait::$method(&self, rhs)
            }
        }

        impl std::ops::$trait<Tensor> for Tensor {
            type Output = Tensor;
            fn $method(self, rhs: Tensor) -> Tensor {
                std::ops::$trait::$method(&self, &rhs)
            }
        }

        impl std::ops::$trait<f64> for &Tensor {
            type Output = Tensor;
            fn $method(self, rhs: f64) -> Tensor {
                Tensor::from_tch(std::ops::$trait::$method(&self.inner, rhs))
            }
        }

        impl std::ops::$trait<f64> for Tensor {
            type Output = Tensor;
            fn $method(self, rhs: f64) -> Tensor {
                std::ops::$trait::$method(&self, rhs)
            }
        }
    };
}

tensor_binary_op!(Add, add);
tensor_binary_op!(Sub, sub);
tensor_binary_op!(Mul, mul);
tensor_binary_op!(Div, div);

// AddAssign: Tensor += Tensor
impl std::ops::AddAssign<&Tensor> for Tensor {
    fn add_assign(&mut self, rhs: &Tensor) {
        *self = &*self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_serialization() {
        assert_eq!(serde_json::to_string(&Device::Cpu).unwrap(), "\"cpu\"");
        assert_eq!(
            serde_json::to_string(&Device::Gpu(1)).unwrap(),
            "{\"gpu\":1}"
        );
        let parsed: Device = serde_json::from_str("{\"gpu\":0}").unwrap();
        assert_eq!(parsed, Device::gpu());
    }

    #[test]
    fn test_detach_drops_grad_requirement() {
        let x = Tensor::ones(&[2, 3], DType::Float32, Device::Cpu).set_requires_grad(true);
        let y = &x * 2.0;
        assert!(y.requires_grad());
        let detached = y.detach();
        assert!(!detached.requires_grad());
        assert_eq!(detached.to_vec_f32(), vec![2.0; 6]);
    }

    #[test]
    fn test_backward_and_zero_grad() {
        let x = Tensor::from_slice_f32(&[1.0, 2.0, 3.0]).set_requires_grad(true);
        assert!(x.grad().is_none());

        let loss = x.pow_scalar(2.0).mean_all();
        loss.backward().unwrap();
        let grad = x.grad().expect("gradient after backward").to_vec_f32();
        let expected = [2.0 / 3.0, 4.0 / 3.0, 2.0];
        for (g, e) in grad.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-6);
        }

        x.zero_grad();
        let grad = x.grad().expect("gradient kept after zeroing").to_vec_f32();
        assert!(grad.iter().all(|g| *g == 0.0));
    }

    #[test]
    fn test_no_grad_scope() {
        let x = Tensor::ones(&[2], DType::Float32, Device::Cpu).set_requires_grad(true);
        let y = no_grad(|| &x * 3.0);
        assert!(!y.requires_grad());
    }

    #[test]
    fn test_leaky_relu() {
        let x = Tensor::from_slice_f32(&[-2.0, 0.0, 3.0]);
        let y = x.leaky_relu(0.2).to_vec_f32();
        assert!((y[0] + 0.4).abs() < 1e-6);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 3.0);
    }

    #[test]
    fn test_all_finite() {
        assert!(Tensor::from_slice_f32(&[1.0, 2.0]).all_finite());
        assert!(!Tensor::from_slice_f32(&[1.0, f32::NAN]).all_finite());
        assert!(!Tensor::from_slice_f32(&[f32::INFINITY]).all_finite());
    }
}
