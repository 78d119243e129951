use ndarray::{Zip, linalg, parallel::prelude::*, prelude::*};

use super::LayerCache;
use crate::{MlErr, Result};

/// A 2D convolution over NHWC tensors, computed as an im2col matrix product.
///
/// Parameters are laid out as weights `[k, k, in, out]` followed by biases `[out]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of channels of the input.
    /// * `out_channels` - The amount of filters.
    /// * `kernel` - The side of the square kernel.
    /// * `stride` - The step between kernel applications.
    /// * `padding` - The zero padding added to each spatial border.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride: stride.max(1),
            padding,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weight_size() + self.out_channels
    }

    pub fn weight_shape(&self) -> Vec<usize> {
        vec![
            self.kernel,
            self.kernel,
            self.in_channels,
            self.out_channels,
        ]
    }

    pub fn bias_shape(&self) -> Vec<usize> {
        vec![self.out_channels]
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Computes the spatial size of the output for an input of spatial size `size`.
    ///
    /// # Returns
    /// An error if the padded input can't hold a single kernel.
    pub fn output_size(&self, size: usize) -> Result<usize> {
        let padded = size + 2 * self.padding;
        if padded < self.kernel {
            return Err(MlErr::InputTooSmall {
                size: padded,
                kernel: self.kernel,
            });
        }

        Ok((padded - self.kernel) / self.stride + 1)
    }

    pub fn forward(
        &self,
        params: &[f32],
        x: Array4<f32>,
        record: bool,
    ) -> Result<(Array4<f32>, Option<LayerCache>)> {
        let (n, h, w, c) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::ShapeMismatch {
                what: "convolution input channels",
                got: x.shape().to_vec(),
                expected: vec![n, h, w, self.in_channels],
            });
        }

        let (oh, ow) = (self.output_size(h)?, self.output_size(w)?);
        let cols = self.im2col(x.view(), (oh, ow));
        let (weights, biases) = self.view_params(params)?;

        let mut z = Array2::zeros((n * oh * ow, self.out_channels));
        linalg::general_mat_mul(1.0, &cols, &weights, 0.0, &mut z);
        z += &biases;

        let y = z.into_shape_with_order((n, oh, ow, self.out_channels))?;
        let cache = record.then(|| LayerCache::Conv2d {
            cols,
            input_dim: x.dim(),
        });

        Ok((y, cache))
    }

    /// Backpropagates `d` through the convolution, accumulating into `grad` when given.
    pub fn backward(
        &self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        cols: Array2<f32>,
        input_dim: (usize, usize, usize, usize),
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        let rows = cols.nrows();
        let d = standard(d).into_shape_with_order((rows, self.out_channels))?;

        if let Some(grad) = grad {
            let (mut dw, mut db) = self.view_grad(grad)?;
            linalg::general_mat_mul(1.0, &cols.t(), &d, 1.0, &mut dw);
            db.zip_mut_with(&d.sum_axis(Axis(0)), |g, &s| *g += s);
        }

        let (weights, _) = self.view_params(params)?;
        let mut dcols = Array2::zeros((rows, self.weight_size() / self.out_channels));
        linalg::general_mat_mul(1.0, &d, &weights.t(), 0.0, &mut dcols);

        Ok(self.col2im(dcols.view(), input_dim))
    }

    fn weight_size(&self) -> usize {
        self.kernel * self.kernel * self.in_channels * self.out_channels
    }

    /// Source pixel for output position `o` and kernel offset `k`, if it isn't padding.
    fn source(&self, o: usize, k: usize, len: usize) -> Option<usize> {
        (o * self.stride + k)
            .checked_sub(self.padding)
            .filter(|&i| i < len)
    }

    /// Unrolls every receptive field of `x` into a row of the returned matrix.
    fn im2col(&self, x: ArrayView4<f32>, (oh, ow): (usize, usize)) -> Array2<f32> {
        let (n, h, w, c) = x.dim();
        let k = self.kernel;
        let mut cols = Array2::zeros((n * oh * ow, k * k * c));

        Zip::indexed(cols.rows_mut()).par_for_each(|r, mut row| {
            let (b, oy, ox) = (r / (oh * ow), (r / ow) % oh, r % ow);

            for ky in 0..k {
                let Some(iy) = self.source(oy, ky, h) else {
                    continue;
                };

                for kx in 0..k {
                    let Some(ix) = self.source(ox, kx, w) else {
                        continue;
                    };

                    let start = (ky * k + kx) * c;
                    row.slice_mut(s![start..start + c])
                        .assign(&x.slice(s![b, iy, ix, ..]));
                }
            }
        });

        cols
    }

    /// Folds the receptive field gradients back onto the input, summing overlaps.
    fn col2im(&self, dcols: ArrayView2<f32>, dim: (usize, usize, usize, usize)) -> Array4<f32> {
        let (_, h, w, c) = dim;
        let k = self.kernel;
        let (oh, ow) = (
            self.output_size(h).unwrap_or_default(),
            self.output_size(w).unwrap_or_default(),
        );
        let mut dx = Array4::zeros(dim);

        dx.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(b, mut image)| {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let row = dcols.row((b * oh + oy) * ow + ox);

                        for ky in 0..k {
                            let Some(iy) = self.source(oy, ky, h) else {
                                continue;
                            };

                            for kx in 0..k {
                                let Some(ix) = self.source(ox, kx, w) else {
                                    continue;
                                };

                                let start = (ky * k + kx) * c;
                                image
                                    .slice_mut(s![iy, ix, ..])
                                    .zip_mut_with(&row.slice(s![start..start + c]), |a, &g| {
                                        *a += g
                                    });
                            }
                        }
                    }
                }
            });

        dx
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.weight_size();
        let shape = (w_size / self.out_channels, self.out_channels);
        let weights = ArrayView2::from_shape(shape, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.out_channels, &params[w_size..])?;
        Ok((weights, biases))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.weight_size();
        let shape = (w_size / self.out_channels, self.out_channels);
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(shape, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.out_channels, db_raw)?;
        Ok((dw, db))
    }
}

/// Makes sure the array can be reshaped in row-major order.
pub(super) fn standard(x: Array4<f32>) -> Array4<f32> {
    if x.is_standard_layout() {
        x
    } else {
        x.as_standard_layout().into_owned()
    }
}
