use ndarray::prelude::*;

/// Nearest neighbour upsampling by an integer factor along both spatial axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Upsample {
    factor: usize,
}

impl Upsample {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
        }
    }

    pub fn forward(&self, x: Array4<f32>) -> Array4<f32> {
        let (n, h, w, c) = x.dim();
        let f = self.factor;
        let step = f as isize;
        let mut y = Array4::zeros((n, h * f, w * f, c));

        for dy in 0..f {
            for dx in 0..f {
                y.slice_mut(s![.., dy..;step, dx..;step, ..]).assign(&x);
            }
        }

        y
    }

    pub fn backward(&self, d: Array4<f32>) -> Array4<f32> {
        let (n, h, w, c) = d.dim();
        let f = self.factor;
        let step = f as isize;
        let mut grad = Array4::zeros((n, h / f, w / f, c));

        for dy in 0..f {
            for dx in 0..f {
                grad.zip_mut_with(&d.slice(s![.., dy..;step, dx..;step, ..]), |a, &g| *a += g);
            }
        }

        grad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_pixels_and_sums_gradients() {
        let up = Upsample::new(2);
        let x = Array4::from_shape_vec((1, 2, 2, 1), vec![1., 2., 3., 4.]).unwrap();
        let y = up.forward(x);

        assert_eq!(y.dim(), (1, 4, 4, 1));
        assert_eq!(y[[0, 0, 0, 0]], 1.);
        assert_eq!(y[[0, 1, 1, 0]], 1.);
        assert_eq!(y[[0, 0, 3, 0]], 2.);
        assert_eq!(y[[0, 3, 3, 0]], 4.);

        let d = up.backward(Array4::ones((1, 4, 4, 1)));
        assert_eq!(d, Array4::from_elem((1, 2, 2, 1), 4.));
    }
}
