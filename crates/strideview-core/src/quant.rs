use crate::TensorDType;

/// Symmetric absmax integer quantization levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    SInt8,
    SInt16,
}

impl Quantization {
    fn max_level(&self) -> f64 {
        match self {
            Quantization::SInt8 => i8::MAX as f64,
            Quantization::SInt16 => i16::MAX as f64,
        }
    }
}

/// Integer levels plus the factor that maps a level back to a value.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedMatrix {
    pub levels: Vec<i32>,
    pub scale: f64,
}

/// Quantize a matrix of floats to signed integer levels. The largest magnitude
/// maps to the highest level.
pub fn quantize<T: TensorDType>(matrix: &[T], quantization: Quantization) -> QuantizedMatrix {
    let absmax = matrix
        .iter()
        .fold(0f64, |acc, &x| acc.max(x.to_f64_lossy().abs()));
    if absmax == 0. {
        return QuantizedMatrix {
            levels: vec![0; matrix.len()],
            scale: 0.,
        };
    }
    let max_level = quantization.max_level();
    let sf = max_level / absmax;
    let levels = matrix
        .iter()
        .map(|&x| (x.to_f64_lossy() * sf).round().clamp(-max_level, max_level) as i32)
        .collect();
    QuantizedMatrix {
        levels,
        scale: absmax / max_level,
    }
}

pub fn dequantize<T: TensorDType>(quantized: &QuantizedMatrix) -> Vec<T> {
    quantized
        .levels
        .iter()
        .map(|&l| T::from_f64_lossy(l as f64 * quantized.scale))
        .collect()
}

/// Computes matrix products on quantized operands with integer accumulation.
#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct QuantizedMultiplier {
    lhs: Quantization,
    rhs: Quantization,
}

impl QuantizedMultiplier {
    /// `lhs` is `m x k`, `rhs` is `k x n`, both column-major. Returns the
    /// `m x n` column-major product.
    pub fn multiply<T: TensorDType>(
        &self,
        m: usize,
        n: usize,
        k: usize,
        lhs: &[T],
        rhs: &[T],
    ) -> Vec<T> {
        let a = quantize(lhs, self.lhs);
        let b = quantize(rhs, self.rhs);
        let scale = a.scale * b.scale;
        log::trace!(
            "Quantized product {}x{}x{} with {:?}/{:?}",
            m,
            k,
            n,
            self.lhs,
            self.rhs
        );
        let mut dst = Vec::with_capacity(m * n);
        for j in 0..n {
            let col = &b.levels[j * k..(j + 1) * k];
            for i in 0..m {
                let acc: i64 = col
                    .iter()
                    .enumerate()
                    .map(|(p, &bv)| a.levels[i + p * m] as i64 * bv as i64)
                    .sum();
                dst.push(T::from_f64_lossy(acc as f64 * scale));
            }
        }
        dst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{distributions::Uniform, Rng};

    #[test]
    pub fn test_sint8_qdq() {
        let mut rng = rand::thread_rng();
        let range = Uniform::new(-0.2, 0.2);
        let matrix: Vec<f32> = (0..32 * 32).map(|_| rng.sample(range)).collect();
        let quantized = quantize(&matrix, Quantization::SInt8);
        assert!(quantized.levels.iter().all(|l| l.abs() <= 127));
        let dequantized: Vec<f32> = dequantize(&quantized);
        for (x, y) in matrix.iter().zip(dequantized.iter()) {
            assert!((x - y).abs() < 0.001);
        }
    }

    #[test]
    pub fn test_zero_matrix() {
        let quantized = quantize(&[0f64; 4], Quantization::SInt16);
        assert_eq!(quantized.levels, vec![0; 4]);
        assert_eq!(dequantize::<f64>(&quantized), vec![0.; 4]);
    }

    #[test]
    pub fn test_quantized_product() {
        // [1 3; 2 4] * [1; 1]
        let lhs = [1f32, 2., 3., 4.];
        let rhs = [1f32, 1.];
        let q = QuantizedMultiplier::new(Quantization::SInt16, Quantization::SInt16);
        let dst = q.multiply(2, 1, 2, &lhs, &rhs);
        assert!((dst[0] - 4.).abs() < 1e-2);
        assert!((dst[1] - 6.).abs() < 1e-2);
    }
}
