// External imports
use burn::module::Param;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

// Internal imports
use crate::error::ForecastError;

/// Weight initialisation scheme for a linear map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightInit {
    /// U(-a, a) with a = sqrt(6 / (fan_in + fan_out))
    XavierUniform,
    /// N(0, s) with s = sqrt(2 / (fan_in + fan_out))
    XavierNormal,
}

/// Seeded source of initial parameter values.
///
/// Every module draws its weights from the initializer it is handed, so two models built
/// from the same seed are identical and independent of any process-wide RNG.
pub struct ParamInitializer {
    rng: StdRng,
}

impl ParamInitializer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a linear layer `[d_input] -> [d_output]` with zero bias.
    pub fn linear<B: Backend>(
        &mut self,
        d_input: usize,
        d_output: usize,
        scheme: WeightInit,
        device: &B::Device,
    ) -> Result<Linear<B>, ForecastError> {
        let mut layer = LinearConfig::new(d_input, d_output)
            .with_initializer(Initializer::Zeros)
            .init(device);

        let fan_sum = (d_input + d_output) as f64;
        let values: Vec<f32> = match scheme {
            WeightInit::XavierUniform => {
                let bound = (6.0 / fan_sum).sqrt();
                (0..d_input * d_output)
                    .map(|_| self.rng.random_range(-bound..bound) as f32)
                    .collect()
            }
            WeightInit::XavierNormal => self.normal_values(d_input * d_output, (2.0 / fan_sum).sqrt())?,
        };

        let weight = Tensor::<B, 2>::from_data(TensorData::new(values, [d_input, d_output]), device);
        layer.weight = Param::from_tensor(weight);
        Ok(layer)
    }

    /// Creates a learnable vector drawn from N(0, std).
    pub fn normal_vector<B: Backend>(
        &mut self,
        len: usize,
        std: f64,
        device: &B::Device,
    ) -> Result<Param<Tensor<B, 1>>, ForecastError> {
        let values = self.normal_values(len, std)?;
        let tensor = Tensor::<B, 1>::from_data(TensorData::new(values, [len]), device);
        Ok(Param::from_tensor(tensor))
    }

    fn normal_values(&mut self, count: usize, std: f64) -> Result<Vec<f32>, ForecastError> {
        let normal = Normal::new(0.0, std).map_err(|e| {
            ForecastError::configuration(format!("invalid initialisation std {}: {}", std, e))
        })?;
        Ok((0..count)
            .map(|_| normal.sample(&mut self.rng) as f32)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_same_seed_same_weights() {
        let device = Default::default();
        let a = ParamInitializer::new(7)
            .linear::<TestBackend>(4, 3, WeightInit::XavierUniform, &device)
            .unwrap();
        let b = ParamInitializer::new(7)
            .linear::<TestBackend>(4, 3, WeightInit::XavierUniform, &device)
            .unwrap();

        let a = a.weight.val().into_data().to_vec::<f32>().unwrap();
        let b = b.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_xavier_uniform_bounds_and_zero_bias() {
        let device = Default::default();
        let layer = ParamInitializer::new(1)
            .linear::<TestBackend>(18, 10, WeightInit::XavierUniform, &device)
            .unwrap();

        assert_eq!(layer.weight.val().dims(), [18, 10]);
        let bound = (6.0f32 / 28.0).sqrt();
        let weights = layer.weight.val().into_data().to_vec::<f32>().unwrap();
        assert!(weights.iter().all(|w| w.abs() <= bound));

        let bias = layer.bias.as_ref().expect("bias").val();
        assert_eq!(bias.abs().sum().into_scalar(), 0.0);
    }
}
