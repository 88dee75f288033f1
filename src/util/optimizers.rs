// External imports
use anyhow::{anyhow, Result};
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{
    AdaGradConfig, AdamConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig, SimpleOptimizer,
};
use burn::record::{BinFileRecorder, FullPrecisionSettings, Record, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use std::path::Path;

// Internal imports
use crate::constants::{ADADELTA_EPSILON, ADADELTA_RHO};
use crate::util::named_option::named_option;

named_option! {
    /// Optimizer used by the trainer.
    pub enum OptimizerKind("optimizer") {
        Adam => "Adam",
        Sgd => "SGD",
        RmsProp => "RMSProp",
        Adadelta => "Adadelta",
        Adagrad => "Adagrad",
    }
}

/// Optimizer for a fixed module type, with its state persisted to disk.
///
/// Object safe, so the trainer can hold whichever optimizer the configuration names.
pub trait ModelOptimizer<M: AutodiffModule<B>, B: AutodiffBackend>: Send {
    fn step(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M;

    fn save_state(&self, path: &Path) -> Result<()>;

    fn load_state(self: Box<Self>, path: &Path, device: &B::Device) -> Result<Box<dyn ModelOptimizer<M, B>>>;
}

impl<M, B, O> ModelOptimizer<M, B> for O
where
    M: AutodiffModule<B> + 'static,
    B: AutodiffBackend,
    O: Optimizer<M, B> + 'static,
{
    fn step(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M {
        Optimizer::<M, B>::step(self, learning_rate, module, grads)
    }

    fn save_state(&self, path: &Path) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        Recorder::<B>::record(&recorder, self.to_record(), path.to_path_buf())
            .map_err(|e| anyhow!("Failed to save optimizer state to {}: {:?}", path.display(), e))?;
        Ok(())
    }

    fn load_state(self: Box<Self>, path: &Path, device: &B::Device) -> Result<Box<dyn ModelOptimizer<M, B>>> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let record = Recorder::<B>::load(&recorder, path.to_path_buf(), device)
            .map_err(|e| anyhow!("Failed to load optimizer state from {}: {:?}", path.display(), e))?;
        Ok(Box::new((*self).load_record(record)))
    }
}

/// Builds a fresh optimizer of the requested kind.
pub fn build_optimizer<M, B>(kind: OptimizerKind) -> Box<dyn ModelOptimizer<M, B>>
where
    M: AutodiffModule<B> + 'static,
    B: AutodiffBackend,
{
    match kind {
        OptimizerKind::Adam => Box::new(AdamConfig::new().init::<B, M>()),
        OptimizerKind::Sgd => Box::new(SgdConfig::new().init::<B, M>()),
        OptimizerKind::RmsProp => Box::new(RmsPropConfig::new().init::<B, M>()),
        OptimizerKind::Adagrad => Box::new(AdaGradConfig::new().init::<B, M>()),
        OptimizerKind::Adadelta => Box::new(OptimizerAdaptor::<Adadelta, M, B>::from(Adadelta::new(
            ADADELTA_RHO,
            ADADELTA_EPSILON,
        ))),
    }
}

/// Adadelta (Zeiler, 2012) with the learning rate scaling the final update.
#[derive(Clone, Debug)]
pub struct Adadelta {
    rho: f64,
    epsilon: f64,
}

impl Adadelta {
    pub fn new(rho: f64, epsilon: f64) -> Self {
        Self { rho, epsilon }
    }
}

/// Running averages of squared gradients and squared updates.
#[derive(Record, Clone)]
pub struct AdadeltaState<B: Backend, const D: usize> {
    pub square_avg: Tensor<B, D>,
    pub acc_delta: Tensor<B, D>,
}

impl<B: Backend> SimpleOptimizer<B> for Adadelta {
    type State<const D: usize> = AdadeltaState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: f64,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let (square_avg, acc_delta) = match state {
            Some(state) => (state.square_avg, state.acc_delta),
            None => (grad.zeros_like(), grad.zeros_like()),
        };

        let square_avg =
            square_avg.mul_scalar(self.rho) + grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho);
        let std = square_avg.clone().add_scalar(self.epsilon).sqrt();
        let delta = acc_delta.clone().add_scalar(self.epsilon).sqrt().div(std).mul(grad);
        let acc_delta =
            acc_delta.mul_scalar(self.rho) + delta.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho);

        let tensor = tensor - delta.mul_scalar(lr);
        (tensor, Some(AdadeltaState { square_avg, acc_delta }))
    }

    fn to_device<const D: usize>(state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        AdadeltaState {
            square_avg: state.square_avg.to_device(device),
            acc_delta: state.acc_delta.to_device(device),
        }
    }
}
