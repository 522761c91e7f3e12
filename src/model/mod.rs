//! Model module
//!
//! Two classifier variants behind one forward contract: normalized images
//! `[batch, 3, size, size]` in, raw logits `[batch, num_classes]` out.
//!
//! - `cnn`: small CNN trained from scratch
//! - `resnet`: ResNet-18 backbone with a replaced head
//! - `config`: serializable variant selection and builder

pub mod cnn;
pub mod config;
pub mod resnet;

use burn::{
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};

pub use cnn::{SimpleCnn, SimpleCnnConfig};
pub use config::{ModelConfig, ModelVariant, MODEL_CONFIG_FILE};
pub use resnet::{ResNet18Backbone, ResNetClassifier};

/// A classifier of either variant
#[derive(Module, Debug)]
pub enum Classifier<B: Backend> {
    Simple(SimpleCnn<B>),
    Transfer(ResNetClassifier<B>),
}

impl<B: Backend> Classifier<B> {
    /// Logits; no activation is applied
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Classifier::Simple(model) => model.forward(input),
            Classifier::Transfer(model) => model.forward(input),
        }
    }

    /// Class probabilities, for inference only
    pub fn forward_softmax(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(input), 1)
    }

    pub fn variant(&self) -> ModelVariant {
        match self {
            Classifier::Simple(_) => ModelVariant::Simple,
            Classifier::Transfer(_) => ModelVariant::Transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_both_variants_emit_logits_per_class() {
        let device = NdArrayDevice::Cpu;
        for variant in [ModelVariant::Simple, ModelVariant::Transfer] {
            let model = ModelConfig::new(variant, 5, 32).init::<TestBackend>(&device).unwrap();
            assert_eq!(model.variant(), variant);

            let input = Tensor::<TestBackend, 4>::zeros([3, 3, 32, 32], &device);
            assert_eq!(model.forward(input).dims(), [3, 5]);
        }
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(ModelVariant::Simple, 4, 32)
            .init::<TestBackend>(&device)
            .unwrap();
        let probs = model.forward_softmax(Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device));
        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_build_rejects_bad_geometry() {
        let device = NdArrayDevice::Cpu;
        let result = ModelConfig::new(ModelVariant::Simple, 5, 30).init::<TestBackend>(&device);
        assert!(result.is_err());
    }
}
