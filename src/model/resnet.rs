//! ResNet-18 transfer model
//!
//! The backbone is a standard ResNet-18 (7x7/2 stem, 3x3/2 max-pool, four
//! stages of two basic blocks at 64/128/256/512 channels, global average pool).
//! The classification layer is always created fresh for the target class count.
//! Backbone weights can be loaded from a Burn record file.

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::{BinFileRecorder, FullPrecisionSettings},
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use crate::utils::error::{GrassfierError, Result};

/// Channels produced by the backbone
pub const BACKBONE_FEATURES: usize = 512;

/// Conv + BatchNorm pair
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convs with an identity (or 1x1 projected) shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvBn<B>,
    conv2: ConvBn<B>,
    downsample: Option<ConvBn<B>>,
    relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = if stride != 1 || in_channels != out_channels {
            Some(ConvBn::new([in_channels, out_channels], 1, stride, 0, device))
        } else {
            None
        };

        Self {
            conv1: ConvBn::new([in_channels, out_channels], 3, stride, 1, device),
            conv2: ConvBn::new([out_channels, out_channels], 3, 1, 1, device),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(projection) => projection.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.conv1.forward(x));
        let out = self.conv2.forward(out);
        self.relu.forward(out + identity)
    }
}

/// ResNet-18 feature extractor
#[derive(Module, Debug)]
pub struct ResNet18Backbone<B: Backend> {
    stem: ConvBn<B>,
    maxpool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    relu: Relu,
}

impl<B: Backend> ResNet18Backbone<B> {
    pub fn new(device: &B::Device) -> Self {
        let stages = [(64, 64, 1), (64, 128, 2), (128, 256, 2), (256, 512, 2)];
        let mut blocks = Vec::with_capacity(8);
        for (in_channels, out_channels, stride) in stages {
            blocks.push(BasicBlock::new(in_channels, out_channels, stride, device));
            blocks.push(BasicBlock::new(out_channels, out_channels, 1, device));
        }

        Self {
            stem: ConvBn::new([3, 64], 7, 2, 3, device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            relu: Relu::new(),
        }
    }

    /// Pooled features `[batch, 512]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.stem.forward(input));
        let mut x = self.maxpool.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }

    /// Replace the weights with a stored backbone record
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        if !path.exists() && !path.with_extension("bin").exists() {
            return Err(GrassfierError::Model(format!(
                "pretrained weights not found: {}",
                path.display()
            )));
        }

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let backbone = self
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| GrassfierError::Model(format!("failed to load backbone weights: {:?}", e)))?;
        info!("Loaded pretrained backbone from {:?}", path);
        Ok(backbone)
    }
}

/// Backbone plus a fresh linear head
#[derive(Module, Debug)]
pub struct ResNetClassifier<B: Backend> {
    backbone: ResNet18Backbone<B>,
    fc: Linear<B>,
}

impl<B: Backend> ResNetClassifier<B> {
    pub fn new(num_classes: usize, pretrained: Option<&Path>, device: &B::Device) -> Result<Self> {
        let backbone = ResNet18Backbone::new(device);
        let backbone = match pretrained {
            Some(path) => backbone.load_pretrained(path, device)?,
            None => backbone,
        };

        Ok(Self {
            backbone,
            fc: LinearConfig::new(BACKBONE_FEATURES, num_classes).init(device),
        })
    }

    pub fn backbone(&self) -> &ResNet18Backbone<B> {
        &self.backbone
    }

    /// Logits `[batch, num_classes]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(self.backbone.forward(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_forward_shape() {
        let device = NdArrayDevice::Cpu;
        let model = ResNetClassifier::<TestBackend>::new(5, None, &device).unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [1, 5]);
    }

    #[test]
    fn test_missing_pretrained_weights_is_error() {
        let device = NdArrayDevice::Cpu;
        let result =
            ResNetClassifier::<TestBackend>::new(3, Some(Path::new("/no/such/backbone.bin")), &device);
        assert!(matches!(result, Err(GrassfierError::Model(_))));
    }

    #[test]
    fn test_pretrained_backbone_roundtrip() {
        let device = NdArrayDevice::Cpu;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("backbone");

        let source = ResNet18Backbone::<TestBackend>::new(&device);
        source
            .clone()
            .save_file(path.clone(), &BinFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected: Vec<f32> = source.forward(input.clone()).into_data().to_vec().unwrap();

        let model =
            ResNetClassifier::<TestBackend>::new(2, Some(&path.with_extension("bin")), &device).unwrap();
        let actual: Vec<f32> = model.backbone().forward(input).into_data().to_vec().unwrap();
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
