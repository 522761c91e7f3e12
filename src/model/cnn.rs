//! From-scratch CNN
//!
//! Three conv blocks (3x3 conv, ReLU, 2x2 max-pool) doubling depth 32 → 64 → 128,
//! then a dense head with dropout. The flatten width follows from the input size:
//! each block halves the spatial side, so the head sees `128 * (size / 8)^2` features.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Output channels of each conv block
pub const BLOCK_CHANNELS: [usize; 3] = [32, 64, 128];

/// Total spatial downsampling of the conv stack
pub const DOWNSAMPLE_FACTOR: usize = 1 << BLOCK_CHANNELS.len();

/// Configuration for the SimpleCnn model
#[derive(Config, Debug)]
pub struct SimpleCnnConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub image_size: usize,

    /// Width of the hidden dense layer
    #[config(default = "256")]
    pub hidden_size: usize,

    /// Dropout before the output layer
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl SimpleCnnConfig {
    /// Spatial side after the conv stack
    pub fn feature_side(&self) -> usize {
        self.image_size / DOWNSAMPLE_FACTOR
    }

    /// Number of features entering the dense head
    pub fn flatten_width(&self) -> usize {
        let side = self.feature_side();
        BLOCK_CHANNELS[BLOCK_CHANNELS.len() - 1] * side * side
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SimpleCnn<B> {
        let mut blocks = Vec::with_capacity(BLOCK_CHANNELS.len());
        let mut in_channels = 3;
        for &out_channels in BLOCK_CHANNELS.iter() {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        SimpleCnn {
            blocks,
            fc1: LinearConfig::new(self.flatten_width(), self.hidden_size).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
        }
    }
}

/// Conv2d, ReLU and a 2x2 max-pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        Self {
            conv,
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Small CNN trained from scratch
#[derive(Module, Debug)]
pub struct SimpleCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    fc1: Linear<B>,
    relu: Relu,
    dropout: Dropout,
    fc2: Linear<B>,
}

impl<B: Backend> SimpleCnn<B> {
    /// Logits `[batch, num_classes]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = input;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_flatten_width_tracks_input_size() {
        assert_eq!(SimpleCnnConfig::new(3).flatten_width(), 128 * 28 * 28);
        assert_eq!(
            SimpleCnnConfig::new(3).with_image_size(64).flatten_width(),
            128 * 8 * 8
        );
    }

    #[test]
    fn test_forward_shape() {
        let device = NdArrayDevice::Cpu;
        let model = SimpleCnnConfig::new(5)
            .with_image_size(32)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [2, 5]);
    }
}
