use crate::{common::CHANNELS, model::blocks::{LayerBlock, conv}};
use burn::{
    nn::{
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
        conv::Conv2d,
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
};

/// ResNet feature extractor without the pooling/classifier tail.
/// Output stride is 32.
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: LayerBlock<B>,
    layer2: LayerBlock<B>,
    layer3: LayerBlock<B>,
    layer4: LayerBlock<B>,
}

impl<B: Backend> ResNetBackbone<B> {
    pub fn new(
        blocks: [usize; 4],
        base_channels: usize,
        expansion: usize,
        device: &Device<B>,
    ) -> Self {
        let conv1 = conv([CHANNELS, base_channels], 7, 2, 3, device);
        let norm1 = BatchNormConfig::new(base_channels).init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let widths = [1, 2, 4, 8].map(|m| base_channels * m * expansion);
        let layer1 = LayerBlock::new(blocks[0], base_channels, widths[0], 1, expansion, device);
        let layer2 = LayerBlock::new(blocks[1], widths[0], widths[1], 2, expansion, device);
        let layer3 = LayerBlock::new(blocks[2], widths[1], widths[2], 2, expansion, device);
        let layer4 = LayerBlock::new(blocks[3], widths[2], widths[3], 2, expansion, device);

        ResNetBackbone {
            conv1,
            norm1,
            relu: Relu::new(),
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
        }
    }

    /// The torchvision ResNet-50 layout.
    pub fn resnet50(device: &Device<B>) -> Self {
        Self::new([3, 4, 6, 3], 64, 4, device)
    }

    pub fn out_channels(base_channels: usize, expansion: usize) -> usize {
        base_channels * 8 * expansion
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(input);
        let x = self.norm1.forward(x);
        let x = self.relu.forward(x);
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        self.layer4.forward(x)
    }
}
