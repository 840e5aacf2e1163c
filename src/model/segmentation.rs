use crate::{
    data::resize::resize_float_batch,
    model::{
        backbone::{ResNetBackbone, ResNetBackboneRecord},
        blocks::conv,
    },
};
use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Relu,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
};

#[derive(Config, Debug)]
pub struct FireSegmentationModelConfig {
    #[config(default = 2)]
    pub num_classes: usize,
    /// Bottlenecks per stage.
    #[config(default = "[3, 4, 6, 3]")]
    pub blocks: [usize; 4],
    /// Stem width; stage widths are multiples of it.
    #[config(default = 64)]
    pub base_channels: usize,
    #[config(default = 4)]
    pub expansion: usize,
    #[config(default = 256)]
    pub head_channels: usize,
}

impl FireSegmentationModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FireSegmentationModel<B> {
        let backbone =
            ResNetBackbone::new(self.blocks, self.base_channels, self.expansion, device);
        let in_channels = ResNetBackbone::<B>::out_channels(self.base_channels, self.expansion);

        let head = SegmentationHead {
            conv: conv([in_channels, self.head_channels], 3, 1, 1, device),
            norm: BatchNormConfig::new(self.head_channels).init(device),
            relu: Relu::new(),
            classifier: Conv2dConfig::new([self.head_channels, self.num_classes], [1, 1])
                .init(device),
        };

        FireSegmentationModel { backbone, head }
    }
}

#[derive(Module, Debug)]
pub struct SegmentationHead<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    relu: Relu,
    classifier: Conv2d<B>,
}

impl<B: Backend> SegmentationHead<B> {
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(features);
        let x = self.relu.forward(self.norm.forward(x));
        self.classifier.forward(x)
    }
}

/// Fully-convolutional ResNet: per-pixel class scores at input resolution.
#[derive(Module, Debug)]
pub struct FireSegmentationModel<B: Backend> {
    backbone: ResNetBackbone<B>,
    head: SegmentationHead<B>,
}

impl<B: Backend> FireSegmentationModel<B> {
    /// `[N, 3, H, W]` images to `[N, num_classes, H, W]` logits, upsampled
    /// from output stride 32 with nearest-neighbour.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = images.dims();
        let features = self.backbone.forward(images);
        let logits = self.head.forward(features);
        resize_float_batch(logits, [height, width])
    }

    /// Replace the backbone weights, e.g. with ImageNet-pretrained ones.
    pub fn load_backbone(mut self, record: ResNetBackboneRecord<B>) -> Self {
        self.backbone = self.backbone.load_record(record);
        self
    }
}
