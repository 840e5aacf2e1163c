use burn::{
    nn::{
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
};

/// Bias-free square convolution, the only kind the backbone uses.
pub(crate) fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &Device<B>,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

#[derive(Module, Debug)]
pub struct DownsampleBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> DownsampleBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        DownsampleBlock {
            conv: conv([in_channels, out_channels], 1, stride, 0, device),
            norm: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(input))
    }
}

/// 1x1 reduce, 3x3 (strided), 1x1 expand, with a residual connection.
///
/// Field names follow torchvision so pretrained weights map one to one.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    norm3: BatchNorm<B, 2>,
    relu: Relu,
    downsample: Option<DownsampleBlock<B>>,
}

impl<B: Backend> Bottleneck<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        device: &Device<B>,
    ) -> Self {
        let width = out_channels / expansion;

        let downsample = (in_channels != out_channels || stride != 1)
            .then(|| DownsampleBlock::new(in_channels, out_channels, stride, device));

        Bottleneck {
            conv1: conv([in_channels, width], 1, 1, 0, device),
            norm1: BatchNormConfig::new(width).init(device),
            conv2: conv([width, width], 3, stride, 1, device),
            norm2: BatchNormConfig::new(width).init(device),
            conv3: conv([width, out_channels], 1, 1, 0, device),
            norm3: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            downsample,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.relu.forward(self.norm1.forward(self.conv1.forward(input)));
        let x = self.relu.forward(self.norm2.forward(self.conv2.forward(x)));
        let x = self.norm3.forward(self.conv3.forward(x));

        self.relu.forward(x + identity)
    }
}

/// A stage of bottlenecks; only the first one changes resolution or width.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<Bottleneck<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn new(
        num_blocks: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        device: &Device<B>,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    Bottleneck::new(in_channels, out_channels, stride, expansion, device)
                } else {
                    Bottleneck::new(out_channels, out_channels, 1, expansion, device)
                }
            })
            .collect();

        LayerBlock { blocks }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}
