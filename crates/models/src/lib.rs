//! Burn models for density-field regression.
//!
//! This crate defines the architectures consumed by the trainer:
//! - `SixtyChannels`: single-stack network mapping an image stack to a density map.
//! - `MainNet`: dual-stack network that refines the `SixtyChannels` output with an
//!   initial-condition map.
//!
//! Both implement [`DensityModel`], the capability the training loop is written against.
//! Any architecture honouring the input/output shape contract can be substituted.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use data_contracts::{InputArity, SampleShape};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model expects an init map but none was provided")]
    MissingInit,
    #[error("input shape {found:?} does not match expected {expected:?}")]
    InputShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("input {height}x{width} is too small for the conv/pool stack")]
    GeometryTooSmall { height: usize, width: usize },
}

/// Forward capability shared by every density model.
pub trait DensityModel<B: Backend>: Module<B> {
    /// Inputs this model consumes.
    fn arity(&self) -> InputArity;

    /// Predict a `[batch, height, width]` density map.
    ///
    /// `image` is `[batch, channels, height, width]`; `init` is `[batch, 1, height, width]`
    /// and required only for [`InputArity::ImageAndInit`] models.
    fn predict(
        &self,
        image: Tensor<B, 4>,
        init: Option<Tensor<B, 4>>,
    ) -> Result<Tensor<B, 3>, ModelError>;
}

#[derive(Debug, Clone)]
pub struct SixtyChannelsConfig {
    pub input: SampleShape,
    pub conv1_channels: usize,
    pub conv2_channels: usize,
    pub hidden: usize,
}

impl Default for SixtyChannelsConfig {
    fn default() -> Self {
        Self {
            input: SampleShape::new(60, 100, 100),
            conv1_channels: 64,
            conv2_channels: 128,
            hidden: 128 * 128,
        }
    }
}

impl SixtyChannelsConfig {
    pub fn for_shape(input: SampleShape) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    /// Spatial size after two 2x2 convolutions and two 2x2 max-pools.
    pub fn pooled_dims(&self) -> (usize, usize) {
        let pool = |v: usize| v.saturating_sub(2) / 2 / 2;
        (pool(self.input.height), pool(self.input.width))
    }

    pub fn flattened(&self) -> usize {
        let (h, w) = self.pooled_dims();
        self.conv2_channels * h * w
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let (h, w) = self.pooled_dims();
        if h == 0 || w == 0 {
            return Err(ModelError::GeometryTooSmall {
                height: self.input.height,
                width: self.input.width,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Module)]
pub struct SixtyChannels<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    channels: usize,
    height: usize,
    width: usize,
    flattened: usize,
}

impl<B: Backend> SixtyChannels<B> {
    pub fn new(cfg: SixtyChannelsConfig, device: &B::Device) -> Self {
        let channels = cfg.input.channels.max(1);
        let conv1 = Conv2dConfig::new([channels, cfg.conv1_channels], [2, 2]).init(device);
        let conv2 =
            Conv2dConfig::new([cfg.conv1_channels, cfg.conv2_channels], [2, 2]).init(device);
        let conv3 =
            Conv2dConfig::new([cfg.conv2_channels, cfg.conv2_channels], [1, 1]).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let flattened = cfg.flattened().max(1);
        let fc1 = LinearConfig::new(flattened, cfg.hidden).init(device);
        let fc2 = LinearConfig::new(cfg.hidden, cfg.input.plane().max(1)).init(device);
        Self {
            conv1,
            conv2,
            conv3,
            pool,
            fc1,
            fc2,
            channels,
            height: cfg.input.height,
            width: cfg.input.width,
            flattened,
        }
    }

    /// `[B, C, H, W]` image stack to `[B, H, W]` density.
    pub fn forward(&self, image: Tensor<B, 4>) -> Tensor<B, 3> {
        let batch = image.dims()[0];
        let x = relu(self.conv1.forward(image));
        let x = relu(self.conv2.forward(x));
        let x = self.pool.forward(x);
        let x = relu(self.conv3.forward(x));
        let x = self.pool.forward(x);
        let x = x.reshape([batch, self.flattened]);
        let x = relu(self.fc1.forward(x));
        self.fc2
            .forward(x)
            .reshape([batch, self.height, self.width])
    }

    fn check_image(&self, image: &Tensor<B, 4>) -> Result<(), ModelError> {
        let [_, c, h, w] = image.dims();
        if c != self.channels || h != self.height || w != self.width {
            return Err(ModelError::InputShape {
                expected: vec![self.channels, self.height, self.width],
                found: vec![c, h, w],
            });
        }
        Ok(())
    }
}

impl<B: Backend> DensityModel<B> for SixtyChannels<B> {
    fn arity(&self) -> InputArity {
        InputArity::ImageOnly
    }

    fn predict(
        &self,
        image: Tensor<B, 4>,
        _init: Option<Tensor<B, 4>>,
    ) -> Result<Tensor<B, 3>, ModelError> {
        self.check_image(&image)?;
        Ok(self.forward(image))
    }
}

#[derive(Debug, Clone)]
pub struct MainNetConfig {
    pub sub: SixtyChannelsConfig,
    pub fuse_hidden: usize,
}

impl Default for MainNetConfig {
    fn default() -> Self {
        Self {
            sub: SixtyChannelsConfig::default(),
            fuse_hidden: 16,
        }
    }
}

impl MainNetConfig {
    pub fn for_shape(input: SampleShape) -> Self {
        Self {
            sub: SixtyChannelsConfig::for_shape(input),
            ..Default::default()
        }
    }
}

#[derive(Debug, Module)]
pub struct MainNet<B: Backend> {
    sub: SixtyChannels<B>,
    fuse1: Conv2d<B>,
    fuse2: Conv2d<B>,
}

impl<B: Backend> MainNet<B> {
    pub fn new(cfg: MainNetConfig, device: &B::Device) -> Self {
        let hidden = cfg.fuse_hidden.max(1);
        let sub = SixtyChannels::new(cfg.sub, device);
        let fuse1 = Conv2dConfig::new([2, hidden], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let fuse2 = Conv2dConfig::new([hidden, 1], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        Self { sub, fuse1, fuse2 }
    }

    /// `subx`: `[B, C, H, W]` image stack; `mainx`: `[B, 1, H, W]` init map.
    pub fn forward(&self, subx: Tensor<B, 4>, mainx: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, _, height, width] = mainx.dims();
        let sub = self.sub.forward(subx).reshape([batch, 1, height, width]);
        let x = Tensor::cat(vec![sub, mainx], 1);
        let x = relu(self.fuse1.forward(x));
        self.fuse2.forward(x).reshape([batch, height, width])
    }
}

impl<B: Backend> DensityModel<B> for MainNet<B> {
    fn arity(&self) -> InputArity {
        InputArity::ImageAndInit
    }

    fn predict(
        &self,
        image: Tensor<B, 4>,
        init: Option<Tensor<B, 4>>,
    ) -> Result<Tensor<B, 3>, ModelError> {
        let init = init.ok_or(ModelError::MissingInit)?;
        self.sub.check_image(&image)?;
        let [b, c, h, w] = init.dims();
        if b != image.dims()[0] || c != 1 || h != self.sub.height || w != self.sub.width {
            return Err(ModelError::InputShape {
                expected: vec![image.dims()[0], 1, self.sub.height, self.sub.width],
                found: vec![b, c, h, w],
            });
        }
        Ok(self.forward(image, init))
    }
}

pub mod prelude {
    pub use super::{
        DensityModel, MainNet, MainNetConfig, ModelError, SixtyChannels, SixtyChannelsConfig,
    };
}
