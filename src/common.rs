/// Colour channels of every input image.
pub const CHANNELS: usize = 3;
/// Default model input height.
pub const HEIGHT: usize = 256;
/// Default model input width.
pub const WIDTH: usize = 256;

/// Background and fire.
pub const NUM_CLASSES: usize = 2;

pub const CLASSES: [&str; NUM_CLASSES] = ["background", "fire"];

pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
