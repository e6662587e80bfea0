/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-10;

/// B3 spline 1D kernel coefficients: [1, 4, 6, 4, 1] / 16.
pub const B3_KERNEL: [f64; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Gaussian noise scaling of the first B3 a-trous wavelet layer.
/// sigma(noise) = sigma(layer 0) / this factor.
pub const B3_NOISE_LAYER0: f64 = 0.8907;

/// Binarization threshold for large-scale structure masks, as a fraction of
/// the full mask amplitude. At this level the smoothed reconstruction of a
/// compact rejected block recovers the block's own footprint.
pub const LARGE_SCALE_THRESHOLD: f64 = 0.2;

/// Bytes accounted per pixel stack sample: value + raw + packed index/flags.
pub const STACK_ITEM_BYTES: usize = 12;

/// Bytes accounted per output pixel when sizing row bands.
pub const OUTPUT_PIXEL_BYTES: usize = 4;

/// Pedestal keyword values are expressed in 16-bit data numbers.
pub const PEDESTAL_SCALE: f64 = 65536.0;

/// Maximum iterations for iterated clipping loops (sigma, CCD, RCR).
pub const MAX_CLIP_ITERATIONS: usize = 100;
