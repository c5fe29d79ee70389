pub mod fallback;
pub mod normalizer;

pub use fallback::{FallbackState, HttpImageProbe, ImageFallback, ImageProbe, resolve_first_loadable};
pub use normalizer::{DriveLinkStyle, ImageReference, dedupe_preserving_order, parse_image_field};
